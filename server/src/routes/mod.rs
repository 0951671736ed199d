//! Router assembly.
//!
//! Binds the websocket endpoint and the REST surface under a single Axum
//! router, with the game's static assets served as the fallback so `/`
//! resolves to the entry page.

pub mod api;
pub mod ws;

use std::path::PathBuf;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Resolve the directory holding the game's static assets.
fn static_dir() -> PathBuf {
    std::env::var("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("static"))
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let assets = ServeDir::new(static_dir()).append_index_html_on_directories(true);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/health", get(api::health))
        .route("/api/players", get(api::list_players))
        .route("/api/investigations", get(api::list_investigations))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .fallback_service(assets)
        .with_state(state)
}
