//! REST inspection endpoints.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use messages::now_ms;

use crate::services::presence;
use crate::state::{AppState, InvestigationRow, Player};

/// `GET /health` — liveness plus headline counts.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (players, investigations) = presence::counts(&state).await;
    Json(json!({
        "status": "healthy",
        "players": players,
        "investigations": investigations,
        "timestamp": now_ms(),
    }))
}

/// `GET /api/players` — current roster rows.
pub async fn list_players(State(state): State<AppState>) -> Json<Vec<Player>> {
    Json(presence::players(&state).await)
}

/// `GET /api/investigations` — in-flight investigations.
pub async fn list_investigations(State(state): State<AppState>) -> Json<Vec<InvestigationRow>> {
    Json(presence::investigations(&state).await)
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
