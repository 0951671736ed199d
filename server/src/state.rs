//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. All
//! tables are plain in-memory maps behind `Arc<RwLock<_>>`; a server restart
//! clears everything by design. The roster pairs each player row with the
//! `mpsc` sender of its connection task, which is the only way peers reach
//! that socket.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};

use messages::{Investigation, Message, Position};

use crate::rate_limit::RateLimiter;

// =============================================================================
// PLAYER / INVESTIGATION ROWS
// =============================================================================

/// Roster row for one connected player. Exists for the lifetime of the
/// WebSocket connection only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub position: Option<Position>,
    pub investigation: Option<Investigation>,
    pub connected_at: i64,
    pub last_seen: i64,
}

/// A tracked investigation. `playerId` always references a connected player;
/// the row is removed together with the player on disconnect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationRow {
    #[serde(flatten)]
    pub investigation: Investigation,
    pub player_id: String,
    pub start_time: i64,
}

/// Connected players plus the outgoing channel of each connection task.
#[derive(Default)]
pub struct Roster {
    pub players: HashMap<String, Player>,
    pub clients: HashMap<String, mpsc::Sender<Message>>,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// A map marker owned by a player. Payload fields beyond the known ones are
/// carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub player_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One recorded step milestone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRecord {
    pub session_steps: u64,
    pub total_steps: u64,
    pub timestamp: i64,
    pub achieved: bool,
}

/// Per-player game state. Unlike the roster this survives reconnects (but
/// not restarts), so a returning player keeps steps, markers, and base.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerGameState {
    pub player_id: String,
    pub total_steps: u64,
    pub session_steps: u64,
    pub position: Option<Position>,
    pub markers: Vec<Marker>,
    pub milestones: HashMap<String, MilestoneRecord>,
    pub base_established: bool,
    pub base_position: Option<Position>,
    pub last_saved: i64,
    pub created_at: i64,
}

/// Game-state store: per-player states plus a global marker index.
#[derive(Default)]
pub struct GameStateStore {
    pub players: HashMap<String, PlayerGameState>,
    pub markers: HashMap<String, Marker>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<RwLock<Roster>>,
    pub investigations: Arc<RwLock<HashMap<String, InvestigationRow>>>,
    pub game: Arc<RwLock<GameStateStore>>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            roster: Arc::new(RwLock::new(Roster::default())),
            investigations: Arc::new(RwLock::new(HashMap::new())),
            game: Arc::new(RwLock::new(GameStateStore::default())),
            rate_limiter: RateLimiter::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
