//! Game-state service — steps, markers, bases, and milestones.
//!
//! DESIGN
//! ======
//! A lightweight in-memory store keyed by player id. Unlike the roster it is
//! not cleared on disconnect, so a player that reconnects with the same id
//! gets its steps, markers, and base back. Marker mutations are owner-checked;
//! everything else is passthrough bookkeeping for the clients.

use rand::Rng;
use serde_json::Value;
use tracing::info;

use messages::{Message, MilestonePayload, Position, UnlockPayload, now_ms};

use crate::state::{AppState, GameStateStore, Marker, MilestoneRecord, PlayerGameState};

/// Steps a brand-new player starts with.
pub const DEFAULT_TOTAL_STEPS: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum GameStateError {
    #[error("marker payload must be a JSON object")]
    InvalidMarker,
    #[error("marker not found or not owned by player")]
    MarkerNotOwned,
}

// =============================================================================
// STATE ACCESS
// =============================================================================

fn ensure_state<'a>(store: &'a mut GameStateStore, player_id: &str) -> &'a mut PlayerGameState {
    store
        .players
        .entry(player_id.to_owned())
        .or_insert_with(|| {
            let now = now_ms();
            info!(%player_id, "initialized game state");
            PlayerGameState {
                player_id: player_id.to_owned(),
                total_steps: DEFAULT_TOTAL_STEPS,
                session_steps: 0,
                position: None,
                markers: Vec::new(),
                milestones: std::collections::HashMap::new(),
                base_established: false,
                base_position: None,
                last_saved: now,
                created_at: now,
            }
        })
}

/// Mirror a roster position update into the game state.
pub async fn update_position(state: &AppState, player_id: &str, position: Position) {
    let mut store = state.game.write().await;
    let gs = ensure_state(&mut store, player_id);
    gs.position = Some(position);
    gs.last_saved = now_ms();
}

/// Record a step sync from the client.
pub async fn sync_steps(state: &AppState, player_id: &str, total_steps: u64, session_steps: u64) {
    let mut store = state.game.write().await;
    let gs = ensure_state(&mut store, player_id);
    gs.total_steps = total_steps;
    gs.session_steps = session_steps;
    gs.last_saved = now_ms();
}

// =============================================================================
// MARKERS
// =============================================================================

/// Store a client-created marker. The server assigns `id`, `playerId`, and
/// `createdAt` when the payload lacks them.
pub async fn create_marker(
    state: &AppState,
    player_id: &str,
    payload: Value,
) -> Result<Marker, GameStateError> {
    if !payload.is_object() {
        return Err(GameStateError::InvalidMarker);
    }
    let mut marker: Marker =
        serde_json::from_value(payload).map_err(|_| GameStateError::InvalidMarker)?;

    if marker.id.is_empty() {
        marker.id = generate_marker_id();
    }
    marker.player_id = player_id.to_owned();
    marker.created_at = now_ms();

    let mut store = state.game.write().await;
    let gs = ensure_state(&mut store, player_id);
    gs.markers.push(marker.clone());
    gs.last_saved = now_ms();
    store.markers.insert(marker.id.clone(), marker.clone());

    info!(%player_id, marker_id = %marker.id, kind = %marker.kind, "marker created");
    Ok(marker)
}

/// Merge updates into a marker the player owns.
pub async fn update_marker(
    state: &AppState,
    player_id: &str,
    marker_id: &str,
    updates: &Value,
) -> Result<Marker, GameStateError> {
    let mut store = state.game.write().await;
    let marker = store
        .markers
        .get_mut(marker_id)
        .filter(|m| m.player_id == player_id)
        .ok_or(GameStateError::MarkerNotOwned)?;

    if let Some(fields) = updates.as_object() {
        for (key, value) in fields {
            apply_marker_field(marker, key, value);
        }
    }
    marker.updated_at = Some(now_ms());
    let updated = marker.clone();

    let gs = ensure_state(&mut store, player_id);
    if let Some(owned) = gs.markers.iter_mut().find(|m| m.id == marker_id) {
        *owned = updated.clone();
    }
    gs.last_saved = now_ms();

    Ok(updated)
}

fn apply_marker_field(marker: &mut Marker, key: &str, value: &Value) {
    match key {
        "type" => {
            if let Some(kind) = value.as_str() {
                marker.kind = kind.to_owned();
            }
        }
        "position" => {
            marker.position = serde_json::from_value(value.clone()).ok();
        }
        "data" => marker.data = value.clone(),
        // Server-owned fields never come from updates.
        "id" | "playerId" | "createdAt" | "updatedAt" => {}
        other => {
            marker.extra.insert(other.to_owned(), value.clone());
        }
    }
}

/// Delete a marker the player owns.
pub async fn delete_marker(
    state: &AppState,
    player_id: &str,
    marker_id: &str,
) -> Result<(), GameStateError> {
    let mut store = state.game.write().await;
    let owned = store
        .markers
        .get(marker_id)
        .is_some_and(|m| m.player_id == player_id);
    if !owned {
        return Err(GameStateError::MarkerNotOwned);
    }
    store.markers.remove(marker_id);

    let gs = ensure_state(&mut store, player_id);
    gs.markers.retain(|m| m.id != marker_id);
    gs.last_saved = now_ms();

    info!(%player_id, %marker_id, "marker deleted");
    Ok(())
}

// =============================================================================
// BASES
// =============================================================================

/// Establish the player's base: records the position and synthesizes a named
/// base marker visible to other players via game-state sync.
pub async fn establish_base(state: &AppState, player_id: &str, position: Position) -> Marker {
    let name = explorer_name(player_id);
    let now = now_ms();
    let marker = Marker {
        id: generate_marker_id(),
        player_id: player_id.to_owned(),
        kind: "base".to_owned(),
        position: Some(position),
        data: serde_json::json!({
            "level": 1,
            "established": true,
            "name": format!("{name}'s Base"),
            "playerName": name,
            "symbol": "🏗️",
        }),
        created_at: now,
        updated_at: None,
        extra: serde_json::Map::new(),
    };

    let mut store = state.game.write().await;
    let gs = ensure_state(&mut store, player_id);
    gs.base_established = true;
    gs.base_position = Some(position);
    gs.markers.push(marker.clone());
    gs.last_saved = now;
    store.markers.insert(marker.id.clone(), marker.clone());

    info!(%player_id, marker_id = %marker.id, "base established");
    marker
}

// =============================================================================
// MILESTONES
// =============================================================================

/// Record a step milestone and build the milestone-specific unlock reply for
/// the sender, if the milestone type has one.
pub async fn record_milestone(
    state: &AppState,
    player_id: &str,
    payload: &MilestonePayload,
) -> Option<Message> {
    {
        let mut store = state.game.write().await;
        let gs = ensure_state(&mut store, player_id);
        gs.milestones.insert(
            payload.milestone_type.clone(),
            MilestoneRecord {
                session_steps: payload.session_steps,
                total_steps: payload.total_steps,
                timestamp: payload.timestamp,
                achieved: true,
            },
        );
        gs.last_saved = now_ms();
    }

    let message = match payload.milestone_type.as_str() {
        "area" => "You have reached 1000 steps! You can now establish a base.",
        "quest" => "Quest system unlocked! You can now access quests.",
        "flag" => "Flag creation enabled! You can now create flags.",
        "celebration" => "Celebration time! You have reached a milestone!",
        _ => return None,
    };

    let unlock = UnlockPayload {
        player_id: player_id.to_owned(),
        total_steps: payload.total_steps,
        timestamp: payload.timestamp,
        message: message.to_owned(),
    };
    Some(match payload.milestone_type.as_str() {
        "area" => Message::BaseEstablishmentAvailable { payload: unlock },
        "quest" => Message::QuestSystemUnlocked { payload: unlock },
        "flag" => Message::FlagCreationEnabled { payload: unlock },
        _ => Message::CelebrationTriggered { payload: unlock },
    })
}

// =============================================================================
// FULL STATE
// =============================================================================

/// The complete game state for one player, with the other players' base
/// markers merged in so every client can render the shared bases.
pub async fn complete_game_state(state: &AppState, player_id: &str) -> Value {
    let mut store = state.game.write().await;
    let mut own = ensure_state(&mut store, player_id).clone();

    let foreign_bases: Vec<Marker> = store
        .players
        .values()
        .filter(|gs| gs.player_id != player_id)
        .flat_map(|gs| gs.markers.iter())
        .filter(|m| m.kind == "base" && m.position.is_some())
        .cloned()
        .collect();
    own.markers.extend(foreign_bases);

    serde_json::to_value(&own).unwrap_or(Value::Null)
}

// =============================================================================
// HELPERS
// =============================================================================

fn generate_marker_id() -> String {
    let mut rng = rand::rng();
    let suffix: u32 = rng.random_range(0..36_u32.pow(6));
    format!("marker_{}_{suffix:06}", now_ms())
}

/// Deterministic display name derived from a player id, used when naming a
/// base for a player that never announced a profile.
#[must_use]
pub fn explorer_name(player_id: &str) -> &'static str {
    const NAMES: [&str; 16] = [
        "Cosmic Explorer",
        "Stellar Wanderer",
        "Lunar Guardian",
        "Solar Seeker",
        "Aurora Walker",
        "Nebula Scout",
        "Galaxy Pioneer",
        "Star Navigator",
        "Cosmic Sage",
        "Celestial Guide",
        "Universal Traveler",
        "Space Explorer",
        "Moon Walker",
        "Sun Seeker",
        "Earth Guardian",
        "Sky Wanderer",
    ];

    let meaningful = player_id.trim_start_matches("player_");
    let meaningful = &meaningful[..meaningful.len().min(8)];
    let mut hash: i32 = 0;
    for byte in meaningful.bytes() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(byte));
    }
    NAMES[hash.unsigned_abs() as usize % NAMES.len()]
}

#[cfg(test)]
#[path = "game_state_test.rs"]
mod tests;
