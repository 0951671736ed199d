//! Presence service — roster lifecycle, investigations, and broadcast.
//!
//! DESIGN
//! ======
//! The roster is the authoritative set of connected players. Rows are
//! created when a socket upgrades and removed synchronously with the owning
//! connection; an investigation can never outlive its player. Broadcast is
//! best-effort fan-out over each connection's bounded channel.
//!
//! The idle sweep closes the one lifecycle gap a close event cannot: a peer
//! that vanishes without a close frame is evicted once `lastSeen` falls
//! behind the configured timeout, with the same wire traffic as a clean
//! disconnect.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{info, warn};

use messages::{
    DEFAULT_PLAYER_NAME, Investigation, Message, PlayerData, Position, Profile, SnapshotEntry,
    now_ms,
};

use crate::state::{AppState, InvestigationRow, Player};

const PLAYER_ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const PLAYER_ID_SUFFIX_LEN: usize = 9;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const IDLE_SWEEP_INTERVAL_SECS: u64 = 30;

/// Generate a fresh player id: `player_` plus nine base-36 characters.
#[must_use]
pub fn generate_player_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..PLAYER_ID_SUFFIX_LEN)
        .map(|_| PLAYER_ID_CHARSET[rng.random_range(0..PLAYER_ID_CHARSET.len())] as char)
        .collect();
    format!("player_{suffix}")
}

/// What a new connection is told before anything else happens.
pub struct ConnectGreeting {
    pub player_id: String,
    pub count: u32,
    pub snapshot: Vec<SnapshotEntry>,
}

// =============================================================================
// CONNECT / DISCONNECT
// =============================================================================

/// Register a new connection: assign an id, insert the roster row, and build
/// the greeting. The snapshot contains exactly the players connected strictly
/// before this one, with their last known name and position.
pub async fn connect(state: &AppState, tx: mpsc::Sender<Message>) -> ConnectGreeting {
    let player_id = generate_player_id();
    let now = now_ms();

    let mut roster = state.roster.write().await;
    let snapshot = roster
        .players
        .values()
        .map(|p| SnapshotEntry {
            player_id: p.id.clone(),
            player_data: PlayerData {
                position: p.position,
                profile: Some(Profile { name: p.name.clone() }),
                timestamp: p.last_seen,
            },
        })
        .collect();

    roster.players.insert(
        player_id.clone(),
        Player {
            id: player_id.clone(),
            name: DEFAULT_PLAYER_NAME.to_owned(),
            position: None,
            investigation: None,
            connected_at: now,
            last_seen: now,
        },
    );
    roster.clients.insert(player_id.clone(), tx);
    let count = player_count(roster.players.len());

    ConnectGreeting { player_id, count, snapshot }
}

/// Remove a player and any investigation it owns. Returns the new player
/// count, or `None` if the player was already gone (idempotent — the idle
/// sweep and the close handler can race).
///
/// Both locks are taken before either row is touched, so no reader can
/// observe an investigation whose player has already left the roster.
pub async fn disconnect(state: &AppState, player_id: &str) -> Option<u32> {
    let mut roster = state.roster.write().await;
    let mut investigations = state.investigations.write().await;

    roster.clients.remove(player_id);
    let player = roster.players.remove(player_id)?;
    if let Some(investigation) = &player.investigation {
        investigations.remove(&investigation.id);
    }
    state.rate_limiter.forget(player_id);

    Some(player_count(roster.players.len()))
}

// =============================================================================
// ROW UPDATES
// =============================================================================

/// Apply a join announcement. Returns the current player count.
pub async fn join(
    state: &AppState,
    player_id: &str,
    name: Option<&str>,
    position: Option<Position>,
) -> u32 {
    let mut roster = state.roster.write().await;
    if let Some(player) = roster.players.get_mut(player_id) {
        if let Some(name) = name {
            player.name = name.to_owned();
        }
        if position.is_some() {
            player.position = position;
        }
        player.last_seen = now_ms();
    }
    player_count(roster.players.len())
}

/// Record a position update. Returns `false` when the player is unknown.
pub async fn update_position(state: &AppState, player_id: &str, position: Position) -> bool {
    let mut roster = state.roster.write().await;
    let Some(player) = roster.players.get_mut(player_id) else {
        return false;
    };
    player.position = Some(position);
    player.last_seen = now_ms();
    true
}

/// Start an investigation for a player. At most one per player: a restart
/// replaces the previous row.
pub async fn start_investigation(
    state: &AppState,
    player_id: &str,
    investigation: Investigation,
) -> bool {
    let now = now_ms();
    {
        let mut roster = state.roster.write().await;
        let Some(player) = roster.players.get_mut(player_id) else {
            return false;
        };
        if let Some(previous) = player.investigation.replace(investigation.clone()) {
            if previous.id != investigation.id {
                let mut investigations = state.investigations.write().await;
                investigations.remove(&previous.id);
            }
        }
        player.last_seen = now;
    }

    let mut investigations = state.investigations.write().await;
    investigations.insert(
        investigation.id.clone(),
        InvestigationRow { investigation, player_id: player_id.to_owned(), start_time: now },
    );
    true
}

/// Complete (clear) a player's investigation.
pub async fn complete_investigation(state: &AppState, player_id: &str, investigation_id: &str) -> bool {
    {
        let mut roster = state.roster.write().await;
        let Some(player) = roster.players.get_mut(player_id) else {
            return false;
        };
        player.investigation = None;
        player.last_seen = now_ms();
    }
    let mut investigations = state.investigations.write().await;
    investigations.remove(investigation_id);
    true
}

/// Touch `lastSeen` without any other state change (zone entries).
pub async fn touch(state: &AppState, player_id: &str) -> bool {
    let mut roster = state.roster.write().await;
    let Some(player) = roster.players.get_mut(player_id) else {
        return false;
    };
    player.last_seen = now_ms();
    true
}

/// Display name of a connected player, or the default placeholder.
pub async fn player_name(state: &AppState, player_id: &str) -> String {
    let roster = state.roster.read().await;
    roster
        .players
        .get(player_id)
        .map_or_else(|| DEFAULT_PLAYER_NAME.to_owned(), |p| p.name.clone())
}

// =============================================================================
// INSPECTION
// =============================================================================

pub async fn players(state: &AppState) -> Vec<Player> {
    let roster = state.roster.read().await;
    roster.players.values().cloned().collect()
}

pub async fn investigations(state: &AppState) -> Vec<InvestigationRow> {
    let investigations = state.investigations.read().await;
    investigations.values().cloned().collect()
}

pub async fn counts(state: &AppState) -> (usize, usize) {
    let players = state.roster.read().await.players.len();
    let investigations = state.investigations.read().await.len();
    (players, investigations)
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Send a message to every connected player.
pub async fn broadcast_to_all(state: &AppState, message: &Message) {
    fan_out(state, message, None).await;
}

/// Send a message to every connected player except the origin.
pub async fn broadcast_to_others(state: &AppState, origin_id: &str, message: &Message) {
    fan_out(state, message, Some(origin_id)).await;
}

async fn fan_out(state: &AppState, message: &Message, exclude: Option<&str>) {
    let roster = state.roster.read().await;
    for (player_id, tx) in &roster.clients {
        if exclude == Some(player_id.as_str()) {
            continue;
        }
        // Best-effort: a full or closed channel drops this recipient only.
        if let Err(e) = tx.try_send(message.clone()) {
            warn!(%player_id, error = %e, "broadcast send failed");
        }
    }
}

// =============================================================================
// IDLE SWEEP
// =============================================================================

/// Spawn the idle-eviction task. Players whose `lastSeen` is older than
/// `PRESENCE_IDLE_TIMEOUT_SECS` (default 300, `0` disables) are removed with
/// the same `playerLeave` + count traffic as a clean disconnect.
pub fn spawn_idle_sweep(state: AppState) -> Option<tokio::task::JoinHandle<()>> {
    let timeout_secs: u64 = std::env::var("PRESENCE_IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        info!("idle sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(IDLE_SWEEP_INTERVAL_SECS));
        loop {
            tick.tick().await;
            sweep_idle(&state, timeout_secs).await;
        }
    }))
}

/// One eviction pass. Separated from the task loop for tests.
pub async fn sweep_idle(state: &AppState, timeout_secs: u64) {
    let cutoff =
        now_ms().saturating_sub(i64::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX));
    let stale: Vec<String> = {
        let roster = state.roster.read().await;
        roster
            .players
            .values()
            .filter(|p| p.last_seen < cutoff)
            .map(|p| p.id.clone())
            .collect()
    };

    for player_id in stale {
        let Some(count) = disconnect(state, &player_id).await else {
            continue;
        };
        info!(%player_id, "evicted idle player");
        let leave = Message::PlayerLeave {
            payload: messages::LeavePayload { player_id: player_id.clone(), timestamp: now_ms() },
        };
        broadcast_to_all(state, &leave).await;
        broadcast_to_all(
            state,
            &Message::PlayerCount { payload: messages::CountPayload { count } },
        )
        .await;
    }
}

fn player_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
