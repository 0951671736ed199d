//! Shared wire schema for the Wanderlight presence relay.
//!
//! ARCHITECTURE
//! ============
//! Every frame on the `/ws` channel is a JSON object with a `type`
//! discriminator. The protocol grew two shape families over its life: an
//! envelope family that nests everything under `payload`, and a flattened
//! family (`player_join`, `flag_update`, ...) with fields at the top level.
//! Both are first-class variants of the single [`Message`] sum type here, so
//! neither side ever dispatches on raw strings.
//!
//! DESIGN
//! ======
//! - Payload structs rename to camelCase; the wire never sees snake_case
//!   field names.
//! - Opaque passthrough data (markers, player updates, game state) stays
//!   `serde_json::Value` — the relay does not interpret it.
//! - [`decode`] distinguishes malformed JSON, a missing discriminator, an
//!   unknown discriminator, and a known type with a bad payload, so callers
//!   can log each condition precisely and drop the frame.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display name used until a player announces one.
pub const DEFAULT_PLAYER_NAME: &str = "Cosmic Explorer";

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CODEC ERRORS
// =============================================================================

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not valid JSON at all.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The object has no string `type` field.
    #[error("message has no type discriminator")]
    MissingType,
    /// The `type` value is not part of the protocol vocabulary.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// The type is known but its payload did not match the schema.
    #[error("bad payload for `{message_type}`: {source}")]
    Payload {
        message_type: String,
        source: serde_json::Error,
    },
}

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

/// Player profile data carried inside `playerData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
}

/// Flattened-family player data (`player_join`, snapshot entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub timestamp: i64,
}

/// An investigation payload: an id plus uninterpreted passthrough fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Flag marker data, relayed verbatim and never stored server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagData {
    pub lat: f64,
    pub lng: f64,
    pub size: f64,
    pub rotation: f64,
    pub symbol: String,
    pub owner_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub player_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPayload {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub player_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPayload {
    pub player_id: String,
    pub position: Position,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub investigation: Investigation,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub zone_type: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// One row of the `players_snapshot` greeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub player_id: String,
    pub player_data: PlayerData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsPayload {
    pub total_steps: u64,
    pub session_steps: u64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsSyncedPayload {
    pub total_steps: u64,
    pub session_steps: u64,
    pub timestamp: i64,
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestonePayload {
    pub milestone_type: String,
    pub session_steps: u64,
    pub total_steps: u64,
    #[serde(default)]
    pub timestamp: i64,
}

/// Payload shared by the four milestone-unlock replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockPayload {
    pub player_id: String,
    pub total_steps: u64,
    pub timestamp: i64,
    pub message: String,
}

/// `playerData` body of a `player_milestone` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneBroadcast {
    pub name: String,
    pub milestone_type: String,
    pub total_steps: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSyncPayload {
    pub player_id: String,
    pub game_state: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerCreatedPayload {
    pub marker_id: String,
    pub marker: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerUpdatePayload {
    pub marker_id: String,
    pub updates: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerUpdatedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub marker_id: String,
    pub marker: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerDeletePayload {
    pub marker_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerDeletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub marker_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerAddedPayload {
    pub player_id: String,
    pub marker: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseEstablishPayload {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEstablishedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub base_marker: Value,
    pub position: Position,
    pub timestamp: i64,
}

/// Payload of the `*_error` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub timestamp: i64,
}

// =============================================================================
// MESSAGE
// =============================================================================

/// The universal wire message. One variant per `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Server greeting carrying the authoritative player id.
    #[serde(rename = "welcome")]
    Welcome { payload: WelcomePayload },
    #[serde(rename = "playerJoin")]
    PlayerJoin { payload: JoinPayload },
    #[serde(rename = "playerCount")]
    PlayerCount { payload: CountPayload },
    #[serde(rename = "playerLeave")]
    PlayerLeave { payload: LeavePayload },
    #[serde(rename = "players_snapshot")]
    PlayersSnapshot { payload: Vec<SnapshotEntry> },
    #[serde(rename = "positionUpdate")]
    PositionUpdate { payload: PositionPayload },
    #[serde(rename = "investigationStart")]
    InvestigationStart { payload: InvestigationPayload },
    #[serde(rename = "investigationComplete")]
    InvestigationComplete { payload: InvestigationPayload },
    #[serde(rename = "zoneEntry")]
    ZoneEntry { payload: ZonePayload },
    #[serde(rename = "sync_steps")]
    SyncSteps { payload: StepsPayload },
    #[serde(rename = "steps_synced")]
    StepsSynced { payload: StepsSyncedPayload },
    #[serde(rename = "step_milestone")]
    StepMilestone { payload: MilestonePayload },
    #[serde(rename = "base_establishment_available")]
    BaseEstablishmentAvailable { payload: UnlockPayload },
    #[serde(rename = "quest_system_unlocked")]
    QuestSystemUnlocked { payload: UnlockPayload },
    #[serde(rename = "flag_creation_enabled")]
    FlagCreationEnabled { payload: UnlockPayload },
    #[serde(rename = "celebration_triggered")]
    CelebrationTriggered { payload: UnlockPayload },
    #[serde(rename = "request_game_state")]
    RequestGameState {},
    #[serde(rename = "game_state_sync")]
    GameStateSync { payload: GameStateSyncPayload },
    #[serde(rename = "marker_create")]
    MarkerCreate { payload: Value },
    #[serde(rename = "marker_created")]
    MarkerCreated { payload: MarkerCreatedPayload },
    #[serde(rename = "marker_update")]
    MarkerUpdate { payload: MarkerUpdatePayload },
    #[serde(rename = "marker_updated")]
    MarkerUpdated { payload: MarkerUpdatedPayload },
    #[serde(rename = "marker_delete")]
    MarkerDelete { payload: MarkerDeletePayload },
    #[serde(rename = "marker_deleted")]
    MarkerDeleted { payload: MarkerDeletedPayload },
    #[serde(rename = "marker_added")]
    MarkerAdded { payload: MarkerAddedPayload },
    #[serde(rename = "marker_create_error")]
    MarkerCreateError { payload: ErrorPayload },
    #[serde(rename = "marker_update_error")]
    MarkerUpdateError { payload: ErrorPayload },
    #[serde(rename = "marker_delete_error")]
    MarkerDeleteError { payload: ErrorPayload },
    #[serde(rename = "base_establish")]
    BaseEstablish { payload: BaseEstablishPayload },
    #[serde(rename = "base_established")]
    BaseEstablished { payload: BaseEstablishedPayload },
    #[serde(rename = "base_establish_error")]
    BaseEstablishError { payload: ErrorPayload },

    // Flattened family: fields live at the top level of the JSON object.
    #[serde(rename = "player_join", rename_all = "camelCase")]
    PlayerJoinEvent {
        player_id: String,
        player_data: PlayerData,
    },
    #[serde(rename = "player_update", rename_all = "camelCase")]
    PlayerUpdate {
        player_id: String,
        player_data: Value,
    },
    #[serde(rename = "player_milestone", rename_all = "camelCase")]
    PlayerMilestone {
        player_id: String,
        player_data: MilestoneBroadcast,
    },
    #[serde(rename = "flag_update", rename_all = "camelCase")]
    FlagUpdate { flag_id: String, flag_data: FlagData },
    #[serde(rename = "request_flags", rename_all = "camelCase")]
    RequestFlags {
        requester_id: String,
        timestamp: i64,
    },
}

/// Every `type` discriminator in the protocol vocabulary, in wire order.
/// Used by [`decode`] to tell an unknown type from a known type whose
/// payload failed to parse.
pub const KNOWN_TYPES: &[&str] = &[
    "welcome",
    "playerJoin",
    "playerCount",
    "playerLeave",
    "players_snapshot",
    "positionUpdate",
    "investigationStart",
    "investigationComplete",
    "zoneEntry",
    "sync_steps",
    "steps_synced",
    "step_milestone",
    "base_establishment_available",
    "quest_system_unlocked",
    "flag_creation_enabled",
    "celebration_triggered",
    "request_game_state",
    "game_state_sync",
    "marker_create",
    "marker_created",
    "marker_update",
    "marker_updated",
    "marker_delete",
    "marker_deleted",
    "marker_added",
    "marker_create_error",
    "marker_update_error",
    "marker_delete_error",
    "base_establish",
    "base_established",
    "base_establish_error",
    "player_join",
    "player_update",
    "player_milestone",
    "flag_update",
    "request_flags",
];

impl Message {
    /// The wire `type` discriminator of this message.
    #[must_use]
    pub fn wire_type(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(ToOwned::to_owned))
            .unwrap_or_default()
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Decode one JSON text frame into a [`Message`].
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON, [`CodecError::MissingType`]
/// when the `type` field is absent or not a string, [`CodecError::UnknownType`]
/// for a discriminator outside [`KNOWN_TYPES`], and [`CodecError::Payload`]
/// when a known type carries a payload that does not match its schema.
pub fn decode(text: &str) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(tag) = value.get("type").and_then(Value::as_str) else {
        return Err(CodecError::MissingType);
    };
    let tag = tag.to_owned();

    match serde_json::from_value::<Message>(value) {
        Ok(message) => Ok(message),
        Err(source) => {
            if KNOWN_TYPES.contains(&tag.as_str()) {
                Err(CodecError::Payload { message_type: tag, source })
            } else {
                Err(CodecError::UnknownType(tag))
            }
        }
    }
}

/// Encode a [`Message`] as a JSON text frame.
#[must_use]
pub fn encode(message: &Message) -> String {
    // Serialization of these types cannot fail; an empty frame would only
    // appear if serde_json itself broke, and is dropped downstream anyway.
    serde_json::to_string(message).unwrap_or_default()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
