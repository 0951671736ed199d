//! WebSocket handler — presence relay fan-out.
//!
//! DESIGN
//! ======
//! On upgrade the server assigns a player id and enters a `select!` loop:
//! - Incoming client frames → decode + rate limit + dispatch by message type
//! - Broadcast messages from peers → forward to this client
//!
//! Dispatch returns the sender-bound replies as a `Vec<Message>` and performs
//! peer broadcasts through the presence service, so frame handling can be
//! exercised in tests without a socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → insert roster row → send `welcome`, `playerCount`,
//!    `players_snapshot` (in that order)
//! 2. Broadcast `player_join` to others, updated count to everyone
//! 3. Client frames → dispatch (malformed, unknown, and rate-limited frames
//!    are dropped silently)
//! 4. Close (any code) → remove player + investigation, broadcast
//!    `playerLeave` and the new count

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use messages::{
    CodecError, CountPayload, InvestigationPayload, LeavePayload, Message, PlayerData,
    PositionPayload, Profile, WelcomePayload, ZonePayload, now_ms,
};

use crate::services::{game_state, presence};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    // Per-connection channel for receiving broadcast messages from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Message>(256);

    let greeting = presence::connect(&state, client_tx).await;
    let player_id = greeting.player_id.clone();

    let greet = [
        Message::Welcome {
            payload: WelcomePayload { player_id: player_id.clone(), timestamp: now_ms() },
        },
        Message::PlayerCount { payload: CountPayload { count: greeting.count } },
        Message::PlayersSnapshot { payload: greeting.snapshot },
    ];
    for message in greet {
        if send_message(&mut socket, &player_id, &message).await.is_err() {
            finish(&state, &player_id).await;
            return;
        }
    }
    info!(%player_id, count = greeting.count, "ws: player connected");

    // Tell everyone else about the newcomer.
    presence::broadcast_to_others(&state, &player_id, &join_broadcast(&state, &player_id).await)
        .await;
    presence::broadcast_to_all(
        &state,
        &Message::PlayerCount { payload: CountPayload { count: greeting.count } },
    )
    .await;

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    WsMessage::Text(text) => {
                        let replies = process_inbound_text(&state, &player_id, text.as_str()).await;
                        let mut failed = false;
                        for message in replies {
                            if send_message(&mut socket, &player_id, &message).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = client_rx.recv() => {
                if send_message(&mut socket, &player_id, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    finish(&state, &player_id).await;
    info!(%player_id, "ws: player disconnected");
}

/// Remove the player and tell the remaining clients, if it was still present
/// (the idle sweep may have evicted it first).
async fn finish(state: &AppState, player_id: &str) {
    let Some(count) = presence::disconnect(state, player_id).await else {
        return;
    };
    presence::broadcast_to_all(
        state,
        &Message::PlayerLeave {
            payload: LeavePayload { player_id: player_id.to_owned(), timestamp: now_ms() },
        },
    )
    .await;
    presence::broadcast_to_all(state, &Message::PlayerCount { payload: CountPayload { count } })
        .await;
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode, rate-limit, and dispatch one inbound text frame. Returns the
/// messages owed to the sender; peer broadcasts happen inside.
///
/// Malformed JSON is dropped before the rate limiter; anything that parsed,
/// including unknown or mis-shaped types, counts against the window.
pub async fn process_inbound_text(state: &AppState, player_id: &str, text: &str) -> Vec<Message> {
    let decoded = match messages::decode(text) {
        Ok(message) => Ok(message),
        Err(e @ CodecError::Json(_)) => {
            warn!(%player_id, error = %e, "ws: dropping undecodable frame");
            return Vec::new();
        }
        Err(e) => Err(e),
    };

    if let Err(e) = state.rate_limiter.check_and_record(player_id) {
        debug!(%player_id, error = %e, "ws: rate limited, dropping frame");
        return Vec::new();
    }

    match decoded {
        Ok(message) => dispatch(state, player_id, message).await,
        Err(e) => {
            info!(%player_id, error = %e, "ws: ignoring unhandled frame");
            Vec::new()
        }
    }
}

async fn dispatch(state: &AppState, player_id: &str, message: Message) -> Vec<Message> {
    match message {
        Message::PlayerJoin { payload } => {
            handle_join(state, player_id, payload.name.as_deref(), payload.position).await
        }
        Message::PlayerJoinEvent { player_data, .. } => {
            let name = player_data.profile.as_ref().map(|p| p.name.clone());
            handle_join(state, player_id, name.as_deref(), player_data.position).await
        }
        Message::PlayerUpdate { player_data, .. } => {
            // Relayed verbatim; the server holds no state for these.
            presence::broadcast_to_others(
                state,
                player_id,
                &Message::PlayerUpdate { player_id: player_id.to_owned(), player_data },
            )
            .await;
            Vec::new()
        }
        Message::PositionUpdate { payload } => {
            if presence::update_position(state, player_id, payload.position).await {
                game_state::update_position(state, player_id, payload.position).await;
                presence::broadcast_to_others(
                    state,
                    player_id,
                    &Message::PositionUpdate {
                        payload: PositionPayload {
                            player_id: player_id.to_owned(),
                            position: payload.position,
                            timestamp: now_ms(),
                        },
                    },
                )
                .await;
            }
            Vec::new()
        }
        Message::InvestigationStart { payload } => {
            let investigation = payload.investigation;
            if presence::start_investigation(state, player_id, investigation.clone()).await {
                presence::broadcast_to_others(
                    state,
                    player_id,
                    &Message::InvestigationStart {
                        payload: InvestigationPayload {
                            player_id: Some(player_id.to_owned()),
                            investigation,
                            timestamp: now_ms(),
                        },
                    },
                )
                .await;
            }
            Vec::new()
        }
        Message::InvestigationComplete { payload } => {
            let investigation = payload.investigation;
            if presence::complete_investigation(state, player_id, &investigation.id).await {
                presence::broadcast_to_others(
                    state,
                    player_id,
                    &Message::InvestigationComplete {
                        payload: InvestigationPayload {
                            player_id: Some(player_id.to_owned()),
                            investigation,
                            timestamp: now_ms(),
                        },
                    },
                )
                .await;
            }
            Vec::new()
        }
        Message::ZoneEntry { payload } => {
            if presence::touch(state, player_id).await {
                presence::broadcast_to_others(
                    state,
                    player_id,
                    &Message::ZoneEntry {
                        payload: ZonePayload {
                            player_id: Some(player_id.to_owned()),
                            zone_type: payload.zone_type,
                            timestamp: now_ms(),
                        },
                    },
                )
                .await;
            }
            Vec::new()
        }
        Message::FlagUpdate { flag_id, flag_data } => {
            presence::broadcast_to_others(
                state,
                player_id,
                &Message::FlagUpdate { flag_id, flag_data },
            )
            .await;
            Vec::new()
        }
        Message::RequestFlags { .. } => {
            presence::broadcast_to_others(
                state,
                player_id,
                &Message::RequestFlags {
                    requester_id: player_id.to_owned(),
                    timestamp: now_ms(),
                },
            )
            .await;
            Vec::new()
        }
        Message::SyncSteps { payload } => {
            game_state::sync_steps(state, player_id, payload.total_steps, payload.session_steps)
                .await;
            vec![Message::StepsSynced {
                payload: messages::StepsSyncedPayload {
                    total_steps: payload.total_steps,
                    session_steps: payload.session_steps,
                    timestamp: now_ms(),
                    validated: true,
                },
            }]
        }
        Message::StepMilestone { payload } => {
            let unlock = game_state::record_milestone(state, player_id, &payload).await;
            let name = presence::player_name(state, player_id).await;
            presence::broadcast_to_others(
                state,
                player_id,
                &Message::PlayerMilestone {
                    player_id: player_id.to_owned(),
                    player_data: messages::MilestoneBroadcast {
                        name,
                        milestone_type: payload.milestone_type,
                        total_steps: payload.total_steps,
                        timestamp: payload.timestamp,
                    },
                },
            )
            .await;
            unlock.into_iter().collect()
        }
        Message::RequestGameState {} => {
            let game_state = game_state::complete_game_state(state, player_id).await;
            vec![Message::GameStateSync {
                payload: messages::GameStateSyncPayload {
                    player_id: player_id.to_owned(),
                    game_state,
                    timestamp: now_ms(),
                },
            }]
        }
        Message::MarkerCreate { payload } => match game_state::create_marker(state, player_id, payload).await {
            Ok(marker) => {
                let marker_value = serde_json::to_value(&marker).unwrap_or_default();
                presence::broadcast_to_others(
                    state,
                    player_id,
                    &Message::MarkerAdded {
                        payload: messages::MarkerAddedPayload {
                            player_id: player_id.to_owned(),
                            marker: marker_value.clone(),
                            timestamp: now_ms(),
                        },
                    },
                )
                .await;
                vec![Message::MarkerCreated {
                    payload: messages::MarkerCreatedPayload {
                        marker_id: marker.id,
                        marker: marker_value,
                        timestamp: now_ms(),
                    },
                }]
            }
            Err(e) => vec![Message::MarkerCreateError {
                payload: messages::ErrorPayload { error: e.to_string(), timestamp: now_ms() },
            }],
        },
        Message::MarkerUpdate { payload } => {
            match game_state::update_marker(state, player_id, &payload.marker_id, &payload.updates)
                .await
            {
                Ok(marker) => {
                    let marker_value = serde_json::to_value(&marker).unwrap_or_default();
                    presence::broadcast_to_others(
                        state,
                        player_id,
                        &Message::MarkerUpdated {
                            payload: messages::MarkerUpdatedPayload {
                                player_id: Some(player_id.to_owned()),
                                marker_id: payload.marker_id.clone(),
                                marker: marker_value.clone(),
                                timestamp: now_ms(),
                            },
                        },
                    )
                    .await;
                    vec![Message::MarkerUpdated {
                        payload: messages::MarkerUpdatedPayload {
                            player_id: None,
                            marker_id: payload.marker_id,
                            marker: marker_value,
                            timestamp: now_ms(),
                        },
                    }]
                }
                Err(e) => vec![Message::MarkerUpdateError {
                    payload: messages::ErrorPayload { error: e.to_string(), timestamp: now_ms() },
                }],
            }
        }
        Message::MarkerDelete { payload } => {
            match game_state::delete_marker(state, player_id, &payload.marker_id).await {
                Ok(()) => {
                    presence::broadcast_to_others(
                        state,
                        player_id,
                        &Message::MarkerDeleted {
                            payload: messages::MarkerDeletedPayload {
                                player_id: Some(player_id.to_owned()),
                                marker_id: payload.marker_id.clone(),
                                timestamp: now_ms(),
                            },
                        },
                    )
                    .await;
                    vec![Message::MarkerDeleted {
                        payload: messages::MarkerDeletedPayload {
                            player_id: None,
                            marker_id: payload.marker_id,
                            timestamp: now_ms(),
                        },
                    }]
                }
                Err(e) => vec![Message::MarkerDeleteError {
                    payload: messages::ErrorPayload { error: e.to_string(), timestamp: now_ms() },
                }],
            }
        }
        Message::BaseEstablish { payload } => {
            let marker = game_state::establish_base(state, player_id, payload.position).await;
            let marker_value = serde_json::to_value(&marker).unwrap_or_default();
            presence::broadcast_to_others(
                state,
                player_id,
                &Message::BaseEstablished {
                    payload: messages::BaseEstablishedPayload {
                        player_id: Some(player_id.to_owned()),
                        base_marker: marker_value.clone(),
                        position: payload.position,
                        timestamp: now_ms(),
                    },
                },
            )
            .await;
            vec![Message::BaseEstablished {
                payload: messages::BaseEstablishedPayload {
                    player_id: None,
                    base_marker: marker_value,
                    position: payload.position,
                    timestamp: now_ms(),
                },
            }]
        }
        // Server-to-client vocabulary arriving inbound is known but
        // meaningless here; drop it like the original did.
        other => {
            debug!(%player_id, message_type = %other.wire_type(), "ws: ignoring server-bound message");
            Vec::new()
        }
    }
}

async fn handle_join(
    state: &AppState,
    player_id: &str,
    name: Option<&str>,
    position: Option<messages::Position>,
) -> Vec<Message> {
    let count = presence::join(state, player_id, name, position).await;
    presence::broadcast_to_others(state, player_id, &join_broadcast(state, player_id).await).await;
    presence::broadcast_to_all(state, &Message::PlayerCount { payload: CountPayload { count } })
        .await;
    Vec::new()
}

/// The flattened `player_join` event describing a player's current row.
async fn join_broadcast(state: &AppState, player_id: &str) -> Message {
    let (name, position) = {
        let roster = state.roster.read().await;
        roster.players.get(player_id).map_or_else(
            || (messages::DEFAULT_PLAYER_NAME.to_owned(), None),
            |p| (p.name.clone(), p.position),
        )
    };
    Message::PlayerJoinEvent {
        player_id: player_id.to_owned(),
        player_data: PlayerData {
            position,
            profile: Some(Profile { name }),
            timestamp: now_ms(),
        },
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(
    socket: &mut WebSocket,
    player_id: &str,
    message: &Message,
) -> Result<(), ()> {
    let json = messages::encode(message);
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| {
            warn!(%player_id, error = %e, "ws: send failed");
        })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
