//! Presence client — websocket lifecycle, roster mirror, and event sink.
//!
//! DESIGN
//! ======
//! One task owns the connection and runs [`PresenceClient::run`]: connect,
//! announce, then `select!` over inbound frames and locally issued commands.
//! Commands arrive over an mpsc channel from a clonable [`PresenceHandle`],
//! so consumers never touch the socket. Inbound frames go through
//! [`PresenceClient::handle_message`], which is synchronous over client state
//! and returns the outbound replies, so dispatch is testable without a
//! socket.
//!
//! Every observed event is pushed through a single [`PresenceSink`] seam. The
//! default method bodies ignore everything; a richer consumer overrides what
//! it renders and is injected at construction, never discovered through
//! globals.
//!
//! LIFECYCLE
//! =========
//! `Disconnected → Connecting → Connected → (Disconnected | Reconnecting)`,
//! with a terminal `Error` once the reconnect ladder is exhausted. A close
//! with code 1000 ends the run loop without reconnecting.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use messages::{
    DEFAULT_PLAYER_NAME, FlagData, Investigation, InvestigationPayload, JoinPayload, Message,
    Position, PositionPayload, StepsPayload, ZonePayload, now_ms,
};

use crate::flags::FlagLedger;
use crate::reconnect::ReconnectPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

const PLAYER_ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}

/// Connection lifecycle, with the labels the UI layer shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting | Self::Reconnecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Error => "Connection Error",
        }
    }
}

/// Local mirror of another connected player.
#[derive(Debug, Clone)]
pub struct OtherPlayer {
    pub id: String,
    pub name: String,
    pub position: Option<Position>,
    pub investigation: Option<Investigation>,
    pub last_seen: i64,
}

/// The single message-sink seam. The transport pushes every observed event
/// through this trait; default bodies drop everything so a consumer overrides
/// only what it renders.
pub trait PresenceSink: Send {
    fn on_connection_change(&mut self, _status: ConnectionStatus) {}
    fn on_player_count(&mut self, _count: u32) {}
    fn on_player_update(&mut self, _player: &OtherPlayer) {}
    fn on_player_leave(&mut self, _player_id: &str) {}
    fn on_investigation_update(&mut self, _player_id: &str, _investigation: Option<&Investigation>) {}
    fn on_zone_entry(&mut self, _player_id: &str, _zone_type: &str) {}
    fn on_unlock(&mut self, _message: &str) {}
    fn on_game_state(&mut self, _game_state: &Value) {}
}

/// Sink that ignores every event; for transports used purely to send.
pub struct NullSink;

impl PresenceSink for NullSink {}

// =============================================================================
// CONFIG / COMMANDS
// =============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub name: String,
    pub position: Option<Position>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            name: DEFAULT_PLAYER_NAME.to_owned(),
            position: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// Derive the websocket URL from the relay's HTTP base URL.
///
/// # Errors
///
/// Returns [`ClientError::InvalidBaseUrl`] when the scheme is neither
/// `http://` nor `https://`.
pub fn ws_url(base_url: &str) -> Result<String, ClientError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }
    Err(ClientError::InvalidBaseUrl(base_url.to_owned()))
}

/// A locally issued operation, forwarded to the connection task.
#[derive(Debug)]
pub enum Command {
    PositionUpdate(Position),
    InvestigationStart(Investigation),
    InvestigationComplete(Investigation),
    ZoneEntry(String),
    PlaceFlag(FlagData),
    RequestFlags,
    CreateMarker(Value),
    UpdateMarker { marker_id: String, updates: Value },
    DeleteMarker { marker_id: String },
    EstablishBase(Position),
    SyncSteps { total_steps: u64, session_steps: u64 },
    RequestGameState,
    Disconnect,
}

/// Clonable sending side of the client. Operations are no-ops while the
/// connection is down, except marker creation, which is queued and flushed
/// on (re)connect.
#[derive(Clone)]
pub struct PresenceHandle {
    tx: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
}

impl PresenceHandle {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn submit(&self, command: Command) {
        if !self.is_connected() {
            debug!(?command, "not connected, dropping command");
            return;
        }
        self.submit_always(command);
    }

    fn submit_always(&self, command: Command) {
        if let Err(e) = self.tx.try_send(command) {
            debug!(error = %e, "command channel full or closed");
        }
    }

    pub fn send_position_update(&self, position: Position) {
        self.submit(Command::PositionUpdate(position));
    }

    pub fn send_investigation_start(&self, investigation: Investigation) {
        self.submit(Command::InvestigationStart(investigation));
    }

    pub fn send_investigation_complete(&self, investigation: Investigation) {
        self.submit(Command::InvestigationComplete(investigation));
    }

    pub fn send_zone_entry(&self, zone_type: impl Into<String>) {
        self.submit(Command::ZoneEntry(zone_type.into()));
    }

    pub fn place_flag(&self, flag: FlagData) {
        self.submit(Command::PlaceFlag(flag));
    }

    pub fn request_flags(&self) {
        self.submit(Command::RequestFlags);
    }

    /// Queued while disconnected and flushed on the next connect.
    pub fn create_marker(&self, marker: Value) {
        self.submit_always(Command::CreateMarker(marker));
    }

    pub fn update_marker(&self, marker_id: impl Into<String>, updates: Value) {
        self.submit(Command::UpdateMarker { marker_id: marker_id.into(), updates });
    }

    pub fn delete_marker(&self, marker_id: impl Into<String>) {
        self.submit(Command::DeleteMarker { marker_id: marker_id.into() });
    }

    pub fn establish_base(&self, position: Position) {
        self.submit(Command::EstablishBase(position));
    }

    pub fn sync_steps(&self, total_steps: u64, session_steps: u64) {
        self.submit(Command::SyncSteps { total_steps, session_steps });
    }

    pub fn request_game_state(&self) {
        self.submit(Command::RequestGameState);
    }

    /// Ask the connection task to close cleanly (code 1000, no reconnect).
    pub fn disconnect(&self) {
        self.submit_always(Command::Disconnect);
    }
}

// =============================================================================
// CLIENT
// =============================================================================

enum SessionEnd {
    /// Clean shutdown; do not reconnect.
    Closed,
    /// The link dropped; eligible for reconnect.
    Dropped,
}

pub struct PresenceClient {
    config: ClientConfig,
    player_id: String,
    status: ConnectionStatus,
    other_players: HashMap<String, OtherPlayer>,
    flags: FlagLedger,
    pending_markers: Vec<Value>,
    policy: ReconnectPolicy,
    sink: Box<dyn PresenceSink>,
    commands: mpsc::Receiver<Command>,
    connected_flag: Arc<AtomicBool>,
}

impl PresenceClient {
    #[must_use]
    pub fn new(config: ClientConfig, sink: Box<dyn PresenceSink>) -> (Self, PresenceHandle) {
        let (tx, commands) = mpsc::channel(64);
        let connected_flag = Arc::new(AtomicBool::new(false));
        let handle = PresenceHandle { tx, connected: Arc::clone(&connected_flag) };
        let client = Self {
            config,
            // Provisional until the server's welcome delivers the real one.
            player_id: generate_local_id(),
            status: ConnectionStatus::Disconnected,
            other_players: HashMap::new(),
            flags: FlagLedger::new(),
            pending_markers: Vec::new(),
            policy: ReconnectPolicy::new(),
            sink,
            commands,
            connected_flag,
        };
        (client, handle)
    }

    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Current mirror of the other connected players.
    #[must_use]
    pub fn other_players(&self) -> Vec<OtherPlayer> {
        self.other_players.values().cloned().collect()
    }

    #[must_use]
    pub fn flags(&self) -> &FlagLedger {
        &self.flags
    }

    /// Run the connection loop until a clean disconnect or until the
    /// reconnect ladder is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] up front, or
    /// [`ClientError::ReconnectExhausted`] after five failed reconnects.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let url = ws_url(&self.config.base_url)?;
        self.set_status(ConnectionStatus::Connecting);

        loop {
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    self.policy.reset();
                    self.set_status(ConnectionStatus::Connected);
                    info!(%url, player_id = %self.player_id, "ws: connected");

                    let end = self.drive(stream).await;
                    self.connected_flag.store(false, Ordering::SeqCst);
                    self.set_status(ConnectionStatus::Disconnected);
                    if matches!(end, SessionEnd::Closed) {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "ws: connect failed");
                }
            }

            let Some(delay) = self.policy.next_delay() else {
                info!("ws: max reconnection attempts reached");
                self.set_status(ConnectionStatus::Error);
                return Err(ClientError::ReconnectExhausted);
            };
            info!(
                attempt = self.policy.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "ws: reconnecting"
            );
            self.set_status(ConnectionStatus::Reconnecting);
            if self.wait_backoff(delay).await {
                self.set_status(ConnectionStatus::Disconnected);
                return Ok(());
            }
        }
    }

    /// One connected session. Returns how it ended.
    async fn drive(&mut self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();
        self.connected_flag.store(true, Ordering::SeqCst);

        if send_ws(&mut write, &self.join_message()).await.is_err() {
            return SessionEnd::Dropped;
        }
        for payload in std::mem::take(&mut self.pending_markers) {
            if send_ws(&mut write, &Message::MarkerCreate { payload }).await.is_err() {
                return SessionEnd::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        None => return SessionEnd::Dropped,
                        Some(Err(e)) => {
                            warn!(error = %e, "ws: stream error");
                            return SessionEnd::Dropped;
                        }
                        Some(Ok(WsMessage::Text(text))) => {
                            let replies = match messages::decode(text.as_str()) {
                                Ok(message) => self.handle_message(message),
                                Err(e) => {
                                    warn!(error = %e, "ws: dropping undecodable frame");
                                    Vec::new()
                                }
                            };
                            for reply in replies {
                                if send_ws(&mut write, &reply).await.is_err() {
                                    return SessionEnd::Dropped;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                            return if normal { SessionEnd::Closed } else { SessionEnd::Dropped };
                        }
                        Some(Ok(_)) => {}
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone; nothing can reach us anymore.
                        return SessionEnd::Closed;
                    };
                    if matches!(command, Command::Disconnect) {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnecting".into(),
                        };
                        let _ = write.send(WsMessage::Close(Some(frame))).await;
                        return SessionEnd::Closed;
                    }
                    if let Some(message) = self.outbound(command) {
                        if send_ws(&mut write, &message).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                }
            }
        }
    }

    /// Sleep out a backoff delay while still honoring commands. Returns true
    /// when a disconnect was requested.
    async fn wait_backoff(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return false,
                command = self.commands.recv() => match command {
                    None | Some(Command::Disconnect) => return true,
                    Some(Command::CreateMarker(payload)) => self.pending_markers.push(payload),
                    Some(command) => debug!(?command, "not connected, dropping command"),
                }
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.sink.on_connection_change(status);
        }
    }

    fn join_message(&self) -> Message {
        Message::PlayerJoin {
            payload: JoinPayload {
                player_id: Some(self.player_id.clone()),
                name: Some(self.config.name.clone()),
                position: self.config.position,
                timestamp: now_ms(),
            },
        }
    }

    // =========================================================================
    // INBOUND DISPATCH
    // =========================================================================

    /// Apply one inbound message to local state and the sink. Returns the
    /// messages to send back (flag re-broadcasts).
    pub fn handle_message(&mut self, message: Message) -> Vec<Message> {
        match message {
            Message::Welcome { payload } => {
                if payload.player_id != self.player_id {
                    info!(
                        provisional = %self.player_id,
                        assigned = %payload.player_id,
                        "adopting server-assigned player id"
                    );
                    self.player_id = payload.player_id;
                }
            }
            Message::PlayerCount { payload } => {
                self.sink.on_player_count(payload.count);
            }
            Message::PlayersSnapshot { payload } => {
                for entry in payload {
                    let name = entry
                        .player_data
                        .profile
                        .map(|p| p.name)
                        .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_owned());
                    self.upsert_player(
                        &entry.player_id,
                        name,
                        entry.player_data.position,
                        entry.player_data.timestamp,
                    );
                }
            }
            Message::PlayerJoin { payload } => {
                if let Some(player_id) = payload.player_id {
                    let name = payload.name.unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_owned());
                    self.upsert_player(&player_id, name, payload.position, payload.timestamp);
                }
            }
            Message::PlayerJoinEvent { player_id, player_data } => {
                let name = player_data
                    .profile
                    .map(|p| p.name)
                    .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_owned());
                self.upsert_player(&player_id, name, player_data.position, player_data.timestamp);
            }
            Message::PlayerLeave { payload } => {
                self.other_players.remove(&payload.player_id);
                self.sink.on_player_leave(&payload.player_id);
            }
            Message::PositionUpdate { payload } => {
                self.apply_position(&payload);
            }
            Message::InvestigationStart { payload } => {
                self.apply_investigation(&payload.player_id, Some(payload.investigation));
            }
            Message::InvestigationComplete { payload } => {
                self.apply_investigation(&payload.player_id, None);
            }
            Message::ZoneEntry { payload } => {
                let player_id = payload.player_id.unwrap_or_default();
                self.sink.on_zone_entry(&player_id, &payload.zone_type);
            }
            Message::FlagUpdate { flag_id, flag_data } => {
                self.flags.apply(&flag_id, flag_data);
            }
            Message::RequestFlags { requester_id, .. } => {
                if requester_id != self.player_id {
                    return self.flags.rebroadcast(&self.player_id);
                }
            }
            Message::BaseEstablishmentAvailable { payload }
            | Message::QuestSystemUnlocked { payload }
            | Message::FlagCreationEnabled { payload }
            | Message::CelebrationTriggered { payload } => {
                self.sink.on_unlock(&payload.message);
            }
            Message::GameStateSync { payload } => {
                self.sink.on_game_state(&payload.game_state);
            }
            Message::StepsSynced { payload } => {
                debug!(total_steps = payload.total_steps, "steps acknowledged");
            }
            Message::MarkerAdded { payload } => {
                if payload.player_id != self.player_id {
                    debug!(player_id = %payload.player_id, "peer added a marker");
                }
            }
            Message::MarkerCreated { .. }
            | Message::MarkerUpdated { .. }
            | Message::MarkerDeleted { .. }
            | Message::BaseEstablished { .. } => {
                // Already applied locally; the ack is informational.
            }
            Message::MarkerCreateError { payload }
            | Message::MarkerUpdateError { payload }
            | Message::MarkerDeleteError { payload }
            | Message::BaseEstablishError { payload } => {
                warn!(error = %payload.error, "server rejected a request");
            }
            other => {
                debug!(message_type = %other.wire_type(), "ignoring message");
            }
        }
        Vec::new()
    }

    fn upsert_player(&mut self, player_id: &str, name: String, position: Option<Position>, timestamp: i64) {
        if player_id == self.player_id {
            return;
        }
        let last_seen = if timestamp > 0 { timestamp } else { now_ms() };
        let player = match self.other_players.entry(player_id.to_owned()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let player = entry.get_mut();
                player.name = name;
                if position.is_some() {
                    player.position = position;
                }
                player.last_seen = last_seen;
                player.clone()
            }
            std::collections::hash_map::Entry::Vacant(entry) => entry
                .insert(OtherPlayer {
                    id: player_id.to_owned(),
                    name,
                    position,
                    investigation: None,
                    last_seen,
                })
                .clone(),
        };
        self.sink.on_player_update(&player);
    }

    fn apply_position(&mut self, payload: &PositionPayload) {
        if payload.player_id == self.player_id {
            return;
        }
        let Some(player) = self.other_players.get_mut(&payload.player_id) else {
            return;
        };
        player.position = Some(payload.position);
        player.last_seen = if payload.timestamp > 0 { payload.timestamp } else { now_ms() };
        let player = player.clone();
        self.sink.on_player_update(&player);
    }

    fn apply_investigation(&mut self, player_id: &Option<String>, investigation: Option<Investigation>) {
        let Some(player_id) = player_id else { return };
        if *player_id == self.player_id {
            return;
        }
        if let Some(player) = self.other_players.get_mut(player_id) {
            player.investigation = investigation;
            let investigation = player.investigation.clone();
            self.sink.on_investigation_update(player_id, investigation.as_ref());
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Build the wire message for a command, stamping identity and time.
    fn outbound(&mut self, command: Command) -> Option<Message> {
        let timestamp = now_ms();
        match command {
            Command::PositionUpdate(position) => Some(Message::PositionUpdate {
                payload: PositionPayload {
                    player_id: self.player_id.clone(),
                    position,
                    timestamp,
                },
            }),
            Command::InvestigationStart(investigation) => Some(Message::InvestigationStart {
                payload: InvestigationPayload {
                    player_id: Some(self.player_id.clone()),
                    investigation,
                    timestamp,
                },
            }),
            Command::InvestigationComplete(investigation) => {
                Some(Message::InvestigationComplete {
                    payload: InvestigationPayload {
                        player_id: Some(self.player_id.clone()),
                        investigation,
                        timestamp,
                    },
                })
            }
            Command::ZoneEntry(zone_type) => Some(Message::ZoneEntry {
                payload: ZonePayload {
                    player_id: Some(self.player_id.clone()),
                    zone_type,
                    timestamp,
                },
            }),
            Command::PlaceFlag(mut flag) => {
                if flag.owner_id.is_empty() {
                    flag.owner_id.clone_from(&self.player_id);
                }
                let flag_id = self.flags.place(flag.clone());
                Some(Message::FlagUpdate { flag_id, flag_data: flag })
            }
            Command::RequestFlags => Some(Message::RequestFlags {
                requester_id: self.player_id.clone(),
                timestamp,
            }),
            Command::CreateMarker(payload) => Some(Message::MarkerCreate { payload }),
            Command::UpdateMarker { marker_id, updates } => Some(Message::MarkerUpdate {
                payload: messages::MarkerUpdatePayload { marker_id, updates },
            }),
            Command::DeleteMarker { marker_id } => Some(Message::MarkerDelete {
                payload: messages::MarkerDeletePayload { marker_id },
            }),
            Command::EstablishBase(position) => Some(Message::BaseEstablish {
                payload: messages::BaseEstablishPayload { position },
            }),
            Command::SyncSteps { total_steps, session_steps } => Some(Message::SyncSteps {
                payload: StepsPayload { total_steps, session_steps, timestamp },
            }),
            Command::RequestGameState => Some(Message::RequestGameState {}),
            Command::Disconnect => None,
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn generate_local_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| PLAYER_ID_CHARSET[rng.random_range(0..PLAYER_ID_CHARSET.len())] as char)
        .collect();
    format!("player_{suffix}")
}

async fn send_ws(write: &mut WsSink, message: &Message) -> Result<(), ()> {
    let json = messages::encode(message);
    write.send(WsMessage::Text(json.into())).await.map_err(|e| {
        warn!(error = %e, "ws: send failed");
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
