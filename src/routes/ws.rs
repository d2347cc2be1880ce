//! WebSocket gateway — each connection is a view tree.
//!
//! DESIGN
//! ======
//! A connection mounts views onto channels. Every view is a
//! [`MountBoundary`] whose session subscribes the connection's outbox to
//! the channel. The `select!` loop relays inbound client frames to the
//! dispatcher and outbound channel traffic to the socket.
//!
//! Handlers validate, touch the view tree, and return an `Outcome`. The
//! dispatch layer owns outbound concerns: reply to sender and broadcast to
//! channel peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `view:mount` / `view:unmount` mount and tear down boundaries
//! 3. `view:state` is pushed once a mounted view goes live or fails
//! 4. `channel:publish` relays to peers of a live view's channel
//! 5. Close → the view tree is dropped, releasing every session
//!
//! ERROR HANDLING
//! ==============
//! Protocol errors are `GatewayError`s sent as structured error frames
//! (`code`, `message`, `retryable`). Activation failures reach the client
//! as a `view:state` error frame carrying the `SyncError` code.

use std::collections::HashMap;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::boundary::{MountBoundary, MountState, Settled};
use crate::frame::{Data, ErrorCode, Frame, Status};
use crate::state::AppState;
use crate::sync::SyncScope;

// =============================================================================
// VIEW TREE
// =============================================================================

/// What a mounted view renders: its identity, the channel it follows, and
/// its position in the connection's mount order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct View {
    pub view_id: Uuid,
    pub channel_id: Uuid,
    pub seq: u64,
}

/// Per-connection state. Dropping it unmounts every view.
pub struct Connection {
    pub client_id: Uuid,
    outbox: mpsc::Sender<Frame>,
    views: HashMap<Uuid, MountBoundary<View>>,
    next_seq: u64,
}

impl Connection {
    #[must_use]
    pub fn new(client_id: Uuid, outbox: mpsc::Sender<Frame>) -> Self {
        Self { client_id, outbox, views: HashMap::new(), next_seq: 0 }
    }

    #[must_use]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    fn has_live_view(&self, channel_id: Uuid) -> bool {
        self.views
            .values()
            .any(|b| b.channel_id() == channel_id && b.state() == MountState::Live)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("{0} required")]
    MissingField(&'static str),
    #[error("unknown view: {0}")]
    UnknownView(Uuid),
    #[error("no live view on channel {0}")]
    NotLive(Uuid),
    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),
    #[error("unknown {prefix} op: {op}")]
    UnknownOp { prefix: &'static str, op: String },
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "E_INVALID_JSON",
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::UnknownView(_) => "E_UNKNOWN_VIEW",
            Self::NotLive(_) => "E_NOT_LIVE",
            Self::UnknownPrefix(_) | Self::UnknownOp { .. } => "E_UNKNOWN_OP",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::NotLive(_))
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Handlers never send frames directly; dispatch applies the outcome.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Reply to sender and relay a notification to the channel's peers.
    ReplyAndBroadcast { reply: Data, channel_id: Uuid, broadcast: Data },
}

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
    let client_id = Uuid::new_v4();
    let (outbox, mut inbox) = mpsc::channel::<Frame>(state.config.outbox_capacity);
    let mut conn = Connection::new(client_id, outbox);

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, &text) {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = inbox.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    let views = conn.view_count();
    drop(conn);
    info!(%client_id, views, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).error_from(&GatewayError::InvalidJson(e.to_string()));
            return vec![err];
        }
    };
    req.from = Some(conn.client_id.to_string());
    info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "view" => handle_view(state, conn, &req),
        "channel" => handle_channel(state, conn, &req),
        prefix => Err(GatewayError::UnknownPrefix(prefix.to_string())),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndBroadcast { reply, channel_id, broadcast }) => {
            let notif = Frame::request(&req.syscall, broadcast)
                .with_channel_id(channel_id)
                .with_from(conn.client_id.to_string());
            state.hub.broadcast(channel_id, &notif, Some(conn.client_id));
            vec![req.done_with(reply)]
        }
        Err(err) => vec![req.error_from(&err)],
    }
}

// =============================================================================
// VIEW HANDLERS
// =============================================================================

fn handle_view(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, GatewayError> {
    match req.op() {
        "mount" => {
            let Some(channel_id) = req.uuid_field("channel_id") else {
                return Err(GatewayError::MissingField("channel_id"));
            };
            let view = View { view_id: Uuid::new_v4(), channel_id, seq: conn.next_seq };
            conn.next_seq += 1;
            let scope = SyncScope { channel_id, client_id: conn.client_id, outbox: conn.outbox.clone() };
            let outbox = conn.outbox.clone();
            let mut boundary = MountBoundary::new(view, scope, state.sync.clone(), state.reporter())
                .on_settle(move |settled| {
                    let _ = outbox.try_send(view_state_frame(&view, settled));
                });

            let rendered = *boundary.render();
            let mut data = view_data(&rendered);
            data.insert("state".into(), serde_json::json!(boundary.state()));
            conn.views.insert(rendered.view_id, boundary);
            Ok(Outcome::Reply(data))
        }
        "unmount" => {
            let Some(view_id) = req.uuid_field("view_id") else {
                return Err(GatewayError::MissingField("view_id"));
            };
            let Some(boundary) = conn.views.remove(&view_id) else {
                return Err(GatewayError::UnknownView(view_id));
            };
            let channel_id = boundary.channel_id();
            let release = boundary.unmount();

            let mut data = Data::new();
            data.insert("view_id".into(), serde_json::json!(view_id));
            data.insert("channel_id".into(), serde_json::json!(channel_id));
            data.insert("release".into(), serde_json::json!(release.as_str()));
            Ok(Outcome::Reply(data))
        }
        "list" => {
            let mut views: Vec<(u64, serde_json::Value)> = conn
                .views
                .values_mut()
                .map(|boundary| {
                    let view = *boundary.render();
                    let entry = serde_json::json!({
                        "view_id": view.view_id,
                        "channel_id": view.channel_id,
                        "state": boundary.state(),
                        "session_id": boundary.session_id(),
                    });
                    (view.seq, entry)
                })
                .collect();
            views.sort_by_key(|(seq, _)| *seq);
            let views: Vec<serde_json::Value> = views.into_iter().map(|(_, entry)| entry).collect();

            let mut data = Data::new();
            data.insert("views".into(), serde_json::json!(views));
            Ok(Outcome::Reply(data))
        }
        op => Err(GatewayError::UnknownOp { prefix: "view", op: op.to_string() }),
    }
}

// =============================================================================
// CHANNEL HANDLERS
// =============================================================================

fn handle_channel(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, GatewayError> {
    let Some(channel_id) = req.uuid_field("channel_id") else {
        return Err(GatewayError::MissingField("channel_id"));
    };

    match req.op() {
        "publish" => {
            if !conn.has_live_view(channel_id) {
                return Err(GatewayError::NotLive(channel_id));
            }
            let mut broadcast = req.data.clone();
            broadcast.remove("channel_id");
            Ok(Outcome::ReplyAndBroadcast { reply: Data::new(), channel_id, broadcast })
        }
        "members" => {
            let mut data = Data::new();
            data.insert("members".into(), serde_json::json!(state.hub.members(channel_id)));
            Ok(Outcome::Reply(data))
        }
        op => Err(GatewayError::UnknownOp { prefix: "channel", op: op.to_string() }),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn view_data(view: &View) -> Data {
    let mut data = Data::new();
    data.insert("view_id".into(), serde_json::json!(view.view_id));
    data.insert("channel_id".into(), serde_json::json!(view.channel_id));
    data
}

/// Push notification for a view whose activation resolved.
fn view_state_frame(view: &View, settled: Settled) -> Frame {
    let base = Frame::request("view:state", Data::new()).with_channel_id(view.channel_id);
    let frame = match settled {
        Settled::Live(session_id) => base
            .with_data("state", serde_json::json!(MountState::Live))
            .with_data("session_id", session_id.to_string()),
        Settled::Failed(err) => base
            .error_from(&err)
            .with_data("state", serde_json::json!(MountState::Failed)),
    };
    frame.with_data("view_id", view.view_id.to_string())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, message, "ws: send frame status=Error");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
