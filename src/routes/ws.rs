//! WebSocket handler: frame relay between a client and the engine.
//!
//! DESIGN
//! ======
//! On upgrade the connection gets a client id and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames from live feeds and detached coaching tasks → forward to client
//!
//! Handler functions validate, call a service, and return an `Outcome`. The
//! dispatch layer turns that into frames for the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id` and `user_id`
//! 2. `room:join` / `coach:join` start a feed; every store change is pushed
//!    as a `room:messages` / `coach:turns` notification with the full list
//! 3. `coach:prompt` runs as a detached task; its done/error frame arrives
//!    later and the exchange still completes if the client disconnects
//! 4. Close → feeds are cancelled

use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coach::CoachError;
use crate::frame::{Data, Frame, Status};
use crate::services::{self, Feed};
use crate::state::AppState;

/// Outbound frames buffered per connection.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
    /// The terminal frame is sent later by a detached task.
    Deferred,
}

// =============================================================================
// SESSION
// =============================================================================

/// A running feed forwarder. Dropping the handle stops it.
struct FeedHandle {
    room_id: String,
    token: CancellationToken,
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Per-connection state.
struct Session {
    client_id: Uuid,
    user_id: String,
    room_feed: Option<FeedHandle>,
    coach_feed: Option<FeedHandle>,
}

impl Session {
    fn new(user_id: String) -> Self {
        Self { client_id: Uuid::new_v4(), user_id, room_feed: None, coach_feed: None }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/ws?user_id=...`. Identity comes from the upstream auth layer.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = params
        .get("user_id")
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
    else {
        return (StatusCode::UNAUTHORIZED, "user_id required").into_response();
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: String) {
    let mut session = Session::new(user_id);
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", session.client_id.to_string())
        .with_data("user_id", session.user_id.clone());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(client_id = %session.client_id, user_id = %session.user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    WsMessage::Text(text) => {
                        for frame in process_inbound_text(&state, &mut session, &client_tx, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    session.room_feed = None;
    session.coach_feed = None;
    info!(client_id = %session.client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(
    state: &AppState,
    session: &mut Session,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // The connection's identity wins over anything the client claims.
    req.from = Some(session.user_id.clone());
    info!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "room" => handle_room(state, session, client_tx, &req).await,
        "coach" => handle_coach(state, session, client_tx, &req).await,
        "chats" => handle_chats(state, session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Deferred) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

/// Room id from the frame header, then `data.room_id`, then `fallback`.
fn target_room(req: &Frame, fallback: Option<&FeedHandle>) -> Option<String> {
    req.room_id
        .clone()
        .or_else(|| req.str_data("room_id").map(str::to_string))
        .or_else(|| fallback.map(|f| f.room_id.clone()))
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(
    state: &AppState,
    session: &mut Session,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let store = state.store.as_ref();

    match req.op() {
        "create" => {
            let Some(partner_id) = req.str_data("partner_id") else {
                return Err(req.error("partner_id required"));
            };
            let room = services::room::create_room(store, &session.user_id, partner_id, req.str_data("name"))
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data("room", &room)))
        }
        "open" => {
            let Some(partner_id) = req.str_data("partner_id") else {
                return Err(req.error("partner_id required"));
            };
            let room = services::room::find_or_create_room(store, &session.user_id, partner_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data("room", &room)))
        }
        "join" => {
            let Some(room_id) = target_room(req, None) else {
                return Err(req.error("room_id required"));
            };
            let room = services::room::get_room_for(store, &room_id, &session.user_id)
                .await
                .map_err(|e| req.error_from(&e))?;

            // Replacing the handle stops the previous feed.
            let feed = services::room::subscribe_messages(state.store.clone(), &room.id, state.config.subscription_buffer);
            session.room_feed = Some(spawn_forwarder(feed, "room:messages", "messages", room.id.clone(), client_tx.clone()));
            info!(client_id = %session.client_id, room_id = %room.id, "ws: joined room");
            Ok(Outcome::Reply(to_data("room", &room)))
        }
        "part" => {
            session.room_feed = None;
            Ok(Outcome::Done)
        }
        "send" => {
            let Some(room_id) = target_room(req, session.room_feed.as_ref()) else {
                return Err(req.error("room_id required"));
            };
            let text = req.str_data("text").unwrap_or("");
            let message = services::room::append_message(store, &room_id, &session.user_id, text)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data("message", &message)))
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// COACH HANDLERS
// =============================================================================

async fn handle_coach(
    state: &AppState,
    session: &mut Session,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(room_id) = target_room(req, session.room_feed.as_ref()) else {
                return Err(req.error("room_id required"));
            };
            services::room::get_room_for(state.store.as_ref(), &room_id, &session.user_id)
                .await
                .map_err(|e| req.error_from(&e))?;

            let feed = services::coaching::subscribe_turns(
                state.store.clone(),
                &room_id,
                &session.user_id,
                state.config.subscription_buffer,
            );
            session.coach_feed = Some(spawn_forwarder(feed, "coach:turns", "turns", room_id, client_tx.clone()));
            Ok(Outcome::Done)
        }
        "part" => {
            session.coach_feed = None;
            Ok(Outcome::Done)
        }
        "prompt" => {
            let Some(coach) = state.coach.clone() else {
                return Err(req.error_from(&CoachError::NotConfigured));
            };
            let fallback = session.coach_feed.as_ref().or(session.room_feed.as_ref());
            let Some(room_id) = target_room(req, fallback) else {
                return Err(req.error("room_id required"));
            };
            let text = req.str_data("text").unwrap_or("").to_string();

            // Detached: the exchange must finish even if this connection closes.
            let state = state.clone();
            let user_id = session.user_id.clone();
            let tx = client_tx.clone();
            let req = req.clone();
            tokio::spawn(async move {
                let result = services::coaching::send_coaching_prompt(
                    state.store.as_ref(),
                    coach.as_ref(),
                    &state.coaching_locks,
                    &room_id,
                    &user_id,
                    &text,
                )
                .await;
                let frame = match result {
                    Ok(exchange) => req.done_with(to_data("exchange", &exchange)),
                    Err(e) => {
                        warn!(%room_id, %user_id, error = %e, "ws: coaching exchange failed");
                        req.error_from(&e)
                    }
                };
                // The client may be gone; the turns are already stored.
                let _ = tx.send(frame).await;
            });
            Ok(Outcome::Deferred)
        }
        op => Err(req.error(format!("unknown coach op: {op}"))),
    }
}

// =============================================================================
// CHATS HANDLER
// =============================================================================

async fn handle_chats(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "recent" => {
            let limit = req
                .data
                .get("limit")
                .and_then(serde_json::Value::as_u64)
                .and_then(|l| usize::try_from(l).ok())
                .unwrap_or(state.config.recent_chats_limit);
            let chats = services::recent::recent_chats(state.store.as_ref(), &session.user_id, limit)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data("chats", &chats)))
        }
        op => Err(req.error(format!("unknown chats op: {op}"))),
    }
}

// =============================================================================
// FEEDS
// =============================================================================

/// Forward every snapshot of `feed` to the client as a `syscall` notification.
fn spawn_forwarder<T>(
    mut feed: Feed<T>,
    syscall: &'static str,
    key: &'static str,
    room_id: String,
    client_tx: mpsc::Sender<Frame>,
) -> FeedHandle
where
    T: Serialize + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();
    let task_room = room_id.clone();

    tokio::spawn(async move {
        loop {
            let snapshot = tokio::select! {
                () = task_token.cancelled() => break,
                next = feed.next() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };
            let notice = Frame::request(syscall, Data::new()).with_room_id(task_room.clone());
            let frame = match snapshot {
                Ok(items) => {
                    let mut data = to_data(key, &items);
                    data.insert("room_id".into(), serde_json::json!(task_room));
                    Frame { data, ..notice }
                }
                Err(e) => notice.error_from(&e),
            };
            if client_tx.send(frame).await.is_err() {
                break;
            }
        }
        feed.cancel();
    });

    FeedHandle { room_id, token }
}

// =============================================================================
// HELPERS
// =============================================================================

fn to_data<T: Serialize + ?Sized>(key: &str, value: &T) -> Data {
    let mut data = Data::new();
    data.insert(key.into(), serde_json::to_value(value).unwrap_or_default());
    data
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
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
