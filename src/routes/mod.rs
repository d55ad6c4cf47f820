//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket endpoint and the read-only HTTP API under a single
//! Axum router. Authentication happens upstream; handlers receive the acting
//! user explicitly.

pub mod rooms;
pub mod users;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::frame::ErrorCode;
use crate::services::room::RoomError;
use crate::state::AppState;
use crate::store::StoreError;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/rooms/{id}/messages", get(rooms::list_messages))
        .route("/api/users/{id}/recent-chats", get(users::recent_chats))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub(crate) fn store_error_to_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn room_error_to_status(err: &RoomError) -> StatusCode {
    tracing::warn!(error = %err, code = err.error_code(), "http: request failed");
    match err {
        RoomError::EmptyText | RoomError::InvalidParticipants => StatusCode::BAD_REQUEST,
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        RoomError::Store(e) => store_error_to_status(e),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
