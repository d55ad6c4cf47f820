//! Room read routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::room_error_to_status;
use crate::services::room::{self, Message, RoomError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagesParams {
    /// Acting user. Must be a participant of the room.
    pub user_id: String,
}

/// `GET /api/rooms/:id/messages?user_id=`: the room's messages, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let store = state.store.as_ref();
    room::get_room_for(store, &room_id, &params.user_id)
        .await
        .map_err(|e| room_error_to_status(&e))?;

    let messages = room::list_messages(store, &room_id)
        .await
        .map_err(|e| room_error_to_status(&RoomError::Store(e)))?;
    Ok(Json(messages))
}
