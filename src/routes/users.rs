//! User-scoped routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::store_error_to_status;
use crate::services::recent::{self, RecentChatSummary};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RecentChatsParams {
    pub limit: Option<usize>,
}

/// `GET /api/users/:id/recent-chats?limit=`: conversations ranked by last message.
pub async fn recent_chats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecentChatsParams>,
) -> Result<Json<Vec<RecentChatSummary>>, StatusCode> {
    let limit = params.limit.unwrap_or(state.config.recent_chats_limit);
    let chats = recent::recent_chats(state.store.as_ref(), &user_id, limit)
        .await
        .map_err(|e| {
            tracing::error!(%user_id, error = %e, "http: recent chats failed");
            store_error_to_status(&e)
        })?;
    Ok(Json(chats))
}
