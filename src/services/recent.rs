//! Recency aggregator: a user's conversations ranked by last message.
//!
//! DESIGN
//! ======
//! Recomputed on every call. Candidate rooms are the user's rooms with the
//! newest `updated_at`, capped at `limit`. Each candidate's newest message
//! and partner profile are then fetched concurrently; rooms without messages
//! are dropped and the rest are ranked by the message timestamp, never by
//! `updated_at`.
//!
//! ERROR HANDLING
//! ==============
//! Failing to list candidate rooms fails the call. A failure inside one
//! room's lookup only drops that room.

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use super::profile::{self, PartnerProfile};
use super::room::{self, Room, UPDATED_AT_FIELD};
use crate::store::{CollectionPath, Filter, OrderBy, Query, Store, StoreError};

/// Characters of the last message kept in the preview.
pub const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentChatSummary {
    pub room_id: String,
    pub room_name: String,
    pub partner: PartnerProfile,
    pub last_message_text: String,
    pub last_message_preview: String,
    pub last_message_timestamp: i64,
    pub last_sender_id: String,
}

/// Shorten `text` to [`PREVIEW_CHARS`] characters, marking truncation with `…`.
#[must_use]
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
}

/// Up to `limit` conversations of `user_id`, most recent message first.
///
/// # Errors
///
/// Returns a store error if the candidate rooms cannot be listed.
pub async fn recent_chats(store: &dyn Store, user_id: &str, limit: usize) -> Result<Vec<RecentChatSummary>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let docs = store
        .query(
            &Query::new(CollectionPath::rooms())
                .with_filter(Filter::array_contains("participants", user_id))
                .with_order(OrderBy::field_desc(UPDATED_AT_FIELD))
                .with_limit(limit),
        )
        .await?;

    let rooms: Vec<Room> = docs
        .iter()
        .filter_map(|doc| match Room::from_document(doc) {
            Ok(room) => Some(room),
            Err(e) => {
                warn!(%user_id, room_id = %doc.id, error = %e, "recent: skipping unreadable room");
                None
            }
        })
        .collect();

    let lookups = rooms.iter().map(|room| summarize(store, user_id, room));
    let mut summaries: Vec<RecentChatSummary> = join_all(lookups)
        .await
        .into_iter()
        .zip(&rooms)
        .filter_map(|(result, room)| match result {
            Ok(summary) => summary,
            Err(e) => {
                warn!(%user_id, room_id = %room.id, error = %e, "recent: skipping room after lookup failure");
                None
            }
        })
        .collect();

    summaries.sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
    summaries.truncate(limit);
    Ok(summaries)
}

/// Summary for one room, or `None` if it has no messages or no partner.
async fn summarize(store: &dyn Store, user_id: &str, room: &Room) -> Result<Option<RecentChatSummary>, StoreError> {
    let Some(partner_id) = room.partner_of(user_id) else {
        return Ok(None);
    };
    let Some(last) = room::latest_message(store, &room.id).await? else {
        return Ok(None);
    };
    let partner = profile::lookup_profile(store, partner_id).await?;

    Ok(Some(RecentChatSummary {
        room_id: room.id.clone(),
        room_name: room.name.clone(),
        partner,
        last_message_preview: preview(&last.text),
        last_message_text: last.text,
        last_message_timestamp: last.timestamp,
        last_sender_id: last.sender_id,
    }))
}

#[cfg(test)]
#[path = "recent_test.rs"]
mod tests;
