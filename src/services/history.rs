//! History compiler: the two transcripts sent with every coaching request.
//!
//! Dialogue history is the room's full message list relabeled `self`/`other`
//! for the requesting user. Coaching history is that user's private channel
//! minus the current exchange: the live prompt and its placeholder are named
//! in `exclude`, and any other pending turn or AI turn carrying the placeholder
//! text is dropped as well. Both are read fresh on every request.

use std::collections::HashSet;

use super::coaching::{self, CoachingTurn};
use super::room::{self, Message};
use crate::coach::types::{CoachingRole, DialogueRole};
use crate::coach::{CoachingHistoryEntry, DialogueHistoryEntry};
use crate::store::{Store, StoreError};

/// Room transcript, oldest first, tagged relative to `requesting_user`.
///
/// # Errors
///
/// Returns a store error if the messages cannot be read.
pub async fn compile_dialogue_history(
    store: &dyn Store,
    room_id: &str,
    requesting_user: &str,
) -> Result<Vec<DialogueHistoryEntry>, StoreError> {
    let messages = room::list_messages(store, room_id).await?;
    Ok(dialogue_entries(&messages, requesting_user))
}

/// Coaching transcript, oldest first, without the turns in `exclude` and
/// without any placeholder, pending or stored as resolved.
///
/// # Errors
///
/// Returns a store error if the turns cannot be read.
pub async fn compile_coaching_history(
    store: &dyn Store,
    room_id: &str,
    user_id: &str,
    exclude: &HashSet<String>,
) -> Result<Vec<CoachingHistoryEntry>, StoreError> {
    let turns = coaching::list_turns(store, room_id, user_id).await?;
    Ok(coaching_entries(&turns, exclude))
}

pub(crate) fn dialogue_entries(messages: &[Message], requesting_user: &str) -> Vec<DialogueHistoryEntry> {
    messages
        .iter()
        .map(|m| DialogueHistoryEntry {
            role: if m.sender_id == requesting_user { DialogueRole::Own } else { DialogueRole::Other },
            content: m.text.clone(),
        })
        .collect()
}

pub(crate) fn coaching_entries(turns: &[CoachingTurn], exclude: &HashSet<String>) -> Vec<CoachingHistoryEntry> {
    turns
        .iter()
        .filter(|turn| !exclude.contains(turn.id()))
        .filter_map(|turn| match turn {
            CoachingTurn::User { text, .. } => Some(CoachingHistoryEntry { role: CoachingRole::User, content: text.clone() }),
            CoachingTurn::ResolvedAi { text, .. } if coaching::is_sentinel(text) => None,
            CoachingTurn::ResolvedAi { text, .. } => Some(CoachingHistoryEntry { role: CoachingRole::Ai, content: text.clone() }),
            CoachingTurn::PendingAi { .. } => None,
        })
        .collect()
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
