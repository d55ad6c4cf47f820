//! Coaching service: per-(room, user) private channel with the AI coach.
//!
//! DESIGN
//! ======
//! Turns live in `rooms/{room}/coaching/{user}/turns` and are append-only.
//! An exchange is: user turn, pending AI turn (the placeholder), coach call,
//! resolved AI turn. The placeholder is never edited; a later resolved turn
//! supersedes it and the display filter hides it from then on.
//!
//! Exchanges for one (room, user) pair run strictly one at a time under a
//! keyed async mutex, so at most one placeholder is ever unresolved.
//!
//! ERROR HANDLING
//! ==============
//! Coach failures never escape: they become a fixed fallback reply so every
//! exchange ends in a resolved turn. Store failures are returned to the
//! caller. A placeholder stranded by a crashed process is superseded with an
//! interruption notice at the start of the next exchange.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use super::Feed;
use super::history;
use super::room::{self, RoomError};
use crate::coach::{CoachBackend, CoachingHistoryEntry, DialogueHistoryEntry};
use crate::frame::ErrorCode;
use crate::store::{self, CollectionPath, Document, Query, Store, StoreError};

/// Text of the placeholder as rendered to users, and of legacy pending turns.
pub const PLACEHOLDER_TEXT: &str = "Thinking…";
const LEGACY_PLACEHOLDER_TEXT: &str = "Thinking...";

/// Reply when the coach call fails or times out.
pub const FAILURE_FALLBACK: &str = "I'm sorry, I couldn't process your request at this time. Please try again later.";

/// Reply when the coach answers with empty feedback.
pub const EMPTY_FALLBACK: &str = "I'm sorry, I couldn't generate a response.";

/// Reply that supersedes a placeholder left behind by an interrupted exchange.
pub const INTERRUPTED_TEXT: &str = "This request was interrupted. Please ask again.";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoachingError {
    #[error("coaching prompt is empty")]
    EmptyText,
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for CoachingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyText => "E_EMPTY_TEXT",
            Self::Room(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::EmptyText => false,
            Self::Room(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
        }
    }
}

// =============================================================================
// TURNS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TurnStatus {
    Pending,
    Resolved,
}

/// Stored body of a coaching turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TurnBody {
    sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<TurnStatus>,
    text: String,
    /// Id of the placeholder this reply supersedes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolves: Option<String>,
}

/// One turn of a coaching channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoachingTurn {
    User { id: String, text: String, timestamp: i64 },
    PendingAi { id: String, timestamp: i64 },
    ResolvedAi { id: String, text: String, timestamp: i64, resolves: Option<String> },
}

impl CoachingTurn {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User { id, .. } | Self::PendingAi { id, .. } | Self::ResolvedAi { id, .. } => id,
        }
    }

    /// Text as shown to the user. Pending turns render as the placeholder.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::User { text, .. } | Self::ResolvedAi { text, .. } => text,
            Self::PendingAi { .. } => PLACEHOLDER_TEXT,
        }
    }

    /// Decode a stored turn. AI turns written without a status are pending
    /// when their text is the placeholder sentinel.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the document is not a coaching turn.
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let body: TurnBody = doc.decode()?;
        let id = doc.id.clone();
        let timestamp = doc.ts;
        Ok(match (body.sender, body.status) {
            (Sender::User, _) => Self::User { id, text: body.text, timestamp },
            (Sender::Ai, Some(TurnStatus::Pending)) => Self::PendingAi { id, timestamp },
            (Sender::Ai, None) if is_sentinel(&body.text) => Self::PendingAi { id, timestamp },
            (Sender::Ai, _) => Self::ResolvedAi { id, text: body.text, timestamp, resolves: body.resolves },
        })
    }
}

pub(crate) fn is_sentinel(text: &str) -> bool {
    let text = text.trim();
    text == PLACEHOLDER_TEXT || text == LEGACY_PLACEHOLDER_TEXT
}

fn decode_turns(docs: Vec<Document>) -> Result<Vec<CoachingTurn>, StoreError> {
    docs.iter().map(CoachingTurn::from_document).collect()
}

fn decode_visible_turns(docs: Vec<Document>) -> Result<Vec<CoachingTurn>, StoreError> {
    decode_turns(docs).map(visible_turns)
}

/// Ids of pending turns that no later resolved turn supersedes.
fn unresolved_placeholders(turns: &[CoachingTurn]) -> Vec<String> {
    let mut open: Vec<String> = Vec::new();
    for turn in turns {
        match turn {
            CoachingTurn::PendingAi { id, .. } => open.push(id.clone()),
            CoachingTurn::ResolvedAi { resolves: Some(target), .. } => open.retain(|id| id != target),
            CoachingTurn::ResolvedAi { resolves: None, .. } => open.clear(),
            CoachingTurn::User { .. } => {}
        }
    }
    open
}

/// Display view of a channel: a pending turn is hidden once a later resolved
/// AI turn exists or a resolved turn names it.
#[must_use]
pub fn visible_turns(turns: Vec<CoachingTurn>) -> Vec<CoachingTurn> {
    let resolved_targets: HashSet<String> = turns
        .iter()
        .filter_map(|t| match t {
            CoachingTurn::ResolvedAi { resolves: Some(target), .. } => Some(target.clone()),
            _ => None,
        })
        .collect();
    let last_resolved = turns
        .iter()
        .rposition(|t| matches!(t, CoachingTurn::ResolvedAi { .. }));

    turns
        .into_iter()
        .enumerate()
        .filter(|(idx, turn)| match turn {
            CoachingTurn::PendingAi { id, .. } => {
                !resolved_targets.contains(id) && last_resolved.is_none_or(|last| last < *idx)
            }
            _ => true,
        })
        .map(|(_, turn)| turn)
        .collect()
}

// =============================================================================
// CHANNEL
// =============================================================================

/// Promise of a forthcoming AI reply. Must be passed to [`resolve_placeholder`].
#[derive(Debug)]
#[must_use = "a placeholder must be resolved"]
pub struct PlaceholderHandle {
    pub room_id: String,
    pub user_id: String,
    pub turn_id: String,
}

async fn append_turn(store: &dyn Store, room_id: &str, user_id: &str, body: &TurnBody) -> Result<CoachingTurn, StoreError> {
    let doc = store
        .append(&CollectionPath::coaching_turns(room_id, user_id), store::to_fields(body)?, None)
        .await?;
    CoachingTurn::from_document(&doc)
}

/// Persist the user's prompt.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn append_user_turn(store: &dyn Store, room_id: &str, user_id: &str, text: &str) -> Result<CoachingTurn, StoreError> {
    let body = TurnBody { sender: Sender::User, status: None, text: text.to_string(), resolves: None };
    append_turn(store, room_id, user_id, &body).await
}

/// Persist the pending AI turn.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn append_placeholder(store: &dyn Store, room_id: &str, user_id: &str) -> Result<PlaceholderHandle, StoreError> {
    let body = TurnBody {
        sender: Sender::Ai,
        status: Some(TurnStatus::Pending),
        text: PLACEHOLDER_TEXT.to_string(),
        resolves: None,
    };
    let turn = append_turn(store, room_id, user_id, &body).await?;
    Ok(PlaceholderHandle { room_id: room_id.to_string(), user_id: user_id.to_string(), turn_id: turn.id().to_string() })
}

/// Append the resolved AI turn that supersedes `handle`'s placeholder.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn resolve_placeholder(
    store: &dyn Store,
    handle: PlaceholderHandle,
    final_text: &str,
) -> Result<CoachingTurn, StoreError> {
    let body = TurnBody {
        sender: Sender::Ai,
        status: Some(TurnStatus::Resolved),
        text: final_text.to_string(),
        resolves: Some(handle.turn_id),
    };
    append_turn(store, &handle.room_id, &handle.user_id, &body).await
}

/// All turns of the channel, oldest first, unfiltered.
///
/// # Errors
///
/// Returns a store error if the read fails or a turn is malformed.
pub async fn list_turns(store: &dyn Store, room_id: &str, user_id: &str) -> Result<Vec<CoachingTurn>, StoreError> {
    let docs = store
        .query(&Query::new(CollectionPath::coaching_turns(room_id, user_id)))
        .await?;
    decode_turns(docs)
}

/// Live feed of the channel's display view.
#[must_use]
pub fn subscribe_turns(store: Arc<dyn Store>, room_id: &str, user_id: &str, buffer: usize) -> Feed<CoachingTurn> {
    let sub = store::subscribe(store, Query::new(CollectionPath::coaching_turns(room_id, user_id)), buffer);
    Feed::new(sub, decode_visible_turns)
}

// =============================================================================
// LOCKS
// =============================================================================

/// Keyed async mutex: one lock per (room, user) pair, dropped when unused.
#[derive(Default)]
pub struct CoachingLocks {
    locks: Mutex<HashMap<(String, String), Weak<tokio::sync::Mutex<()>>>>,
}

impl CoachingLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other exchange for `(room_id, user_id)` is running.
    pub async fn acquire(&self, room_id: &str, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);
            let key = (room_id.to_string(), user_id.to_string());
            if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
                existing
            } else {
                let fresh = Arc::new(tokio::sync::Mutex::new(()));
                locks.insert(key, Arc::downgrade(&fresh));
                fresh
            }
        };
        lock.lock_owned().await
    }
}

// =============================================================================
// EXCHANGE
// =============================================================================

/// Result of one completed coaching exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoachingExchange {
    pub prompt: CoachingTurn,
    pub reply: CoachingTurn,
    /// True when the reply is a fallback rather than coach feedback.
    pub fallback: bool,
}

/// Run one exchange: persist the prompt and a placeholder, ask the coach with
/// both histories, then resolve the placeholder with the answer or a fallback.
///
/// # Errors
///
/// `EmptyText`, room validation errors, or a store error while writing turns.
/// Coach failures are absorbed into the fallback reply.
pub async fn send_coaching_prompt(
    store: &dyn Store,
    coach: &dyn CoachBackend,
    locks: &CoachingLocks,
    room_id: &str,
    user_id: &str,
    text: &str,
) -> Result<CoachingExchange, CoachingError> {
    if text.trim().is_empty() {
        return Err(CoachingError::EmptyText);
    }
    room::get_room_for(store, room_id, user_id).await?;

    let _guard = locks.acquire(room_id, user_id).await;

    supersede_stale_placeholders(store, room_id, user_id).await?;

    let prompt = append_user_turn(store, room_id, user_id, text).await?;
    let handle = append_placeholder(store, room_id, user_id).await?;
    info!(%room_id, %user_id, placeholder = %handle.turn_id, "coaching: exchange started");

    let exclude: HashSet<String> = [prompt.id().to_string(), handle.turn_id.clone()].into();
    let (reply_text, fallback) = match compile_histories(store, room_id, user_id, &exclude).await {
        Ok((dialogue, coaching)) => match coach.invoke(text, &dialogue, &coaching).await {
            Ok(feedback) if feedback.trim().is_empty() || is_sentinel(&feedback) => (EMPTY_FALLBACK.to_string(), true),
            Ok(feedback) => (feedback, false),
            Err(e) => {
                warn!(%room_id, %user_id, error = %e, code = e.error_code(), "coaching: coach call failed");
                (FAILURE_FALLBACK.to_string(), true)
            }
        },
        Err(e) => {
            warn!(%room_id, %user_id, error = %e, "coaching: history compile failed");
            (FAILURE_FALLBACK.to_string(), true)
        }
    };

    let reply = resolve_placeholder(store, handle, &reply_text).await?;
    info!(%room_id, %user_id, reply_id = %reply.id(), fallback, "coaching: exchange resolved");
    Ok(CoachingExchange { prompt, reply, fallback })
}

async fn compile_histories(
    store: &dyn Store,
    room_id: &str,
    user_id: &str,
    exclude: &HashSet<String>,
) -> Result<(Vec<DialogueHistoryEntry>, Vec<CoachingHistoryEntry>), StoreError> {
    let dialogue = history::compile_dialogue_history(store, room_id, user_id).await?;
    let coaching = history::compile_coaching_history(store, room_id, user_id, exclude).await?;
    Ok((dialogue, coaching))
}

/// Resolve placeholders stranded by an exchange that never finished.
async fn supersede_stale_placeholders(store: &dyn Store, room_id: &str, user_id: &str) -> Result<(), StoreError> {
    let turns = list_turns(store, room_id, user_id).await?;
    for turn_id in unresolved_placeholders(&turns) {
        warn!(%room_id, %user_id, placeholder = %turn_id, "coaching: superseding stale placeholder");
        let handle = PlaceholderHandle { room_id: room_id.to_string(), user_id: user_id.to_string(), turn_id };
        resolve_placeholder(store, handle, INTERRUPTED_TEXT).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "coaching_test.rs"]
mod tests;
