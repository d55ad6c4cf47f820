//! Room service: room lifecycle and the ordered message channel.
//!
//! DESIGN
//! ======
//! A room is a `rooms/{id}` document holding exactly two participants. Its
//! messages live in `rooms/{id}/messages`, stamped by the store. Appends
//! carry a `Touch` on the room's `updated_at`, so the store advances it in
//! the same write and it can never lag behind the newest message.
//!
//! ERROR HANDLING
//! ==============
//! Validation failures (`EmptyText`, `NotFound`, `NotParticipant`) are
//! checked before any write. Store failures surface unchanged as
//! `RoomError::Store` and leave previously written state untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::Feed;
use crate::frame::ErrorCode;
use crate::store::{self, CollectionPath, Document, Filter, OrderBy, Query, Store, StoreError, Touch};

/// Room name used when the creator does not pick one.
pub const DEFAULT_ROOM_NAME: &str = "Chat Room";

/// Room field advanced by every message append.
pub const UPDATED_AT_FIELD: &str = "updated_at";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("message text is empty")]
    EmptyText,
    #[error("room not found: {0}")]
    NotFound(String),
    #[error("user {user_id} is not a participant of room {room_id}")]
    NotParticipant { room_id: String, user_id: String },
    #[error("a room needs two distinct participants")]
    InvalidParticipants,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyText => "E_EMPTY_TEXT",
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NotParticipant { .. } => "E_NOT_PARTICIPANT",
            Self::InvalidParticipants => "E_INVALID_PARTICIPANTS",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Stored body of a room document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomBody {
    participants: Vec<String>,
    #[serde(default)]
    name: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: String,
    pub participants: Vec<String>,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Room {
    /// # Errors
    ///
    /// Returns `Decode` if the document is not a room.
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let body: RoomBody = doc.decode()?;
        Ok(Self {
            id: doc.id.clone(),
            participants: body.participants,
            name: body.name.unwrap_or_else(|| DEFAULT_ROOM_NAME.to_string()),
            created_at: body.created_at,
            updated_at: body.updated_at,
        })
    }

    #[must_use]
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The first participant that is not `user_id`.
    #[must_use]
    pub fn partner_of(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != user_id)
    }

    fn is_pair(&self, a: &str, b: &str) -> bool {
        self.participants.len() == 2 && self.has_participant(a) && self.has_participant(b)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageBody {
    sender_id: String,
    text: String,
}

/// One immutable room message. `timestamp` is the store's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: i64,
}

impl Message {
    /// # Errors
    ///
    /// Returns `Decode` if the document is not a message.
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let body: MessageBody = doc.decode()?;
        Ok(Self { id: doc.id.clone(), sender_id: body.sender_id, text: body.text, timestamp: doc.ts })
    }
}

fn decode_messages(docs: Vec<Document>) -> Result<Vec<Message>, StoreError> {
    docs.iter().map(Message::from_document).collect()
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Create a two-party room.
///
/// # Errors
///
/// `InvalidParticipants` if the ids are blank or equal, `Store` if the write fails.
pub async fn create_room(
    store: &dyn Store,
    creator_id: &str,
    partner_id: &str,
    name: Option<&str>,
) -> Result<Room, RoomError> {
    if creator_id.trim().is_empty() || partner_id.trim().is_empty() || creator_id == partner_id {
        return Err(RoomError::InvalidParticipants);
    }

    let now = store::now_ms();
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_ROOM_NAME);
    let body = RoomBody {
        participants: vec![creator_id.to_string(), partner_id.to_string()],
        name: Some(name.to_string()),
        created_at: now,
        updated_at: now,
    };

    let id = Uuid::new_v4().to_string();
    let doc = store
        .put(&CollectionPath::rooms(), &id, store::to_fields(&body)?)
        .await?;
    let room = Room::from_document(&doc)?;
    info!(room_id = %room.id, %creator_id, %partner_id, "room created");
    Ok(room)
}

/// Return the room shared by exactly `a` and `b`, creating it on first contact.
///
/// # Errors
///
/// `InvalidParticipants` if the ids are blank or equal, `Store` on read or write failure.
pub async fn find_or_create_room(store: &dyn Store, a: &str, b: &str) -> Result<Room, RoomError> {
    let docs = store
        .query(
            &Query::new(CollectionPath::rooms())
                .with_filter(Filter::array_contains("participants", a))
                .with_order(OrderBy::field_desc(UPDATED_AT_FIELD)),
        )
        .await?;

    for doc in &docs {
        let Ok(room) = Room::from_document(doc) else {
            continue;
        };
        if room.is_pair(a, b) {
            return Ok(room);
        }
    }

    create_room(store, a, b, None).await
}

/// # Errors
///
/// `NotFound` if no such room exists, `Store` if the read fails.
pub async fn get_room(store: &dyn Store, room_id: &str) -> Result<Room, RoomError> {
    let doc = store
        .get(&CollectionPath::rooms(), room_id)
        .await?
        .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
    Ok(Room::from_document(&doc)?)
}

/// Load a room and check that `user_id` belongs to it.
///
/// # Errors
///
/// `NotFound`, `NotParticipant`, or `Store`.
pub async fn get_room_for(store: &dyn Store, room_id: &str, user_id: &str) -> Result<Room, RoomError> {
    let room = get_room(store, room_id).await?;
    if !room.has_participant(user_id) {
        return Err(RoomError::NotParticipant { room_id: room_id.to_string(), user_id: user_id.to_string() });
    }
    Ok(room)
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Append a message and advance the room's `updated_at` in the same write.
///
/// # Errors
///
/// `EmptyText`, `NotFound`, `NotParticipant`, or `Store` if the write fails.
pub async fn append_message(store: &dyn Store, room_id: &str, sender_id: &str, text: &str) -> Result<Message, RoomError> {
    if text.trim().is_empty() {
        return Err(RoomError::EmptyText);
    }
    get_room_for(store, room_id, sender_id).await?;

    let body = MessageBody { sender_id: sender_id.to_string(), text: text.to_string() };
    let touch = Touch { collection: CollectionPath::rooms(), id: room_id.to_string(), field: UPDATED_AT_FIELD.into() };

    let doc = store
        .append(&CollectionPath::messages(room_id), store::to_fields(&body)?, Some(&touch))
        .await
        .map_err(|e| match e {
            StoreError::NotFound { .. } => RoomError::NotFound(room_id.to_string()),
            other => RoomError::Store(other),
        })?;

    let message = Message::from_document(&doc)?;
    info!(%room_id, %sender_id, message_id = %message.id, ts = message.timestamp, "message appended");
    Ok(message)
}

/// All messages of a room, oldest first.
///
/// # Errors
///
/// `Unavailable` if the read fails, `Decode` on a malformed message.
pub async fn list_messages(store: &dyn Store, room_id: &str) -> Result<Vec<Message>, StoreError> {
    let docs = store
        .query(&Query::new(CollectionPath::messages(room_id)))
        .await?;
    decode_messages(docs)
}

/// The newest message of a room, if any.
///
/// # Errors
///
/// `Unavailable` if the read fails, `Decode` on a malformed message.
pub async fn latest_message(store: &dyn Store, room_id: &str) -> Result<Option<Message>, StoreError> {
    let docs = store
        .query(
            &Query::new(CollectionPath::messages(room_id))
                .with_order(OrderBy::newest_first())
                .with_limit(1),
        )
        .await?;
    docs.first().map(Message::from_document).transpose()
}

/// Live feed of the room's full ordered message list.
#[must_use]
pub fn subscribe_messages(store: Arc<dyn Store>, room_id: &str, buffer: usize) -> Feed<Message> {
    let sub = store::subscribe(store, Query::new(CollectionPath::messages(room_id)), buffer);
    Feed::new(sub, decode_messages)
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
