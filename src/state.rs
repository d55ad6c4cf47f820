//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the document store, the optional coach backend, and the keyed
//! locks that serialize coaching exchanges per (room, user). All durable
//! state lives in the store; nothing here caches rooms or messages.

use std::sync::Arc;

use crate::coach::CoachBackend;
use crate::config::AppConfig;
use crate::services::coaching::CoachingLocks;
use crate::store::Store;

/// Clone is required by Axum; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Coach backend. `None` when `COACH_URL` is not configured.
    pub coach: Option<Arc<dyn CoachBackend>>,
    pub coaching_locks: Arc<CoachingLocks>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, coach: Option<Arc<dyn CoachBackend>>, config: AppConfig) -> Self {
        Self { store, coach, coaching_locks: Arc::new(CoachingLocks::new()), config: Arc::new(config) }
    }
}

#[cfg(test)]
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::coach::{CoachError, CoachingHistoryEntry, DialogueHistoryEntry};
    use crate::services::room::{self, Room};
    use crate::store::{CollectionPath, MemoryStore, to_fields};

    #[must_use]
    pub fn memory_store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    /// `AppState` over a fresh in-memory store, without a coach.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(memory_store(), None, AppConfig::default())
    }

    /// `AppState` over a fresh in-memory store with the given coach.
    #[must_use]
    pub fn test_app_state_with_coach(coach: Arc<dyn CoachBackend>) -> AppState {
        AppState::new(memory_store(), Some(coach), AppConfig::default())
    }

    /// Create a room between `a` and `b`.
    pub async fn seed_room(store: &dyn Store, a: &str, b: &str) -> Room {
        room::create_room(store, a, b, None)
            .await
            .expect("seed room should succeed")
    }

    /// Write a profile document into the `users` collection.
    pub async fn seed_profile(store: &dyn Store, user_id: &str, display_name: &str) {
        let body = serde_json::json!({
            "display_name": display_name,
            "email": format!("{user_id}@example.com"),
        });
        store
            .put(&CollectionPath::users(), user_id, to_fields(&body).expect("object"))
            .await
            .expect("seed profile should succeed");
    }

    /// Arguments of one recorded coach call.
    #[derive(Debug, Clone)]
    pub struct CoachCall {
        pub user_input: String,
        pub dialogue_history: Vec<DialogueHistoryEntry>,
        pub coaching_history: Vec<CoachingHistoryEntry>,
    }

    /// Scripted coach. Replies are consumed in order; once exhausted it
    /// answers `"ok"`.
    #[derive(Default)]
    pub struct MockCoach {
        replies: Mutex<VecDeque<Result<String, CoachError>>>,
        calls: Mutex<Vec<CoachCall>>,
    }

    impl MockCoach {
        pub fn new(replies: Vec<Result<String, CoachError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), calls: Mutex::new(Vec::new()) }
        }

        pub fn calls(&self) -> Vec<CoachCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CoachBackend for MockCoach {
        async fn invoke(
            &self,
            user_input: &str,
            dialogue_history: &[DialogueHistoryEntry],
            coaching_history: &[CoachingHistoryEntry],
        ) -> Result<String, CoachError> {
            self.calls.lock().unwrap().push(CoachCall {
                user_input: user_input.to_string(),
                dialogue_history: dialogue_history.to_vec(),
                coaching_history: coaching_history.to_vec(),
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".into()))
        }
    }
}
