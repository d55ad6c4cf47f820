//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the conversation engine on top of `dyn Store` so route
//! handlers stay focused on protocol translation. Every call takes the acting
//! user explicitly; there is no ambient session.

pub mod coaching;
pub mod history;
pub mod profile;
pub mod recent;
pub mod room;

use crate::store::{Document, StoreError, Subscription};

/// Typed live feed: a store [`Subscription`] whose snapshots are decoded into
/// domain records.
pub struct Feed<T> {
    sub: Subscription,
    decode: fn(Vec<Document>) -> Result<Vec<T>, StoreError>,
}

impl<T> Feed<T> {
    pub(crate) fn new(sub: Subscription, decode: fn(Vec<Document>) -> Result<Vec<T>, StoreError>) -> Self {
        Self { sub, decode }
    }

    /// Next full ordered snapshot. `None` once cancelled.
    pub async fn next(&mut self) -> Option<Result<Vec<T>, StoreError>> {
        let snapshot = self.sub.next().await?;
        Some(snapshot.and_then(self.decode))
    }

    pub fn cancel(&self) {
        self.sub.cancel();
    }
}
