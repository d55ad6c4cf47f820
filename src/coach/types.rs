//! Coach wire types and errors.
//!
//! The two history vocabularies are separate enums so they cannot be mixed:
//! dialogue entries are `self`/`other`, coaching entries are `user`/`ai`.

use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR
// =============================================================================

/// Failure of the external coach call. Never shown to end users; the coaching
/// protocol turns it into a fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// `COACH_URL` is not set.
    #[error("coach endpoint not configured")]
    NotConfigured,

    /// Transport failure before a status was received.
    #[error("coach request failed: {0}")]
    ApiRequest(String),

    /// The coach returned a non-success HTTP status.
    #[error("coach response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// The response body could not be deserialized.
    #[error("coach response parse failed: {0}")]
    ApiParse(String),

    /// The call did not finish within the request timeout.
    #[error("coach request timed out after {0}s")]
    Timeout(u64),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::frame::ErrorCode for CoachError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::NotConfigured => "E_COACH_NOT_CONFIGURED",
            Self::ApiRequest(_) => "E_COACH_REQUEST",
            Self::ApiResponse { .. } => "E_COACH_RESPONSE",
            Self::ApiParse(_) => "E_COACH_PARSE",
            Self::Timeout(_) => "E_COACH_TIMEOUT",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::Timeout(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// HISTORY ENTRIES
// =============================================================================

/// Author of a room message relative to the requesting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueRole {
    #[serde(rename = "self")]
    Own,
    Other,
}

/// One room message as seen by the requesting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueHistoryEntry {
    pub role: DialogueRole,
    pub content: String,
}

/// Author of a past coaching turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoachingRole {
    User,
    Ai,
}

/// One past turn of the user's private exchange with the coach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingHistoryEntry {
    pub role: CoachingRole,
    pub content: String,
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Request body: exactly the live input plus both histories.
#[derive(Debug, Serialize)]
pub struct CoachRequest<'a> {
    pub user_input: &'a str,
    pub dialogue_history: &'a [DialogueHistoryEntry],
    pub coaching_history: &'a [CoachingHistoryEntry],
}

#[derive(Debug, Deserialize)]
pub(crate) struct CoachResponse {
    #[serde(default)]
    pub(crate) feedback: Option<String>,
}

// =============================================================================
// COACH TRAIT
// =============================================================================

/// Async seam over the external coach. Enables mocking in tests.
#[async_trait::async_trait]
pub trait CoachBackend: Send + Sync {
    /// Ask the coach for feedback. `Ok` carries the `feedback` text, which may
    /// be empty if the coach returned none.
    ///
    /// # Errors
    ///
    /// Returns a [`CoachError`] on transport failure, non-2xx status, timeout,
    /// or an unparseable body.
    async fn invoke(
        &self,
        user_input: &str,
        dialogue_history: &[DialogueHistoryEntry],
        coaching_history: &[CoachingHistoryEntry],
    ) -> Result<String, CoachError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
