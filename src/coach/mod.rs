//! Coach invoker: HTTP client for the external coaching service.
//!
//! DESIGN
//! ======
//! One POST per coaching request, no retry. The body is exactly
//! `{user_input, dialogue_history, coaching_history}` and the answer is
//! `{feedback}`. Anything other than a 2xx with a parseable body is a
//! [`CoachError`]; the coaching protocol decides what the user sees.
//! Pure parsing lives in `parse_response` for testability.

pub mod config;
pub mod types;

use std::time::Duration;

use config::CoachConfig;
pub use types::{CoachBackend, CoachError, CoachingHistoryEntry, DialogueHistoryEntry};
use types::{CoachRequest, CoachResponse};

// =============================================================================
// CLIENT
// =============================================================================

pub struct CoachClient {
    http: reqwest::Client,
    url: String,
    request_timeout_secs: u64,
}

impl CoachClient {
    /// Build a client from `COACH_URL` and the timeout variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, CoachError> {
        Self::from_config(CoachConfig::from_env()?)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: CoachConfig) -> Result<Self, CoachError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| CoachError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, url: config.url, request_timeout_secs: config.timeouts.request_secs })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl CoachBackend for CoachClient {
    async fn invoke(
        &self,
        user_input: &str,
        dialogue_history: &[DialogueHistoryEntry],
        coaching_history: &[CoachingHistoryEntry],
    ) -> Result<String, CoachError> {
        let body = CoachRequest { user_input, dialogue_history, coaching_history };

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&e))?;

        if !status.is_success() {
            return Err(CoachError::ApiResponse { status: status.as_u16(), body: text });
        }

        parse_response(&text)
    }
}

impl CoachClient {
    fn transport_error(&self, e: &reqwest::Error) -> CoachError {
        if e.is_timeout() {
            CoachError::Timeout(self.request_timeout_secs)
        } else {
            CoachError::ApiRequest(e.to_string())
        }
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Extract `feedback`. A missing or null field yields an empty string.
fn parse_response(json: &str) -> Result<String, CoachError> {
    let api: CoachResponse = serde_json::from_str(json).map_err(|e| CoachError::ApiParse(e.to_string()))?;
    Ok(api.feedback.unwrap_or_default())
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
