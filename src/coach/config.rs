//! Coach endpoint configuration parsed from environment variables.

use super::types::CoachError;
use crate::config::env_parse;

pub const DEFAULT_COACH_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_COACH_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoachTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for CoachTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_COACH_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_COACH_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachConfig {
    pub url: String,
    pub timeouts: CoachTimeouts,
}

impl CoachConfig {
    /// Build typed coach config from environment variables.
    ///
    /// Required:
    /// - `COACH_URL`: full URL of the coaching endpoint
    ///
    /// Optional:
    /// - `COACH_REQUEST_TIMEOUT_SECS`: default 60
    /// - `COACH_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::NotConfigured`] if `COACH_URL` is absent or blank.
    pub fn from_env() -> Result<Self, CoachError> {
        let url = std::env::var("COACH_URL").map_err(|_| CoachError::NotConfigured)?;
        let url = parse_url(&url)?;
        let timeouts = CoachTimeouts {
            request_secs: env_parse("COACH_REQUEST_TIMEOUT_SECS", DEFAULT_COACH_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("COACH_CONNECT_TIMEOUT_SECS", DEFAULT_COACH_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { url, timeouts })
    }
}

fn parse_url(raw: &str) -> Result<String, CoachError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoachError::NotConfigured);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoachError::ConfigParse(format!("COACH_URL must be http(s): {trimmed}")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
