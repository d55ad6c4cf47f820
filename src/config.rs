//! Service configuration parsed from environment variables.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RECENT_CHATS_LIMIT: usize = 10;
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 32;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres URL. The in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Default `limit` for recent-chat queries.
    pub recent_chats_limit: usize,
    /// Buffered snapshots per live feed before the producer waits.
    pub subscription_buffer: usize,
}

impl AppConfig {
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: unset selects the in-memory store
    /// - `RECENT_CHATS_LIMIT`: default 10
    /// - `SUBSCRIPTION_BUFFER`: default 32
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            recent_chats_limit: env_parse("RECENT_CHATS_LIMIT", DEFAULT_RECENT_CHATS_LIMIT).max(1),
            subscription_buffer: env_parse("SUBSCRIPTION_BUFFER", DEFAULT_SUBSCRIPTION_BUFFER).max(1),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            recent_chats_limit: DEFAULT_RECENT_CHATS_LIMIT,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
