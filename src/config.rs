//! Process configuration, read once from the environment at startup.

use std::time::Duration;

use crate::canvas::history::DEFAULT_HISTORY_LIMIT;
use crate::canvas::presence::DEFAULT_PRESENCE_FRAME_MS;
use crate::db::DEFAULT_DB_MAX_CONNECTIONS;
use crate::services::persistence::PersistenceConfig;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RELAY_CLIENT_QUEUE: usize = 256;

/// Parse `key` from the environment, falling back to `default` when unset
/// or unparsable.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres URL. `None` runs on the in-memory record store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Per-connection outbound queue depth in the room relay.
    pub relay_client_queue: usize,
    pub history_limit: usize,
    pub presence_frame: Duration,
    pub persistence: PersistenceConfig,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            relay_client_queue: env_parse("RELAY_CLIENT_QUEUE", DEFAULT_RELAY_CLIENT_QUEUE).max(1),
            history_limit: env_parse("HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            presence_frame: Duration::from_millis(env_parse("PRESENCE_FRAME_MS", DEFAULT_PRESENCE_FRAME_MS)),
            persistence: PersistenceConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            relay_client_queue: DEFAULT_RELAY_CLIENT_QUEUE,
            history_limit: DEFAULT_HISTORY_LIMIT,
            presence_frame: Duration::from_millis(DEFAULT_PRESENCE_FRAME_MS),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
