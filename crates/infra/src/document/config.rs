use std::time::Duration;

use crate::config::{env_flag, env_or, env_parse_or};

/// Connection settings for the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConfig {
    pub url: String,
    pub database: String,
    pub pool_size: u32,
    /// Upper bound on how long a connect (or lazy reconnect) may take.
    pub selection_timeout: Duration,
    pub socket_timeout: Duration,
    /// Feature flag: when false the store is never contacted.
    pub enabled: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "hotel_logs".to_string(),
            pool_size: 10,
            selection_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(45),
            enabled: false,
        }
    }
}

impl DocumentConfig {
    /// Read `MONGODB_URL`, `MONGODB_DATABASE`, `MONGODB_POOL_SIZE`,
    /// `MONGODB_SELECTION_TIMEOUT_MS`, `MONGODB_SOCKET_TIMEOUT_MS`, `USE_MONGODB`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_or("MONGODB_URL", &defaults.url),
            database: env_or("MONGODB_DATABASE", &defaults.database),
            pool_size: env_parse_or("MONGODB_POOL_SIZE", defaults.pool_size).max(1),
            selection_timeout: Duration::from_millis(env_parse_or(
                "MONGODB_SELECTION_TIMEOUT_MS",
                defaults.selection_timeout.as_millis() as u64,
            )),
            socket_timeout: Duration::from_millis(env_parse_or(
                "MONGODB_SOCKET_TIMEOUT_MS",
                defaults.socket_timeout.as_millis() as u64,
            )),
            enabled: env_flag("USE_MONGODB", defaults.enabled),
        }
    }

    pub fn enabled(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            enabled: true,
            ..Self::default()
        }
    }
}
