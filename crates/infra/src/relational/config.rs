use std::time::Duration;

use crate::config::{env_or, env_parse_or};

/// Connection settings for the relational store.
#[derive(Clone, PartialEq, Eq)]
pub struct RelationalConfig {
    /// Full connection URL; when set, `host`/`port`/`user`/`password`/`database` are ignored.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub timezone: String,
    pub pool_size: u32,
    pub connect_timeout: Duration,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "hotel".to_string(),
            charset: "utf8mb4".to_string(),
            timezone: "+00:00".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RelationalConfig {
    /// Read `DB_URL`, `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`,
    /// `DB_CHARSET`, `DB_TIMEZONE`, `DB_POOL_SIZE`, `DB_CONNECT_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DB_URL").ok().filter(|u| !u.is_empty()),
            host: env_or("DB_HOST", &defaults.host),
            port: env_parse_or("DB_PORT", defaults.port),
            user: env_or("DB_USER", &defaults.user),
            password: env_or("DB_PASSWORD", &defaults.password),
            database: env_or("DB_NAME", &defaults.database),
            charset: env_or("DB_CHARSET", &defaults.charset),
            timezone: env_or("DB_TIMEZONE", &defaults.timezone),
            pool_size: env_parse_or("DB_POOL_SIZE", defaults.pool_size).max(1),
            connect_timeout: Duration::from_millis(env_parse_or(
                "DB_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )),
        }
    }

    /// Single-connection config for a given URL (tests, SQLite).
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            pool_size: 1,
            ..Self::default()
        }
    }

    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None if self.password.is_empty() => format!(
                "mysql://{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
            None => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.database
            ),
        }
    }

    /// Host/database label that is safe to log (no credentials).
    pub fn redacted_target(&self) -> String {
        match &self.url {
            Some(url) => match url.split_once('@') {
                Some((_, rest)) => rest.to_string(),
                None => url.clone(),
            },
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl core::fmt::Debug for RelationalConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelationalConfig")
            .field("target", &self.redacted_target())
            .field("user", &self.user)
            .field("charset", &self.charset)
            .field("timezone", &self.timezone)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
