//! Environment lookup helpers shared by the client configs.

use std::str::FromStr;

pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse `key`, falling back to `default` (with a warning) when it is malformed.
pub(crate) fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, ?default, "invalid value in environment; using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// `true`/`1`/`yes`/`on` (case-insensitive) are truthy; anything else is falsy.
pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
