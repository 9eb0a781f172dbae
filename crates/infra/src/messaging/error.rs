use std::path::PathBuf;

use thiserror::Error;

/// Messaging bridge error.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Publish/subscribe attempted without a live broker connection.
    #[error("broker is not connected")]
    NotConnected,

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("payload serialization failed: {0}")]
    Serialize(String),

    #[error("unknown topic template '{0}'")]
    UnknownTopic(String),

    #[error("invalid topic: {0}")]
    Topic(String),
}

/// Broker config resource could not be loaded.
///
/// On reload this leaves the previous configuration in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed broker config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid broker config: {0}")]
    Invalid(String),

    #[error("no config resource to reload from")]
    NoSource,
}
