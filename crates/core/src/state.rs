//! Connection state shared by the datastore and broker clients.
//!
//! Every client owns exactly one `StateCell`. Only the owning client mutates it;
//! everyone else (health reporting, route handlers) reads snapshots.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Which backing service a connection state belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Relational,
    Document,
    Broker,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Relational => "relational",
            ConnectionKind::Document => "document",
            ConnectionKind::Broker => "broker",
        }
    }
}

impl core::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single client connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Reachable in principle but currently skipped (feature disabled).
    Degraded,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Degraded => "degraded",
        }
    }
}

/// Point-in-time view of a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub kind: ConnectionKind,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            kind,
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Interior-mutable holder for a client's `ConnectionState`.
///
/// Lock hold times are a few field writes; poisoning is recovered from since
/// the state is always left consistent.
#[derive(Debug)]
pub struct StateCell {
    inner: RwLock<ConnectionState>,
}

impl StateCell {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            inner: RwLock::new(ConnectionState::new(kind)),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn set_connecting(&self) {
        self.update(ConnectionStatus::Connecting, None, false);
    }

    /// Mark connected and clear the last error.
    pub fn set_connected(&self) {
        self.update(ConnectionStatus::Connected, None, true);
    }

    /// Mark disconnected without touching the last error (clean close).
    pub fn set_disconnected(&self) {
        self.update(ConnectionStatus::Disconnected, None, false);
    }

    /// Mark disconnected and record why.
    pub fn set_failed(&self, error: impl Into<String>) {
        self.update(ConnectionStatus::Disconnected, Some(error.into()), false);
    }

    pub fn set_degraded(&self, reason: impl Into<String>) {
        self.update(ConnectionStatus::Degraded, Some(reason.into()), false);
    }

    fn update(&self, status: ConnectionStatus, error: Option<String>, clear_error: bool) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.status != status {
            tracing::debug!(
                kind = %guard.kind,
                from = guard.status.as_str(),
                to = status.as_str(),
                "connection state transition"
            );
        }

        guard.status = status;
        if clear_error {
            guard.last_error = None;
        }
        if let Some(error) = error {
            guard.last_error = Some(error);
        }
    }
}
