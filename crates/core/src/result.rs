//! Result types for best-effort (non-critical) operations.
//!
//! `Outcome` is what code branches on; `OperationResult` is the flat shape
//! handed to HTTP callers.

use serde::{Deserialize, Serialize};

/// Outcome of an operation against a non-critical dependency.
///
/// `Degraded` is an expected result, not an error: the dependency was disabled
/// or unreachable and the operation was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { reason: String },
    Failed { message: String },
}

impl<T> Outcome<T> {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Degraded { reason } => Outcome::Degraded { reason },
            Outcome::Failed { message } => Outcome::Failed { message },
        }
    }

    /// Flatten into the wire shape; `data` is `None` unless the call succeeded.
    pub fn into_operation_result(self) -> OperationResult<T> {
        match self {
            Outcome::Ok(value) => OperationResult {
                success: true,
                data: Some(value),
                degraded: false,
                error_message: None,
            },
            Outcome::Degraded { reason } => OperationResult {
                success: false,
                data: None,
                degraded: true,
                error_message: Some(reason),
            },
            Outcome::Failed { message } => OperationResult {
                success: false,
                data: None,
                degraded: false,
                error_message: Some(message),
            },
        }
    }
}

impl<T> Outcome<Vec<T>> {
    /// Items on success, an empty list otherwise.
    pub fn items(self) -> Vec<T> {
        self.ok().unwrap_or_default()
    }

    /// Like `into_operation_result`, but listings always carry `data`.
    pub fn into_listing_result(self) -> OperationResult<Vec<T>> {
        let mut result = self.into_operation_result();
        if result.data.is_none() {
            result.data = Some(Vec::new());
        }
        result
    }
}

/// Flat result shape: `{success, data, degraded, error_message}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub degraded: bool,
    pub error_message: Option<String>,
}
