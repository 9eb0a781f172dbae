//! Process-wide logging setup shared by the innkeep binaries and tests.

/// Tracing subscriber configuration.
pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
