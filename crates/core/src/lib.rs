//! `innkeep-core`: connection-layer building blocks.
//!
//! Pure types only (no IO): connection state, best-effort outcomes, pagination.

pub mod page;
pub mod result;
pub mod state;

pub use page::{Page, Pagination};
pub use result::{OperationResult, Outcome};
pub use state::{ConnectionKind, ConnectionState, ConnectionStatus, StateCell};
