//! Relational store client: the mandatory, authoritative datastore.

mod client;
mod config;
mod driver;
mod error;
mod row;

pub use client::{RelationalClient, ScopeFuture, TransactionScope};
pub use config::RelationalConfig;
pub use driver::{Backend, SqlPool};
pub use error::RelationalError;
pub use row::{ExecResult, SqlRow};
