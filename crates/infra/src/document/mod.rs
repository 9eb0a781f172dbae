//! Document store client: the best-effort store for logs and analytics.

mod client;
mod config;

pub use client::{DocumentClient, FindParams, UpdateSummary, usable};
pub use config::DocumentConfig;

/// BSON types callers need to build filters and documents.
pub use mongodb::bson;
