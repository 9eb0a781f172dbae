//! HTTP application wiring (Axum router + shared clients).
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response shapes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::lifecycle::Clients;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(clients: Arc<Clients>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/devices", routes::devices::router())
        .layer(ServiceBuilder::new().layer(Extension(clients)))
}
