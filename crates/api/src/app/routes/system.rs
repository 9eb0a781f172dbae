use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto::HealthResponse;
use crate::lifecycle::Clients;

/// 503 when the relational store is down; otherwise 200, reporting
/// `degraded` while the broker or an enabled document store is not connected.
pub async fn health(Extension(clients): Extension<Arc<Clients>>) -> axum::response::Response {
    let relational = clients.relational.state();
    let document = clients.document.state();
    let broker = clients.broker.state();

    let document_down = clients.document.config().enabled && !document.is_connected();
    let (code, status) = if !relational.is_connected() {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else if document_down || !broker.is_connected() {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        code,
        Json(HealthResponse {
            status,
            relational,
            document,
            broker,
        }),
    )
        .into_response()
}
