use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::Value as JsonValue;

use innkeep_infra::document::FindParams;
use innkeep_infra::document::bson::doc;

use crate::app::{dto, errors};
use crate::lifecycle::Clients;

pub const DEVICE_LOGS: &str = "device_logs";
pub const DEVICE_COMMAND_TOPIC: &str = "device_command";

const DEFAULT_LOG_LIMIT: i64 = 50;
const MAX_LOG_LIMIT: i64 = 500;

pub fn router() -> Router {
    // The first segment is a site id for commands and a device id for logs;
    // sibling routes must share the parameter name.
    Router::new()
        .route("/:id/:device_id/command", post(send_command))
        .route("/:id/logs", post(append_log).get(list_logs))
}

pub async fn send_command(
    Extension(clients): Extension<Arc<Clients>>,
    Path((site_id, device_id)): Path<(String, String)>,
    Json(body): Json<dto::DeviceCommandRequest>,
) -> axum::response::Response {
    let message = body.into_message();
    let placeholders = [("site_id", site_id.as_str()), ("device_id", device_id.as_str())];

    match clients
        .broker
        .publish_to(DEVICE_COMMAND_TOPIC, &placeholders, &message)
        .await
    {
        Ok(topic) => (StatusCode::ACCEPTED, Json(dto::CommandAccepted { topic })).into_response(),
        Err(err) => {
            tracing::warn!(%site_id, %device_id, error = %err, "device command not published");
            errors::broker_error_to_response(err)
        }
    }
}

pub async fn append_log(
    Extension(clients): Extension<Arc<Clients>>,
    Path(device_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let mut entry = match dto::json_to_document(body) {
        Ok(entry) => entry,
        Err(resp) => return resp,
    };
    entry.insert("device_id", device_id);

    let outcome = clients.document.insert(DEVICE_LOGS, entry).await;
    let status = errors::outcome_status(&outcome, StatusCode::CREATED);
    errors::operation_response(status, outcome.into_operation_result())
}

pub async fn list_logs(
    Extension(clients): Extension<Arc<Clients>>,
    Path(device_id): Path<String>,
    Query(query): Query<dto::LogQuery>,
) -> axum::response::Response {
    let params = FindParams {
        sort: Some(doc! { "created_at": -1 }),
        limit: Some(query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)),
        skip: query.skip,
    };

    let outcome = clients
        .document
        .find(DEVICE_LOGS, doc! { "device_id": device_id }, params)
        .await
        .map(|entries| {
            entries
                .into_iter()
                .map(dto::document_to_json)
                .collect::<Vec<_>>()
        });
    let status = errors::outcome_status(&outcome, StatusCode::OK);
    errors::operation_response(status, outcome.into_listing_result())
}
