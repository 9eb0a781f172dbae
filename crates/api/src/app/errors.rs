use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;

use innkeep_core::{OperationResult, Outcome};
use innkeep_infra::messaging::BrokerError;

pub fn broker_error_to_response(err: BrokerError) -> axum::response::Response {
    match err {
        BrokerError::NotConnected => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "not_connected",
            "device broker is not connected",
        ),
        BrokerError::UnknownTopic(name) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "topic_not_configured",
            format!("no topic template named '{name}'"),
        ),
        BrokerError::Topic(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_topic", msg),
        BrokerError::Serialize(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_payload", msg),
        other => json_error(StatusCode::BAD_GATEWAY, "publish_error", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Status for a best-effort outcome: `ok` on success, 503 when degraded, 500 on failure.
pub fn outcome_status<T>(outcome: &Outcome<T>, ok: StatusCode) -> StatusCode {
    match outcome {
        Outcome::Ok(_) => ok,
        Outcome::Degraded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn operation_response<T: Serialize>(
    status: StatusCode,
    result: OperationResult<T>,
) -> axum::response::Response {
    (status, axum::Json(result)).into_response()
}
