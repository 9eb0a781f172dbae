use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use innkeep_core::ConnectionState;
use innkeep_infra::document::bson::{self, Bson, Document};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /devices/:site_id/:device_id/command`.
///
/// Published as-is; `command` is the only required field.
#[derive(Debug, Deserialize)]
pub struct DeviceCommandRequest {
    pub command: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl DeviceCommandRequest {
    pub fn into_message(self) -> JsonValue {
        let mut message = self.extra;
        message.insert("command".to_string(), JsonValue::String(self.command));
        JsonValue::Object(message)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub relational: ConnectionState,
    pub document: ConnectionState,
    pub broker: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub topic: String,
}

// -------------------------
// Mapping helpers
// -------------------------

/// JSON object body → BSON document.
pub fn json_to_document(body: JsonValue) -> Result<Document, axum::response::Response> {
    let JsonValue::Object(map) = body else {
        return Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_body",
            "log entry must be a JSON object",
        ));
    };
    bson::to_document(&map).map_err(|e| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
    })
}

/// BSON document → relaxed extended JSON (ObjectIds as `{"$oid": ..}`).
pub fn document_to_json(document: Document) -> JsonValue {
    Bson::Document(document).into_relaxed_extjson()
}
