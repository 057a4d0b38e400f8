use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use exportkit_core::{ExportId, ScheduleId};
use exportkit_infra::exports::{ExportError, StorageError};

pub fn export_error_to_response(err: ExportError) -> axum::response::Response {
    let status = match &err {
        ExportError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        ExportError::NotFound => StatusCode::NOT_FOUND,
        ExportError::EmptyResultSet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExportError::Validation(_) => StatusCode::BAD_REQUEST,
        ExportError::Conflict(_) => StatusCode::CONFLICT,
        ExportError::Generation { .. } | ExportError::Storage(_) | ExportError::Store(_) => {
            error!(error = %err, "export request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, err.code(), err.to_string())
}

/// Errors from resolving a signed storage URL.
pub fn storage_error_to_response(err: StorageError) -> axum::response::Response {
    match err {
        StorageError::InvalidSignature => {
            json_error(StatusCode::FORBIDDEN, "invalid_signature", err.to_string())
        }
        StorageError::Expired => json_error(StatusCode::GONE, "link_expired", err.to_string()),
        StorageError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        StorageError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_failure", err.to_string())
        }
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

pub fn parse_export_id(s: &str) -> Result<ExportId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid export id"))
}

pub fn parse_schedule_id(s: &str) -> Result<ScheduleId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid schedule id"))
}
