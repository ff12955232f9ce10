use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tallyerp_core::{ConflictDetail, ConflictKind, StateViolation};
use tallyerp_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DispatchError::State(violation) => state_error(&violation),
        DispatchError::Conflict(detail) => conflict_error(&detail),
        DispatchError::Contention(msg) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": ConflictKind::Contention.as_code(),
                "message": msg,
                "retryable": true,
            })),
        )
            .into_response(),
        DispatchError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DispatchError::TenantIsolation(msg) => {
            tracing::error!(error = %msg, "tenant isolation violation");
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        DispatchError::Deserialize(msg) => internal(msg),
        DispatchError::Store(e) => internal(e.to_string()),
        DispatchError::Internal(msg) => internal(msg),
    }
}

fn state_error(violation: &StateViolation) -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "error": "state_error",
            "message": violation.message,
            "documentType": violation.document_type,
            "status": violation.status,
            "action": violation.action,
        })),
    )
        .into_response()
}

fn conflict_error(detail: &ConflictDetail) -> axum::response::Response {
    let status = match detail.kind {
        ConflictKind::Duplicate | ConflictKind::Contention => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let mut body = json!({
        "error": detail.kind.as_code(),
        "message": detail.message,
        "retryable": detail.is_retryable(),
    });
    if let Some(field) = &detail.field {
        body["field"] = json!(field);
    }
    if let Some(attempted) = detail.attempted {
        body["attempted"] = json!(attempted);
    }
    if let Some(limit) = detail.limit {
        body["limit"] = json!(limit);
    }
    if let Some(range) = detail.range {
        body["range"] = json!({ "min": range.min, "max": range.max });
    }

    (status, axum::Json(body)).into_response()
}

fn internal(msg: String) -> axum::response::Response {
    tracing::error!(error = %msg, "internal error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
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

/// Parse a path/query identifier, answering `invalid_id` on failure.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}
