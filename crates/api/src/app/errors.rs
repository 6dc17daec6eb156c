use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use invrecon_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    if !matches!(err, EngineError::Transport(_)) {
        tracing::warn!(kind = err.kind(), error = %err, "request rejected");
    }
    match err {
        EngineError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        EngineError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        e @ EngineError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        EngineError::Transport(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "transport_error", msg)
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

/// Parse a path or body id, answering 400 `invalid_id` on failure.
pub fn parse_id<T>(raw: &str, what: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr,
{
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}
