pub mod health;
pub mod tick;
pub mod worker;

use axum::{http::StatusCode, Json};
use drip_scheduler::SchedulerError;
use serde_json::{json, Value};
use tracing::warn;

type ErrorResponse = (StatusCode, Json<Value>);

/// Busy storage is 503 so the trigger can retry; everything else is 500.
fn scheduler_error(e: &SchedulerError) -> ErrorResponse {
    let status = if e.is_busy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({"error": e.code(), "message": e.to_string()})))
}

fn auth_error(reason: &str) -> ErrorResponse {
    warn!(reason = %reason, "request authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication failed", "reason": reason})),
    )
}

fn bad_request(reason: String) -> ErrorResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid request body", "reason": reason})),
    )
}
