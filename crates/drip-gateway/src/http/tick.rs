//! Scheduler trigger: POST /cron/tick.
//!
//! Called once a minute by an external cron. The body is optional; an
//! empty body means "now, with the configured step override".

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use drip_core::wire::{InvocationSummary, TickRequest};
use std::sync::Arc;
use tracing::{info, warn};

use super::{auth_error, bad_request, scheduler_error, ErrorResponse};
use crate::app::AppState;
use crate::auth::verify_bearer;

pub async fn tick_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InvocationSummary>, ErrorResponse> {
    verify_bearer(&headers, state.config.auth.trigger_token.as_deref())
        .map_err(|e| auth_error(&e))?;

    let req: TickRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TickRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(e.to_string()))?
    };

    let now = req.now.unwrap_or_else(Utc::now);
    let step_minutes = req
        .step_minutes_override
        .or(state.config.scheduler.step_minutes_override);

    let summary = state
        .controller
        .run(now, step_minutes)
        .await
        .map_err(|e| {
            warn!(code = e.code(), "scheduler invocation failed: {e}");
            scheduler_error(&e)
        })?;

    info!(
        mode = ?summary.mode,
        active = summary.active,
        sent = summary.totals.sent,
        errors = summary.totals.errors,
        "tick complete"
    );
    Ok(Json(summary))
}
