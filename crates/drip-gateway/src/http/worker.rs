//! Fan-out worker entry point: POST /internal/process-batch.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use drip_core::wire::{BatchRequest, BatchSummary};
use std::sync::Arc;
use tracing::{info, warn};

use super::{auth_error, bad_request, scheduler_error, ErrorResponse};
use crate::app::AppState;
use crate::auth::verify_bearer;

/// Runs the batch coordinator over the posted chunk and replies with its
/// summary. Per-subscription failures are inside the summary; a non-2xx
/// reply means the chunk as a whole was not processed.
pub async fn process_batch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BatchSummary>, ErrorResponse> {
    verify_bearer(&headers, state.config.auth.worker_token.as_deref())
        .map_err(|e| auth_error(&e))?;

    let req: BatchRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid batch request");
        bad_request(e.to_string())
    })?;

    let summary = state
        .coordinator
        .process_batch(&req.subscription_ids, req.now, req.step_minutes_override)
        .await
        .map_err(|e| {
            warn!(size = req.subscription_ids.len(), "worker batch failed: {e}");
            scheduler_error(&e)
        })?;

    info!(
        size = req.subscription_ids.len(),
        sent = summary.sent,
        errors = summary.errors,
        "worker batch complete"
    );
    Ok(Json(summary))
}
