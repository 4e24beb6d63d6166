//! Fan-out wire contract and invocation summaries.
//!
//! Field names are camelCase on the wire; workers and the controller must
//! agree on them exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of a worker invocation: one chunk of subscription IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub subscription_ids: Vec<String>,
    pub now: DateTime<Utc>,
    pub step_minutes_override: Option<u32>,
}

/// One subscription that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub subscription_id: String,
    pub error: String,
}

/// Aggregate counts for one `process_batch` run. Also the worker response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub sent: usize,
    pub skipped: usize,
    pub completed: usize,
    pub errors: usize,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl BatchSummary {
    /// Count a failure; keep its detail only while under `cap` entries.
    pub fn record_failure(&mut self, subscription_id: &str, error: &str, cap: usize) {
        self.errors += 1;
        if self.failures.len() < cap {
            self.failures.push(FailureRecord {
                subscription_id: subscription_id.to_string(),
                error: error.to_string(),
            });
        }
    }

    /// Fold another summary into this one, truncating the failure list at `cap`.
    pub fn absorb(&mut self, other: BatchSummary, cap: usize) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.completed += other.completed;
        self.errors += other.errors;
        let room = cap.saturating_sub(self.failures.len());
        self.failures.extend(other.failures.into_iter().take(room));
    }
}

/// A fan-out chunk whose worker never produced a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFailure {
    /// Zero-based position of the chunk in the dispatch order.
    pub chunk: usize,
    /// Number of subscriptions in the chunk; all of them count as errors.
    pub size: usize,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Local,
    FanOut,
}

/// Top-level result of one scheduler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
    pub mode: ExecutionMode,
    /// Number of active subscription IDs fetched for this invocation.
    pub active: usize,
    #[serde(flatten)]
    pub totals: BatchSummary,
    #[serde(default)]
    pub worker_failures: Vec<WorkerFailure>,
}

/// Optional body of a trigger request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRequest {
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub step_minutes_override: Option<u32>,
}
