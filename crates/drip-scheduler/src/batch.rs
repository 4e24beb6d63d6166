use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::ports::SubscriptionStore;
use drip_core::types::Subscription;
use drip_core::wire::BatchSummary;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchOutcome, SubscriptionDispatcher};
use crate::error::Result;

/// Drives the dispatcher over a list of subscription IDs in bounded
/// sub-batches.
///
/// Within a sub-batch every dispatch runs concurrently and is awaited to
/// completion: `join_all` over futures that each resolve to their own
/// `Result` (panics included) means one failure can neither cancel nor
/// delay its siblings. Sub-batches run one after another, which caps
/// concurrent mail-provider calls and DB writes at `sub_batch_size`.
pub struct BatchCoordinator {
    dispatcher: Arc<SubscriptionDispatcher>,
    subscriptions: Arc<dyn SubscriptionStore>,
    sub_batch_size: usize,
    max_failures: usize,
}

enum ItemResult {
    Done(DispatchOutcome),
    Failed { step_slug: String, error: String },
}

impl BatchCoordinator {
    pub fn new(
        dispatcher: Arc<SubscriptionDispatcher>,
        subscriptions: Arc<dyn SubscriptionStore>,
        sub_batch_size: usize,
        max_failures: usize,
    ) -> Self {
        Self {
            dispatcher,
            subscriptions,
            sub_batch_size: sub_batch_size.max(1),
            max_failures,
        }
    }

    /// Process `ids` at instant `now`. Empty input does no I/O.
    pub async fn process_batch(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
        step_minutes: Option<u32>,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        if ids.is_empty() {
            return Ok(summary);
        }

        let subs = self.subscriptions.by_ids(ids)?;
        if subs.len() < ids.len() {
            debug!(
                requested = ids.len(),
                found = subs.len(),
                "some subscription ids no longer exist"
            );
        }

        for chunk in subs.chunks(self.sub_batch_size) {
            let results = join_all(chunk.iter().map(|sub| self.run_one(sub, now, step_minutes))).await;

            for (sub, result) in chunk.iter().zip(results) {
                match result {
                    ItemResult::Done(DispatchOutcome::Sent { .. }) => summary.sent += 1,
                    ItemResult::Done(DispatchOutcome::Skipped(_)) => summary.skipped += 1,
                    ItemResult::Done(DispatchOutcome::Completed) => summary.completed += 1,
                    ItemResult::Failed { step_slug, error } => {
                        self.log_failure(sub, &step_slug, &error, now);
                        summary.record_failure(&sub.id, &error, self.max_failures);
                    }
                }
            }
        }

        info!(
            ids = ids.len(),
            sent = summary.sent,
            skipped = summary.skipped,
            completed = summary.completed,
            errors = summary.errors,
            "batch processed"
        );
        Ok(summary)
    }

    async fn run_one(
        &self,
        sub: &Subscription,
        now: DateTime<Utc>,
        step_minutes: Option<u32>,
    ) -> ItemResult {
        let fut = self.dispatcher.process(sub, now, step_minutes);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(outcome)) => ItemResult::Done(outcome),
            Ok(Err(e)) => ItemResult::Failed {
                step_slug: e.step_slug.clone(),
                error: e.to_string(),
            },
            Err(_) => {
                error!(subscription_id = %sub.id, "dispatcher panicked");
                ItemResult::Failed {
                    step_slug: format!("unresolved:{}", sub.current_step_index),
                    error: "internal error: dispatcher panicked".to_string(),
                }
            }
        }
    }

    /// FAILED entries are written here, never by the dispatcher.
    fn log_failure(&self, sub: &Subscription, step_slug: &str, error: &str, now: DateTime<Utc>) {
        warn!(subscription_id = %sub.id, %step_slug, %error, "dispatch failed");
        if let Err(e) = self
            .dispatcher
            .guard()
            .record_failure(&sub.id, step_slug, error, now)
        {
            // the failure is still counted; only the informational row is lost
            error!(subscription_id = %sub.id, "could not write FAILED send-log entry: {e}");
        }
    }
}
