use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::error::Result;
use drip_core::ports::SendLogStore;
use drip_core::types::SendStatus;

/// Send-log view used to prevent re-delivery of a step.
///
/// Only SUCCESS entries count. FAILED entries are informational, so a
/// failed attempt never blocks its own retry.
#[derive(Clone)]
pub struct IdempotencyGuard {
    log: Arc<dyn SendLogStore>,
}

impl IdempotencyGuard {
    pub fn new(log: Arc<dyn SendLogStore>) -> Self {
        Self { log }
    }

    pub fn already_delivered(&self, subscription_id: &str, step_slug: &str) -> Result<bool> {
        self.log.has_succeeded(subscription_id, step_slug)
    }

    /// Canonical "last successful send" instant for the due-time check.
    pub fn last_success_at(&self, subscription_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.log.last_success_at(subscription_id)
    }

    pub fn record_success(
        &self,
        subscription_id: &str,
        step_slug: &str,
        provider_message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.log.append(
            subscription_id,
            step_slug,
            SendStatus::Success,
            Some(provider_message_id),
            None,
            at,
        )
    }

    pub fn record_failure(
        &self,
        subscription_id: &str,
        step_slug: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.log
            .append(subscription_id, step_slug, SendStatus::Failed, None, Some(error), at)
    }
}
