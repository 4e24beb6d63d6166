use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::error::DripError;
use drip_core::ports::{MailSender, StepResolver, SubscriptionStore};
use drip_core::types::{Subscription, SubscriptionStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::due::is_subscription_due;
use crate::error::SchedulerError;
use crate::guard::IdempotencyGuard;

/// What happened to one subscription in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The step was delivered and the index advanced.
    Sent {
        step_slug: String,
        provider_message_id: String,
    },
    Skipped(SkipReason),
    /// No step left; the subscription is now COMPLETED.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not ACTIVE; never delivered to.
    Inactive,
    NotDue,
    /// A SUCCESS entry already exists; the index was advanced without sending.
    AlreadySent { step_slug: String },
}

/// A dispatch that failed, tagged with the step it was working on so the
/// caller can log the failure against it.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct DispatchError {
    /// The resolved step slug, or `unresolved:<index>` if resolution failed.
    pub step_slug: String,
    pub source: SchedulerError,
}

impl DispatchError {
    fn new(step_slug: impl Into<String>, source: impl Into<SchedulerError>) -> Self {
        Self {
            step_slug: step_slug.into(),
            source: source.into(),
        }
    }
}

/// Runs one subscription through due-check, step resolution, idempotency
/// check, delivery and progress update.
///
/// Failures never mutate state: no log entry, no index change. Recording
/// the FAILED entry is the batch coordinator's job.
pub struct SubscriptionDispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    guard: IdempotencyGuard,
    steps: Arc<dyn StepResolver>,
    mailer: Arc<dyn MailSender>,
}

impl SubscriptionDispatcher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        guard: IdempotencyGuard,
        steps: Arc<dyn StepResolver>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            subscriptions,
            guard,
            steps,
            mailer,
        }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub async fn process(
        &self,
        sub: &Subscription,
        now: DateTime<Utc>,
        step_minutes: Option<u32>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let unresolved = || format!("unresolved:{}", sub.current_step_index);

        if sub.status != SubscriptionStatus::Active {
            debug!(subscription_id = %sub.id, status = %sub.status, "not active, skipping");
            return Ok(DispatchOutcome::Skipped(SkipReason::Inactive));
        }

        // elapsed mode never looks at the send log
        let last_success = match step_minutes {
            Some(_) => None,
            None => self
                .guard
                .last_success_at(&sub.id)
                .map_err(|e| DispatchError::new(unresolved(), e))?,
        };
        if !is_subscription_due(sub, now, last_success, step_minutes) {
            return Ok(DispatchOutcome::Skipped(SkipReason::NotDue));
        }

        let step = self
            .steps
            .next(&sub.pack_key, sub.current_step_index)
            .map_err(|e| DispatchError::new(unresolved(), e))?;

        let Some(step) = step else {
            self.subscriptions
                .mark_completed(&sub.id, now)
                .map_err(|e| DispatchError::new(unresolved(), e))?;
            info!(subscription_id = %sub.id, pack = %sub.pack_key, "sequence exhausted, subscription completed");
            return Ok(DispatchOutcome::Completed);
        };

        let already = self
            .guard
            .already_delivered(&sub.id, &step.slug)
            .map_err(|e| DispatchError::new(&step.slug, e))?;
        if already {
            self.advance(sub, now)
                .map_err(|e| DispatchError::new(&step.slug, e))?;
            info!(subscription_id = %sub.id, step_slug = %step.slug, "step already delivered, advancing");
            return Ok(DispatchOutcome::Skipped(SkipReason::AlreadySent {
                step_slug: step.slug,
            }));
        }

        let receipt = self
            .mailer
            .deliver(sub, &step)
            .await
            .map_err(|e| DispatchError::new(&step.slug, delivery_error(e)))?;

        self.guard
            .record_success(&sub.id, &step.slug, &receipt.provider_message_id, now)
            .map_err(|e| {
                warn!(subscription_id = %sub.id, step_slug = %step.slug, "delivered but SUCCESS entry not written: {e}");
                DispatchError::new(&step.slug, e)
            })?;
        self.advance(sub, now)
            .map_err(|e| DispatchError::new(&step.slug, e))?;

        info!(
            subscription_id = %sub.id,
            step_slug = %step.slug,
            message_id = %receipt.provider_message_id,
            mailer = self.mailer.name(),
            "step delivered"
        );
        Ok(DispatchOutcome::Sent {
            step_slug: step.slug,
            provider_message_id: receipt.provider_message_id,
        })
    }

    fn advance(&self, sub: &Subscription, now: DateTime<Utc>) -> drip_core::error::Result<()> {
        let advanced = self
            .subscriptions
            .advance_step(&sub.id, sub.current_step_index, now)?;
        if !advanced {
            debug!(subscription_id = %sub.id, "index already advanced by an overlapping invocation");
        }
        Ok(())
    }
}

fn delivery_error(e: DripError) -> SchedulerError {
    match e {
        DripError::Delivery(msg) => SchedulerError::Delivery(msg),
        other => SchedulerError::Core(other),
    }
}
