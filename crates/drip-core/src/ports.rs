//! Collaborator contracts consumed by the scheduler.
//!
//! Storage and step lookup are synchronous (SQLite and an in-memory map);
//! mail delivery crosses the network and is async.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{DeliveryReceipt, SendStatus, StepDescriptor, Subscription};

/// Maps `(pack_key, step_index)` to the step to deliver next.
pub trait StepResolver: Send + Sync {
    /// `Ok(None)` means the sequence is exhausted. An unknown pack is an error.
    fn next(&self, pack_key: &str, step_index: u32) -> Result<Option<StepDescriptor>>;
}

/// Subscription rows as the scheduler sees them.
pub trait SubscriptionStore: Send + Sync {
    /// IDs of every ACTIVE subscription. Lightweight projection, no full rows.
    fn active_ids(&self) -> Result<Vec<String>>;

    /// Load full rows for `ids`. Unknown IDs are silently absent from the result.
    fn by_ids(&self, ids: &[String]) -> Result<Vec<Subscription>>;

    /// Increment `current_step_index` iff it still equals `expected_index`.
    ///
    /// Returns `false` when another invocation already advanced the row.
    fn advance_step(&self, id: &str, expected_index: u32, now: DateTime<Utc>) -> Result<bool>;

    /// Flip an ACTIVE subscription to COMPLETED.
    fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<()>;
}

/// Append-only delivery log; the source of truth for idempotency.
pub trait SendLogStore: Send + Sync {
    fn has_succeeded(&self, subscription_id: &str, step_slug: &str) -> Result<bool>;

    /// Timestamp of the most recent SUCCESS entry, if any.
    fn last_success_at(&self, subscription_id: &str) -> Result<Option<DateTime<Utc>>>;

    fn append(
        &self,
        subscription_id: &str,
        step_slug: &str,
        status: SendStatus,
        provider_message_id: Option<&str>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Renders and sends one step to one subscriber.
#[async_trait]
pub trait MailSender: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        subscription: &Subscription,
        step: &StepDescriptor,
    ) -> Result<DeliveryReceipt>;
}
