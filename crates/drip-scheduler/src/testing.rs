//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drip_core::error::{DripError, Result};
use drip_core::ports::{MailSender, SendLogStore, SubscriptionStore};
use drip_core::types::{
    DeliveryReceipt, SendLogEntry, SendStatus, StepDescriptor, Subscription, SubscriptionStatus,
};
use drip_packs::{Pack, PackRegistry, Step};

use crate::batch::BatchCoordinator;
use crate::dispatcher::SubscriptionDispatcher;
use crate::guard::IdempotencyGuard;

/// Active daily-08:00-UTC subscription to the `course` pack.
pub fn subscription(id: &str, created_at: DateTime<Utc>) -> Subscription {
    Subscription {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        pack_key: "course".to_string(),
        timezone: "UTC".to_string(),
        cron_expression: "0 8 * * *".to_string(),
        status: SubscriptionStatus::Active,
        current_step_index: 0,
        created_at,
        updated_at: created_at,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    subs: Mutex<HashMap<String, Subscription>>,
    log: Mutex<Vec<SendLogEntry>>,
    /// `active_ids` fails with a transient error this many times first.
    busy_for: AtomicU32,
    active_id_calls: AtomicU32,
}

impl MemoryStore {
    pub fn insert(&self, sub: Subscription) {
        self.subs.lock().unwrap().insert(sub.id.clone(), sub);
    }

    pub fn get(&self, id: &str) -> Subscription {
        self.subs.lock().unwrap()[id].clone()
    }

    pub fn index_of(&self, id: &str) -> u32 {
        self.get(id).current_step_index
    }

    pub fn status_of(&self, id: &str) -> SubscriptionStatus {
        self.get(id).status
    }

    pub fn log_for(&self, id: &str) -> Vec<SendLogEntry> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == id)
            .cloned()
            .collect()
    }

    pub fn busy_for(&self, times: u32) {
        self.busy_for.store(times, Ordering::SeqCst);
    }

    pub fn active_id_calls(&self) -> u32 {
        self.active_id_calls.load(Ordering::SeqCst)
    }
}

impl SubscriptionStore for MemoryStore {
    fn active_ids(&self) -> Result<Vec<String>> {
        self.active_id_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.busy_for.load(Ordering::SeqCst);
        if remaining > 0 {
            self.busy_for.store(remaining - 1, Ordering::SeqCst);
            return Err(DripError::Transient("capacity exceeded".to_string()));
        }
        let mut ids: Vec<String> = self
            .subs
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn by_ids(&self, ids: &[String]) -> Result<Vec<Subscription>> {
        let subs = self.subs.lock().unwrap();
        Ok(ids.iter().filter_map(|id| subs.get(id).cloned()).collect())
    }

    fn advance_step(&self, id: &str, expected_index: u32, now: DateTime<Utc>) -> Result<bool> {
        let mut subs = self.subs.lock().unwrap();
        let sub = subs
            .get_mut(id)
            .ok_or_else(|| DripError::SubscriptionNotFound { id: id.to_string() })?;
        if sub.current_step_index != expected_index {
            return Ok(false);
        }
        sub.current_step_index += 1;
        sub.updated_at = now;
        Ok(true)
    }

    fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut subs = self.subs.lock().unwrap();
        if let Some(sub) = subs.get_mut(id) {
            if sub.status == SubscriptionStatus::Active {
                sub.status = SubscriptionStatus::Completed;
                sub.updated_at = now;
            }
        }
        Ok(())
    }
}

impl SendLogStore for MemoryStore {
    fn has_succeeded(&self, subscription_id: &str, step_slug: &str) -> Result<bool> {
        Ok(self.log.lock().unwrap().iter().any(|e| {
            e.subscription_id == subscription_id
                && e.step_slug == step_slug
                && e.status == SendStatus::Success
        }))
    }

    fn last_success_at(&self, subscription_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == subscription_id && e.status == SendStatus::Success)
            .map(|e| e.sent_at)
            .max())
    }

    fn append(
        &self,
        subscription_id: &str,
        step_slug: &str,
        status: SendStatus,
        provider_message_id: Option<&str>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        let id = log.len() as i64 + 1;
        log.push(SendLogEntry {
            id,
            subscription_id: subscription_id.to_string(),
            step_slug: step_slug.to_string(),
            status,
            provider_message_id: provider_message_id.map(String::from),
            error: error.map(String::from),
            sent_at: at,
        });
        Ok(())
    }
}

/// Records calls, fails for chosen subscriptions, tracks peak concurrency.
#[derive(Default)]
pub struct FakeMailer {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl FakeMailer {
    pub fn fail_for(&self, subscription_id: &str) {
        self.failing.lock().unwrap().insert(subscription_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailSender for FakeMailer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        step: &StepDescriptor,
    ) -> Result<DeliveryReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&subscription.id) {
            return Err(DripError::Delivery("provider returned 500".to_string()));
        }
        Ok(DeliveryReceipt {
            provider_message_id: format!("{}:{}", subscription.id, step.slug),
        })
    }
}

/// A `course` pack with `steps` steps slugged `step-0`, `step-1`, …
pub fn course(steps: usize) -> PackRegistry {
    let steps = (0..steps)
        .map(|i| Step {
            slug: format!("step-{i}"),
            subject: format!("Step {i}"),
            body: format!("Body {i}"),
        })
        .collect();
    PackRegistry::new(vec![Pack {
        key: "course".to_string(),
        title: "Course".to_string(),
        steps,
    }])
    .unwrap()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<FakeMailer>,
    pub packs: Arc<PackRegistry>,
}

impl Fixture {
    pub fn new(steps: usize) -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            mailer: Arc::new(FakeMailer::default()),
            packs: Arc::new(course(steps)),
        }
    }

    pub fn add(&self, sub: Subscription) -> Subscription {
        self.store.insert(sub.clone());
        sub
    }

    pub fn dispatcher(&self) -> SubscriptionDispatcher {
        SubscriptionDispatcher::new(
            self.store.clone(),
            IdempotencyGuard::new(self.store.clone()),
            self.packs.clone(),
            self.mailer.clone(),
        )
    }

    pub fn coordinator(&self, sub_batch_size: usize, max_failures: usize) -> BatchCoordinator {
        BatchCoordinator::new(
            Arc::new(self.dispatcher()),
            self.store.clone(),
            sub_batch_size,
            max_failures,
        )
    }
}
