use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drip_core::config::SchedulerConfig;
use drip_core::error::DripError;
use drip_core::ports::SubscriptionStore;
use drip_core::wire::{BatchRequest, BatchSummary, ExecutionMode, InvocationSummary, WorkerFailure};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::batch::BatchCoordinator;
use crate::error::{Result, SchedulerError};

/// Remote executor for one chunk of subscription IDs.
///
/// Implementations invoke an isolated worker that runs the batch
/// coordinator over `req.subscription_ids` and replies with its summary.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn run_chunk(&self, req: &BatchRequest) -> drip_core::Result<BatchSummary>;
}

#[derive(Debug, Clone)]
pub struct FanOutPolicy {
    /// Populations at or below this run in-process; above it, chunk size.
    pub local_threshold: usize,
    pub max_failures: usize,
    pub fetch_attempts: u32,
    /// Delay before the first retry, doubled on each further one.
    pub fetch_backoff: Duration,
}

impl From<&SchedulerConfig> for FanOutPolicy {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            local_threshold: cfg.local_threshold.max(1),
            max_failures: cfg.max_reported_failures,
            fetch_attempts: cfg.fetch_attempts.max(1),
            fetch_backoff: Duration::from_millis(cfg.fetch_backoff_ms),
        }
    }
}

/// Entry point of one scheduler invocation.
///
/// Fetches the active population, then either runs it through the local
/// batch coordinator or splits it into chunks and hands each chunk to a
/// worker. All chunks are awaited; a failed chunk is reported, never
/// allowed to abort the others.
pub struct FanOutController {
    subscriptions: Arc<dyn SubscriptionStore>,
    coordinator: Arc<BatchCoordinator>,
    workers: Option<Arc<dyn WorkerClient>>,
    policy: FanOutPolicy,
}

impl FanOutController {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        coordinator: Arc<BatchCoordinator>,
        workers: Option<Arc<dyn WorkerClient>>,
        policy: FanOutPolicy,
    ) -> Self {
        Self {
            subscriptions,
            coordinator,
            workers,
            policy,
        }
    }

    pub async fn run(
        &self,
        now: DateTime<Utc>,
        step_minutes: Option<u32>,
    ) -> Result<InvocationSummary> {
        let ids = self.fetch_active_ids().await?;
        let active = ids.len();

        let workers = match &self.workers {
            Some(w) if active > self.policy.local_threshold => w.clone(),
            _ => {
                info!(active, mode = "local", "scheduler invocation started");
                let totals = self.coordinator.process_batch(&ids, now, step_minutes).await?;
                return Ok(InvocationSummary {
                    mode: ExecutionMode::Local,
                    active,
                    totals,
                    worker_failures: Vec::new(),
                });
            }
        };

        let chunks: Vec<&[String]> = ids.chunks(self.policy.local_threshold).collect();
        info!(active, chunks = chunks.len(), mode = "fan_out", "scheduler invocation started");

        let calls = chunks.iter().map(|chunk| {
            let workers = workers.clone();
            let req = BatchRequest {
                subscription_ids: chunk.to_vec(),
                now,
                step_minutes_override: step_minutes,
            };
            async move { workers.run_chunk(&req).await }
        });
        let results = join_all(calls).await;

        let mut totals = BatchSummary::default();
        let mut worker_failures = Vec::new();
        for (index, (chunk, result)) in chunks.iter().zip(results).enumerate() {
            match result {
                Ok(summary) => totals.absorb(summary, self.policy.max_failures),
                Err(e) => {
                    warn!(chunk = index, size = chunk.len(), "worker chunk failed: {e}");
                    // the chunk's subscriptions were not confirmed processed
                    totals.errors += chunk.len();
                    if worker_failures.len() < self.policy.max_failures {
                        worker_failures.push(WorkerFailure {
                            chunk: index,
                            size: chunk.len(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            active,
            sent = totals.sent,
            skipped = totals.skipped,
            completed = totals.completed,
            errors = totals.errors,
            failed_chunks = worker_failures.len(),
            "fan-out finished"
        );
        Ok(InvocationSummary {
            mode: ExecutionMode::FanOut,
            active,
            totals,
            worker_failures,
        })
    }

    /// Read the active IDs, retrying transient storage errors with
    /// exponential backoff.
    async fn fetch_active_ids(&self) -> Result<Vec<String>> {
        let attempts = self.policy.fetch_attempts;
        let mut delay = self.policy.fetch_backoff;
        let mut attempt = 1;
        loop {
            match self.subscriptions.active_ids() {
                Ok(ids) => return Ok(ids),
                Err(DripError::Transient(reason)) if attempt < attempts => {
                    warn!(attempt, max = attempts, ?delay, "storage busy fetching active subscriptions: {reason}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(DripError::Transient(reason)) => {
                    warn!(attempts, "storage still busy, giving up: {reason}");
                    return Err(SchedulerError::Busy { attempts, reason });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{subscription, Fixture};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
    }

    fn policy(local_threshold: usize) -> FanOutPolicy {
        FanOutPolicy {
            local_threshold,
            max_failures: 20,
            fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(1),
        }
    }

    fn populate(fx: &Fixture, n: usize) {
        for i in 0..n {
            fx.add(subscription(&format!("s-{i:03}"), t(7, 0)));
        }
    }

    /// Runs chunks in-process against a shared coordinator, optionally
    /// failing chosen chunk positions.
    struct InProcessWorker {
        coordinator: Arc<BatchCoordinator>,
        calls: AtomicUsize,
        chunk_sizes: Mutex<Vec<usize>>,
        fail_containing: Option<String>,
    }

    impl InProcessWorker {
        fn new(coordinator: Arc<BatchCoordinator>) -> Self {
            Self {
                coordinator,
                calls: AtomicUsize::new(0),
                chunk_sizes: Mutex::new(Vec::new()),
                fail_containing: None,
            }
        }
    }

    #[async_trait]
    impl WorkerClient for InProcessWorker {
        async fn run_chunk(&self, req: &BatchRequest) -> drip_core::Result<BatchSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.chunk_sizes.lock().unwrap().push(req.subscription_ids.len());
            if let Some(marker) = &self.fail_containing {
                if req.subscription_ids.contains(marker) {
                    return Err(DripError::Worker("worker returned 502".to_string()));
                }
            }
            self.coordinator
                .process_batch(&req.subscription_ids, req.now, req.step_minutes_override)
                .await
                .map_err(|e| DripError::Worker(e.to_string()))
        }
    }

    #[tokio::test]
    async fn small_population_runs_locally() {
        let fx = Fixture::new(3);
        populate(&fx, 4);
        let coordinator = Arc::new(fx.coordinator(5, 20));
        let worker = Arc::new(InProcessWorker::new(coordinator.clone()));
        let controller =
            FanOutController::new(fx.store.clone(), coordinator, Some(worker.clone()), policy(10));

        let summary = controller.run(t(9, 0), None).await.unwrap();

        assert_eq!(summary.mode, ExecutionMode::Local);
        assert_eq!(summary.active, 4);
        assert_eq!(summary.totals.sent, 4);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn large_population_without_workers_still_runs_locally() {
        let fx = Fixture::new(3);
        populate(&fx, 12);
        let controller =
            FanOutController::new(fx.store.clone(), Arc::new(fx.coordinator(5, 20)), None, policy(5));

        let summary = controller.run(t(9, 0), None).await.unwrap();

        assert_eq!(summary.mode, ExecutionMode::Local);
        assert_eq!(summary.totals.sent, 12);
    }

    #[tokio::test]
    async fn fan_out_matches_local_totals() {
        let local_fx = Fixture::new(3);
        populate(&local_fx, 23);
        let local = FanOutController::new(
            local_fx.store.clone(),
            Arc::new(local_fx.coordinator(5, 20)),
            None,
            policy(10),
        )
        .run(t(9, 0), None)
        .await
        .unwrap();

        let fx = Fixture::new(3);
        populate(&fx, 23);
        let coordinator = Arc::new(fx.coordinator(5, 20));
        let worker = Arc::new(InProcessWorker::new(coordinator.clone()));
        let fanned = FanOutController::new(fx.store.clone(), coordinator, Some(worker.clone()), policy(10))
            .run(t(9, 0), None)
            .await
            .unwrap();

        assert_eq!(fanned.mode, ExecutionMode::FanOut);
        assert_eq!(fanned.totals, local.totals);
        assert_eq!(fanned.totals.sent, 23);
        let mut sizes = worker.chunk_sizes.lock().unwrap().clone();
        sizes.sort();
        assert_eq!(sizes, vec![3, 10, 10]);
    }

    #[tokio::test]
    async fn failed_chunk_is_reported_and_others_complete() {
        let fx = Fixture::new(3);
        populate(&fx, 25);
        let coordinator = Arc::new(fx.coordinator(5, 20));
        let mut worker = InProcessWorker::new(coordinator.clone());
        worker.fail_containing = Some("s-012".to_string());
        let controller =
            FanOutController::new(fx.store.clone(), coordinator, Some(Arc::new(worker)), policy(10));

        let summary = controller.run(t(9, 0), None).await.unwrap();

        assert_eq!(summary.totals.sent, 15);
        assert_eq!(summary.totals.errors, 10);
        assert_eq!(summary.worker_failures.len(), 1);
        assert_eq!(summary.worker_failures[0].chunk, 1);
        assert_eq!(summary.worker_failures[0].size, 10);
        // the failed chunk's subscriptions are picked up next minute
        assert_eq!(fx.store.index_of("s-012"), 0);
        assert_eq!(fx.store.index_of("s-020"), 1);
    }

    #[tokio::test]
    async fn transient_fetch_error_is_retried() {
        let fx = Fixture::new(3);
        populate(&fx, 2);
        fx.store.busy_for(2);
        let controller =
            FanOutController::new(fx.store.clone(), Arc::new(fx.coordinator(5, 20)), None, policy(10));

        let summary = controller.run(t(9, 0), None).await.unwrap();

        assert_eq!(summary.totals.sent, 2);
        assert_eq!(fx.store.active_id_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_busy_without_processing() {
        let fx = Fixture::new(3);
        populate(&fx, 2);
        fx.store.busy_for(10);
        let controller =
            FanOutController::new(fx.store.clone(), Arc::new(fx.coordinator(5, 20)), None, policy(10));

        let err = controller.run(t(9, 0), None).await.unwrap_err();

        assert!(err.is_busy());
        assert_eq!(err.code(), "BUSY");
        assert_eq!(fx.store.active_id_calls(), 3);
        assert_eq!(fx.mailer.calls(), 0);
    }

    #[tokio::test]
    async fn step_minutes_override_reaches_workers() {
        let fx = Fixture::new(3);
        populate(&fx, 11);
        let coordinator = Arc::new(fx.coordinator(5, 20));
        let worker = Arc::new(InProcessWorker::new(coordinator.clone()));
        let controller =
            FanOutController::new(fx.store.clone(), coordinator, Some(worker), policy(10));

        // created 07:00, 08:00 cron not yet fired at 07:30; elapsed mode makes them due
        let summary = controller.run(t(7, 30), Some(1)).await.unwrap();

        assert_eq!(summary.mode, ExecutionMode::FanOut);
        assert_eq!(summary.totals.sent, 11);
    }

    #[test]
    fn policy_from_config() {
        let cfg = SchedulerConfig::default();
        let p = FanOutPolicy::from(&cfg);
        assert_eq!(p.local_threshold, 100);
        assert_eq!(p.fetch_attempts, 3);
        assert_eq!(p.fetch_backoff, Duration::from_millis(250));
    }
}
