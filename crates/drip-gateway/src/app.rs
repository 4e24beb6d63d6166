use axum::{
    routing::{get, post},
    Router,
};
use drip_core::config::DripConfig;
use drip_packs::{PackRegistry, RendererSet};
use drip_scheduler::{
    BatchCoordinator, FanOutController, FanOutPolicy, IdempotencyGuard, SqliteStore,
    SubscriptionDispatcher, WorkerClient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::worker_client::HttpWorkerClient;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: DripConfig,
    pub store: Arc<SqliteStore>,
    /// Runs one chunk in-process; backs the worker endpoint and local mode.
    pub coordinator: Arc<BatchCoordinator>,
    pub controller: FanOutController,
    pub pack_count: usize,
}

impl AppState {
    /// Wire the scheduler stack on top of an open connection.
    ///
    /// The connection is handed to the store, which creates its tables if
    /// they do not exist yet.
    pub fn build(
        config: DripConfig,
        conn: rusqlite::Connection,
        packs: PackRegistry,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::new(conn)?);
        let renderers = Arc::new(RendererSet::default());
        let mailer = drip_mail::build_sender(&config.mail, renderers)?;
        let pack_count = packs.len();

        let dispatcher = SubscriptionDispatcher::new(
            store.clone(),
            IdempotencyGuard::new(store.clone()),
            Arc::new(packs),
            mailer,
        );
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::new(dispatcher),
            store.clone(),
            config.scheduler.sub_batch_size,
            config.scheduler.max_reported_failures,
        ));

        let workers: Option<Arc<dyn WorkerClient>> = match &config.scheduler.worker_url {
            Some(url) => {
                let client: Arc<dyn WorkerClient> = Arc::new(HttpWorkerClient::new(
                    url,
                    config.auth.worker_token.clone(),
                    Duration::from_secs(config.scheduler.worker_timeout_secs),
                )?);
                Some(client)
            }
            None => None,
        };
        info!(
            packs = pack_count,
            mailer = ?config.mail.provider,
            fan_out = workers.is_some(),
            local_threshold = config.scheduler.local_threshold,
            "scheduler ready"
        );

        let controller = FanOutController::new(
            store.clone(),
            coordinator.clone(),
            workers,
            FanOutPolicy::from(&config.scheduler),
        );

        Ok(Self {
            config,
            store,
            coordinator,
            controller,
            pack_count,
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/cron/tick", post(crate::http::tick::tick_handler))
        .route(
            "/internal/process-batch",
            post(crate::http::worker::process_batch_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
