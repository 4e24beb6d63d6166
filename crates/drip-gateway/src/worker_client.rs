use std::time::Duration;

use async_trait::async_trait;
use drip_core::error::{DripError, Result};
use drip_core::wire::{BatchRequest, BatchSummary};
use drip_scheduler::WorkerClient;
use tracing::{debug, warn};

/// Invokes `POST {base}/internal/process-batch` on a worker instance.
///
/// Any worker running this same binary can serve the call; a load
/// balancer in front of `base` spreads chunks across instances.
pub struct HttpWorkerClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpWorkerClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DripError::Config(format!("worker http client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/internal/process-batch", base_url.trim_end_matches('/')),
            token,
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn run_chunk(&self, req: &BatchRequest) -> Result<BatchSummary> {
        debug!(url = %self.url, size = req.subscription_ids.len(), "invoking worker");

        let mut builder = self.client.post(&self.url).json(req);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| DripError::Worker(format!("request failed: {e}")))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "worker returned an error");
            return Err(DripError::Worker(format!("worker returned {status}: {text}")));
        }

        resp.json::<BatchSummary>()
            .await
            .map_err(|e| DripError::Worker(format!("malformed worker response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn request() -> BatchRequest {
        BatchRequest {
            subscription_ids: vec!["a".to_string(), "b".to_string()],
            now: Utc::now(),
            step_minutes_override: None,
        }
    }

    #[tokio::test]
    async fn parses_worker_summary() {
        let router = Router::new().route(
            "/internal/process-batch",
            post(|Json(body): Json<Value>| async move {
                let n = body["subscriptionIds"].as_array().map_or(0, |a| a.len());
                Json(json!({"sent": n, "skipped": 0, "completed": 0, "errors": 0, "failures": []}))
            }),
        );
        let base = serve(router).await;
        let client = HttpWorkerClient::new(&format!("{base}/"), None, Duration::from_secs(5)).unwrap();

        let summary = client.run_chunk(&request()).await.unwrap();
        assert_eq!(summary.sent, 2);
    }

    #[tokio::test]
    async fn non_success_status_is_a_worker_error() {
        let router = Router::new().route(
            "/internal/process-batch",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "BUSY"}))) }),
        );
        let base = serve(router).await;
        let client = HttpWorkerClient::new(&base, None, Duration::from_secs(5)).unwrap();

        let err = client.run_chunk(&request()).await.unwrap_err();
        assert_eq!(err.code(), "WORKER_ERROR");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn missing_counters_are_rejected() {
        let router = Router::new().route(
            "/internal/process-batch",
            post(|| async { Json(json!({"ok": true})) }),
        );
        let base = serve(router).await;
        let client = HttpWorkerClient::new(&base, None, Duration::from_secs(5)).unwrap();

        let err = client.run_chunk(&request()).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
