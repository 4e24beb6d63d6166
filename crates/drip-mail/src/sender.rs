use std::sync::Arc;

use async_trait::async_trait;
use drip_core::config::{MailConfig, MailProvider};
use drip_core::error::{DripError, Result};
use drip_core::ports::MailSender;
use drip_core::types::{DeliveryReceipt, StepDescriptor, Subscription};
use drip_packs::RendererSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Sends through a JSON transactional-email API.
///
/// Request: `{from, to, subject, html, text}` with bearer auth.
/// Response: `{"id": "<provider message id>"}`.
pub struct HttpMailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
    renderers: Arc<RendererSet>,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ProviderResponse {
    id: String,
}

impl HttpMailSender {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        from: String,
        renderers: Arc<RendererSet>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            from,
            renderers,
        }
    }
}

#[async_trait]
impl MailSender for HttpMailSender {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        step: &StepDescriptor,
    ) -> Result<DeliveryReceipt> {
        let email = self.renderers.render(subscription, step)?;
        let body = OutboundMessage {
            from: &self.from,
            to: &subscription.email,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        debug!(subscription_id = %subscription.id, step_slug = %step.slug, "sending to mail provider");

        let mut builder = self
            .client
            .post(&self.endpoint)
            // providers that honour it drop duplicates of a retried request
            .header("idempotency-key", format!("{}:{}", subscription.id, step.slug))
            .json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| DripError::Delivery(format!("mail provider unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "mail provider rejected message");
            return Err(DripError::Delivery(format!(
                "mail provider returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ProviderResponse = resp
            .json()
            .await
            .map_err(|e| DripError::Delivery(format!("unreadable mail provider response: {e}")))?;

        Ok(DeliveryReceipt {
            provider_message_id: parsed.id,
        })
    }
}

/// Renders and logs instead of sending. Useful for local runs and demos.
pub struct LogMailSender {
    renderers: Arc<RendererSet>,
}

impl LogMailSender {
    pub fn new(renderers: Arc<RendererSet>) -> Self {
        Self { renderers }
    }
}

#[async_trait]
impl MailSender for LogMailSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        step: &StepDescriptor,
    ) -> Result<DeliveryReceipt> {
        let email = self.renderers.render(subscription, step)?;
        let id = uuid::Uuid::new_v4().to_string();
        info!(
            to = %subscription.email,
            subject = %email.subject,
            step_slug = %step.slug,
            message_id = %id,
            "mail (log provider)"
        );
        Ok(DeliveryReceipt {
            provider_message_id: id,
        })
    }
}

/// Build the configured sender.
pub fn build_sender(config: &MailConfig, renderers: Arc<RendererSet>) -> Result<Arc<dyn MailSender>> {
    match config.provider {
        MailProvider::Log => Ok(Arc::new(LogMailSender::new(renderers))),
        MailProvider::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                DripError::Config("mail.endpoint is required for the http provider".to_string())
            })?;
            Ok(Arc::new(HttpMailSender::new(
                endpoint,
                config.api_key.clone(),
                config.from.clone(),
                renderers,
            )))
        }
    }
}
