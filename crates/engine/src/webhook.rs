//! Webhook delivery.
//!
//! Posts final orchestration outcomes to every project webhook. Deliveries
//! for one orchestration are serialized; distinct orchestrations deliver
//! concurrently. Network errors and 5xx retry with the standard backoff,
//! 4xx are logged and dropped.

use async_trait::async_trait;
use dashmap::DashMap;
use orra_core::{BackoffPolicy, Orchestration, OrchestrationId};
use orra_ports::webhook::{WebhookError, WebhookTransport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct HttpWebhookTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Timeout
                } else {
                    WebhookError::Network(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status(status.as_u16()))
        }
    }
}

pub struct WebhookDeliverer {
    transport: Arc<dyn WebhookTransport>,
    backoff: BackoffPolicy,
    /// Serializes deliveries per orchestration.
    sequencers: Arc<DashMap<OrchestrationId, Arc<Mutex<()>>>>,
}

impl WebhookDeliverer {
    pub fn new(transport: Arc<dyn WebhookTransport>, backoff: BackoffPolicy) -> Self {
        Self {
            transport,
            backoff,
            sequencers: Arc::new(DashMap::new()),
        }
    }

    /// Queue delivery of the orchestration's outcome; returns immediately.
    pub fn deliver(&self, orchestration: &Orchestration, webhooks: Vec<String>) {
        if webhooks.is_empty() {
            debug!(orchestration_id = %orchestration.id, "no webhooks registered");
            return;
        }
        let payload = outcome_payload(orchestration);
        let id = orchestration.id.clone();
        let transport = Arc::clone(&self.transport);
        let backoff = self.backoff.clone();
        let sequencer = Arc::clone(
            &self
                .sequencers
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );

        tokio::spawn(async move {
            let _serialized = sequencer.lock().await;
            for url in webhooks {
                post_with_retry(&*transport, &backoff, &id, &url, &payload).await;
            }
        });
    }
}

/// Payload shape: `{orchestrationID, status, result|error}`.
fn outcome_payload(orchestration: &Orchestration) -> serde_json::Value {
    let mut payload = json!({
        "orchestrationID": orchestration.id,
        "status": orchestration.status.as_outcome(),
    });
    if let Some(output) = &orchestration.output {
        payload["result"] = output.clone();
    }
    if let Some(error) = &orchestration.error {
        payload["error"] = json!(error);
    }
    payload
}

async fn post_with_retry(
    transport: &dyn WebhookTransport,
    backoff: &BackoffPolicy,
    id: &OrchestrationId,
    url: &str,
    payload: &serde_json::Value,
) {
    let mut retry = backoff.state();
    loop {
        match transport.post(url, payload).await {
            Ok(()) => {
                debug!(orchestration_id = %id, url, "webhook delivered");
                return;
            }
            Err(e) if e.is_retryable() => match retry.next_delay() {
                Some(delay) => {
                    warn!(orchestration_id = %id, url, error = %e, "webhook delivery retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(orchestration_id = %id, url, error = %e, "webhook delivery abandoned");
                    return;
                }
            },
            Err(e) => {
                warn!(orchestration_id = %id, url, error = %e, "webhook rejected, not retried");
                return;
            }
        }
    }
}
