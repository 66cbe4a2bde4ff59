//! Webhook Transport Port

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("network error: {0}")]
    Network(String),

    #[error("delivery timed out")]
    Timeout,

    /// Endpoint answered with a non-2xx status.
    #[error("endpoint returned status {0}")]
    Status(u16),
}

impl WebhookError {
    /// Network errors, timeouts and 5xx retry; 4xx are logged and dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Network(_) | WebhookError::Timeout => true,
            WebhookError::Status(code) => *code >= 500,
        }
    }
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError>;
}
