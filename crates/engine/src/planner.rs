//! HTTP client for the planning oracle.
//!
//! One POST per plan with a bounded timeout and up to two retries on
//! transient failures (connect errors, timeouts, 5xx). 4xx and malformed
//! bodies fail immediately.

use async_trait::async_trait;
use orra_core::BackoffPolicy;
use orra_ports::planner::{PlanDraft, Planner, PlannerError, ServiceDescriptor};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanRequest<'a> {
    action: &'a str,
    data: &'a serde_json::Value,
    services: &'a [ServiceDescriptor],
}

pub struct HttpPlanner {
    client: reqwest::Client,
    config: PlannerConfig,
    backoff: BackoffPolicy,
}

impl HttpPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            backoff: BackoffPolicy::default(),
        }
    }

    async fn attempt(
        &self,
        request: &PlanRequest<'_>,
    ) -> Result<PlanDraft, PlannerError> {
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlannerError::Timeout
                } else {
                    PlannerError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PlannerError::Transport(format!(
                "oracle returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(PlannerError::InvalidResponse(format!(
                "oracle returned {status}"
            )));
        }

        response
            .json::<PlanDraft>()
            .await
            .map_err(|e| PlannerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(
        &self,
        action: &str,
        input: &serde_json::Value,
        services: &[ServiceDescriptor],
    ) -> Result<PlanDraft, PlannerError> {
        let request = PlanRequest {
            action,
            data: input,
            services,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&request).await {
                Ok(draft) => {
                    debug!(action, tasks = draft.tasks.len(), "plan produced");
                    return Ok(draft);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt - 1);
                    warn!(action, attempt, error = %e, "planner call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_oracle_contract() {
        let config = PlannerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn plan_request_wire_shape() {
        let data = serde_json::json!({"url": "u"});
        let request = PlanRequest {
            action: "summarise",
            data: &data,
            services: &[],
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["action"], "summarise");
        assert_eq!(wire["data"]["url"], "u");
        assert!(wire["services"].as_array().unwrap().is_empty());
    }
}
