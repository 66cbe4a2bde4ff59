//! Planner Port
//!
//! The planning oracle is an external collaborator: given an action and the
//! project's service catalogue it returns a draft task graph. Tests mock this
//! trait with fixed drafts.

use async_trait::async_trait;
use orra_core::schema::Schema;
use orra_core::service::ServiceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Catalogue entry shipped to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

/// One draft task: inputs are literals or `$tasks.*` / `$input.*` references,
/// still unvalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftTask {
    pub key: String,
    pub service_name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDraft {
    pub tasks: Vec<DraftTask>,
    /// Reference producing the orchestration's final output.
    pub output: serde_json::Value,
}

#[derive(thiserror::Error, Debug)]
pub enum PlannerError {
    #[error("planner call timed out")]
    Timeout,

    #[error("planner transport error: {0}")]
    Transport(String),

    #[error("planner returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl PlannerError {
    /// Transport failures and timeouts are retried; malformed responses are
    /// not.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlannerError::Timeout | PlannerError::Transport(_))
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        action: &str,
        input: &serde_json::Value,
        services: &[ServiceDescriptor],
    ) -> Result<PlanDraft, PlannerError>;
}
