//! Wire protocol spoken over the worker channel.
//!
//! All messages are JSON with a `type` discriminator. Inbound frames above
//! the configured size bound are rejected without disconnecting the peer.

use crate::id::{OrchestrationId, ServiceId, TaskId};
use serde::{Deserialize, Serialize};

/// Default bound on inbound channel messages.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Failure payload attached to a failed task or compensation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    #[serde(default = "default_failure_kind")]
    pub kind: FailureKind,
    pub message: String,
}

fn default_failure_kind() -> FailureKind {
    FailureKind::Permanent
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    TaskRequest {
        id: TaskId,
        #[serde(rename = "idempotencyKey")]
        idempotency_key: String,
        #[serde(rename = "executionID")]
        execution_id: OrchestrationId,
        #[serde(rename = "serviceID")]
        service_id: ServiceId,
        input: serde_json::Value,
    },
    TaskResult {
        id: TaskId,
        #[serde(rename = "executionID")]
        execution_id: OrchestrationId,
        status: TaskResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WorkerFailure>,
    },
    CompensationRequest {
        #[serde(rename = "originalTaskID")]
        original_task_id: TaskId,
        #[serde(rename = "executionID")]
        execution_id: OrchestrationId,
        #[serde(rename = "serviceID")]
        service_id: ServiceId,
        #[serde(rename = "originalOutput")]
        original_output: serde_json::Value,
    },
    CompensationResult {
        #[serde(rename = "originalTaskID")]
        original_task_id: TaskId,
        #[serde(rename = "executionID")]
        execution_id: OrchestrationId,
        status: TaskResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WorkerFailure>,
    },
    Ping,
    Pong,
    HealthUpdate {
        status: HealthStatus,
    },
}

impl ChannelMessage {
    /// Routing key for demultiplexing results back to the waiting task.
    pub fn routing_key(&self) -> Option<(&OrchestrationId, &TaskId)> {
        match self {
            ChannelMessage::TaskResult {
                execution_id, id, ..
            } => Some((execution_id, id)),
            ChannelMessage::CompensationResult {
                execution_id,
                original_task_id,
                ..
            } => Some((execution_id, original_task_id)),
            _ => None,
        }
    }
}
