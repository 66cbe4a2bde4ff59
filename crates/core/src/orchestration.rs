//! Orchestration records and the task/orchestration state machines.

use crate::error::{DomainError, Result};
use crate::graph::TaskGraph;
use crate::id::{OrchestrationId, ProjectId, TaskId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    NotActionable,
    Pending,
    Processing,
    Completed,
    Failed,
    Aborted,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl OrchestrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::NotActionable
                | OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Aborted
                | OrchestrationStatus::Compensated
                | OrchestrationStatus::CompensationFailed
        )
    }

    /// Compensation only starts from a state that may hold succeeded tasks.
    pub fn can_compensate(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Aborted
        )
    }

    /// Webhook payload status string.
    pub fn as_outcome(self) -> &'static str {
        match self {
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Compensated => "compensated",
            OrchestrationStatus::CompensationFailed => "compensation_failed",
            _ => "failed",
        }
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestrationStatus::NotActionable => "NotActionable",
            OrchestrationStatus::Pending => "Pending",
            OrchestrationStatus::Processing => "Processing",
            OrchestrationStatus::Completed => "Completed",
            OrchestrationStatus::Failed => "Failed",
            OrchestrationStatus::Aborted => "Aborted",
            OrchestrationStatus::Compensating => "Compensating",
            OrchestrationStatus::Compensated => "Compensated",
            OrchestrationStatus::CompensationFailed => "CompensationFailed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    Dispatched,
    Succeeded,
    Failed,
    Skipped,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Dispatched)
                | (Ready, Skipped)
                | (Ready, Failed)
                | (Dispatched, Dispatched) // retry attempt
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Succeeded, Compensating)
                | (Compensating, Compensated)
                | (Compensating, CompensationFailed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-task execution state, kept separate from the frozen graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl TaskRecord {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            idempotency_key: None,
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state_transition(
                &self.status.to_string(),
                &next.to_string(),
            ));
        }
        self.status = next;
        Ok(())
    }
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orchestration {
    pub id: OrchestrationId,
    pub project_id: ProjectId,
    pub action: String,
    pub input: serde_json::Value,
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<TaskGraph>,
    /// Execution state per task id; BTree order keeps serialization stable.
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    /// Task outputs keyed by the producing node's output key.
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Orchestration {
    pub fn new(project_id: ProjectId, action: String, input: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: OrchestrationId::generate(),
            project_id,
            action,
            input,
            status: OrchestrationStatus::Pending,
            graph: None,
            tasks: BTreeMap::new(),
            results: BTreeMap::new(),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn executable(&self) -> bool {
        self.status != OrchestrationStatus::NotActionable
    }

    pub fn mark_not_actionable(&mut self, reason: String) {
        self.status = OrchestrationStatus::NotActionable;
        self.error = Some(reason);
        self.touch();
    }

    /// Attach a compiled graph and seed one pending record per node.
    pub fn attach_graph(&mut self, graph: TaskGraph) {
        self.tasks = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), TaskRecord::new()))
            .collect();
        self.graph = Some(graph);
        self.touch();
    }

    pub fn set_status(&mut self, status: OrchestrationStatus) {
        self.status = status;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

/// Stable dispatch key: identical for every retry of one task, distinct
/// between tasks of the same orchestration.
pub fn idempotency_key(
    orchestration_id: &OrchestrationId,
    task_id: &TaskId,
    resolved_input: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(orchestration_id.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(task_id.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(resolved_input.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_statuses() {
        assert!(OrchestrationStatus::Completed.is_terminal());
        assert!(OrchestrationStatus::NotActionable.is_terminal());
        assert!(!OrchestrationStatus::Processing.is_terminal());
        assert!(!OrchestrationStatus::Compensating.is_terminal());
    }

    #[test]
    fn compensation_only_from_completed_failed_or_aborted() {
        assert!(OrchestrationStatus::Completed.can_compensate());
        assert!(OrchestrationStatus::Failed.can_compensate());
        assert!(OrchestrationStatus::Aborted.can_compensate());
        assert!(!OrchestrationStatus::Processing.can_compensate());
        assert!(!OrchestrationStatus::Pending.can_compensate());
    }

    #[test]
    fn task_lifecycle_happy_path() {
        let mut record = TaskRecord::new();
        record.transition(TaskStatus::Ready).unwrap();
        record.transition(TaskStatus::Dispatched).unwrap();
        // retry keeps the same status
        record.transition(TaskStatus::Dispatched).unwrap();
        record.transition(TaskStatus::Succeeded).unwrap();
        record.transition(TaskStatus::Compensating).unwrap();
        record.transition(TaskStatus::Compensated).unwrap();
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut record = TaskRecord::new();
        assert!(record.transition(TaskStatus::Succeeded).is_err());
        record.transition(TaskStatus::Ready).unwrap();
        assert!(record.transition(TaskStatus::Compensating).is_err());

        // compensation claims exactly once
        let mut done = TaskRecord::new();
        done.transition(TaskStatus::Ready).unwrap();
        done.transition(TaskStatus::Dispatched).unwrap();
        done.transition(TaskStatus::Succeeded).unwrap();
        done.transition(TaskStatus::Compensating).unwrap();
        assert!(done.transition(TaskStatus::Compensating).is_err());
    }

    #[test]
    fn new_orchestration_is_pending_and_executable() {
        let orch = Orchestration::new(ProjectId::generate(), "summarise".into(), json!({"u": 1}));
        assert_eq!(orch.status, OrchestrationStatus::Pending);
        assert!(orch.executable());
    }

    #[test]
    fn not_actionable_carries_reason_and_is_not_executable() {
        let mut orch = Orchestration::new(ProjectId::generate(), "x".into(), json!({}));
        orch.mark_not_actionable("unknown service C".into());
        assert!(!orch.executable());
        assert_eq!(orch.error.as_deref(), Some("unknown service C"));
    }

    #[test]
    fn idempotency_key_is_stable_and_distinct_per_task() {
        let orch = OrchestrationId::from("orch-1");
        let input = json!({"url": "u"});
        let a1 = idempotency_key(&orch, &TaskId::indexed(0), &input);
        let a2 = idempotency_key(&orch, &TaskId::indexed(0), &input);
        let b = idempotency_key(&orch, &TaskId::indexed(1), &input);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), 64);
    }
}
