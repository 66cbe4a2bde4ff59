//! In-memory orchestration store.
//!
//! Single-method updates only: callers never hold the store lock while
//! touching another registry, and cross-component flows go through queues.

use orra_core::{
    DomainError, Orchestration, OrchestrationId, OrchestrationStatus, ProjectId, Result, TaskId,
    TaskStatus,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct OrchestrationStore {
    inner: RwLock<HashMap<OrchestrationId, Orchestration>>,
}

impl OrchestrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, orchestration: Orchestration) {
        self.inner
            .write()
            .await
            .insert(orchestration.id.clone(), orchestration);
    }

    pub async fn get(&self, id: &OrchestrationId) -> Result<Orchestration> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("orchestration {id}")))
    }

    pub async fn list_for_project(&self, project_id: &ProjectId) -> Vec<Orchestration> {
        let mut list: Vec<Orchestration> = self
            .inner
            .read()
            .await
            .values()
            .filter(|o| &o.project_id == project_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    pub async fn belongs_to_project(&self, id: &OrchestrationId, project_id: &ProjectId) -> bool {
        self.inner
            .read()
            .await
            .get(id)
            .map(|o| &o.project_id == project_id)
            .unwrap_or(false)
    }

    pub async fn set_status(&self, id: &OrchestrationId, status: OrchestrationStatus) -> Result<()> {
        self.with_orchestration(id, |orch| {
            debug!(orchestration_id = %orch.id, from = %orch.status, to = %status,
                "orchestration status change");
            orch.set_status(status);
            Ok(())
        })
        .await
    }

    /// Compare-and-set on the aggregate status; returns false when the
    /// current status does not match.
    pub async fn compare_and_set_status(
        &self,
        id: &OrchestrationId,
        expected: OrchestrationStatus,
        next: OrchestrationStatus,
    ) -> Result<bool> {
        self.with_orchestration(id, |orch| {
            if orch.status != expected {
                return Ok(false);
            }
            orch.set_status(next);
            Ok(true)
        })
        .await
    }

    /// Attach a compiled graph and seed pending task records.
    pub async fn attach_graph(
        &self,
        id: &OrchestrationId,
        graph: orra_core::TaskGraph,
    ) -> Result<()> {
        self.with_orchestration(id, |orch| {
            orch.attach_graph(graph);
            Ok(())
        })
        .await
    }

    pub async fn set_error(&self, id: &OrchestrationId, error: String) -> Result<()> {
        self.with_orchestration(id, |orch| {
            orch.error = Some(error);
            orch.touch();
            Ok(())
        })
        .await
    }

    pub async fn set_output(&self, id: &OrchestrationId, output: serde_json::Value) -> Result<()> {
        self.with_orchestration(id, |orch| {
            orch.output = Some(output);
            orch.touch();
            Ok(())
        })
        .await
    }

    /// Transition one task, validating against the task state machine.
    pub async fn transition_task(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        next: TaskStatus,
    ) -> Result<()> {
        self.with_task(id, task_id, |record| record.transition(next))
            .await
    }

    /// Claim a task for compensation: Succeeded -> Compensating, at most
    /// once. Returns false when the task is not claimable.
    pub async fn claim_for_compensation(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
    ) -> Result<bool> {
        self.with_task(id, task_id, |record| {
            if record.status != TaskStatus::Succeeded {
                return Ok(false);
            }
            record.transition(TaskStatus::Compensating)?;
            Ok(true)
        })
        .await
    }

    pub async fn record_dispatch(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        idempotency_key: &str,
    ) -> Result<()> {
        self.with_task(id, task_id, |record| {
            record.transition(TaskStatus::Dispatched)?;
            record.attempts += 1;
            record.idempotency_key = Some(idempotency_key.to_string());
            Ok(())
        })
        .await
    }

    pub async fn record_task_success(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        output: serde_json::Value,
    ) -> Result<()> {
        self.with_orchestration(id, |orch| {
            let output_key = orch
                .graph
                .as_ref()
                .and_then(|g| g.nodes.iter().find(|n| &n.id == task_id))
                .map(|n| n.output_key.clone())
                .ok_or_else(|| DomainError::NotFound(format!("task {task_id}")))?;
            let record = orch
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| DomainError::NotFound(format!("task {task_id}")))?;
            record.transition(TaskStatus::Succeeded)?;
            record.result = Some(output.clone());
            orch.results.insert(output_key, output);
            orch.touch();
            Ok(())
        })
        .await
    }

    /// Record a result that arrived after the task's orchestration stopped
    /// making progress (abort). Local state only: no status transition, so
    /// the node never joins the compensation set and successors never fire.
    pub async fn record_late_result(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        output: serde_json::Value,
    ) -> Result<()> {
        self.with_task(id, task_id, |record| {
            record.result = Some(output);
            Ok(())
        })
        .await
    }

    pub async fn record_task_failure(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        error: String,
    ) -> Result<()> {
        self.with_task(id, task_id, |record| {
            record.transition(TaskStatus::Failed)?;
            record.error = Some(error);
            Ok(())
        })
        .await
    }

    pub async fn record_task_error(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        error: String,
    ) -> Result<()> {
        self.with_task(id, task_id, |record| {
            record.error = Some(error);
            Ok(())
        })
        .await
    }

    pub async fn task_status(&self, id: &OrchestrationId, task_id: &TaskId) -> Result<TaskStatus> {
        let inner = self.inner.read().await;
        let orch = inner
            .get(id)
            .ok_or_else(|| DomainError::NotFound(format!("orchestration {id}")))?;
        orch.tasks
            .get(task_id)
            .map(|r| r.status)
            .ok_or_else(|| DomainError::NotFound(format!("task {task_id}")))
    }

    async fn with_orchestration<T>(
        &self,
        id: &OrchestrationId,
        f: impl FnOnce(&mut Orchestration) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.inner.write().await;
        let orch = inner
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("orchestration {id}")))?;
        f(orch)
    }

    async fn with_task<T>(
        &self,
        id: &OrchestrationId,
        task_id: &TaskId,
        f: impl FnOnce(&mut orra_core::TaskRecord) -> Result<T>,
    ) -> Result<T> {
        self.with_orchestration(id, |orch| {
            let record = orch
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| DomainError::NotFound(format!("task {task_id}")))?;
            let out = f(record)?;
            orch.touch();
            Ok(out)
        })
        .await
    }
}
