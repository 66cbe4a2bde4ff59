//! Compensation engine.
//!
//! Unwinds the succeeded tasks of a failed, aborted or retroactively
//! cancelled orchestration in reverse topological order. Each node is
//! claimed exactly once through the `Succeeded -> Compensating` transition;
//! services without a declared compensation capability are marked
//! compensated as a no-op. A node whose compensation exhausts its retries
//! ends `CompensationFailed`, but the walk continues.

use crate::registry::ServiceRegistry;
use crate::router::{ResultRouter, TaskEvent};
use crate::store::OrchestrationStore;
use orra_core::protocol::{ChannelMessage, TaskResultStatus};
use orra_core::{
    BackoffPolicy, OrchestrationId, OrchestrationStatus, Result, TaskNode, TaskStatus,
};
use orra_ports::dispatcher::TaskDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct CompensationEngine {
    store: Arc<OrchestrationStore>,
    services: Arc<ServiceRegistry>,
    dispatcher: Arc<dyn TaskDispatcher>,
    router: Arc<ResultRouter>,
    backoff: BackoffPolicy,
    result_timeout: Duration,
}

impl CompensationEngine {
    pub fn new(
        store: Arc<OrchestrationStore>,
        services: Arc<ServiceRegistry>,
        dispatcher: Arc<dyn TaskDispatcher>,
        router: Arc<ResultRouter>,
        backoff: BackoffPolicy,
        result_timeout: Duration,
    ) -> Self {
        Self {
            store,
            services,
            dispatcher,
            router,
            backoff,
            result_timeout,
        }
    }

    /// Walk succeeded nodes in reverse topological order. Returns the final
    /// orchestration status (unchanged when nothing needed compensation).
    pub async fn run(&self, id: &OrchestrationId) -> Result<OrchestrationStatus> {
        let snapshot = self.store.get(id).await?;
        if !snapshot.status.can_compensate() {
            return Ok(snapshot.status);
        }
        let Some(graph) = snapshot.graph.clone() else {
            return Ok(snapshot.status);
        };

        let order = graph.topological_order()?;
        let mut claimed_any = false;
        let mut any_failed = false;

        for &index in order.iter().rev() {
            let node = &graph.nodes[index];
            if !self.store.claim_for_compensation(id, &node.id).await? {
                continue;
            }
            if !claimed_any {
                claimed_any = true;
                self.store
                    .set_status(id, OrchestrationStatus::Compensating)
                    .await?;
                info!(orchestration_id = %id, "compensation started");
            }

            match self.compensate_node(id, node).await {
                Ok(()) => {
                    self.store
                        .transition_task(id, &node.id, TaskStatus::Compensated)
                        .await?;
                }
                Err(e) => {
                    warn!(orchestration_id = %id, task_id = %node.id, error = %e,
                        "compensation exhausted");
                    any_failed = true;
                    self.store
                        .transition_task(id, &node.id, TaskStatus::CompensationFailed)
                        .await?;
                    self.store.record_task_error(id, &node.id, e.to_string()).await?;
                }
            }
        }

        if !claimed_any {
            return Ok(snapshot.status);
        }
        let final_status = if any_failed {
            OrchestrationStatus::CompensationFailed
        } else {
            OrchestrationStatus::Compensated
        };
        self.store.set_status(id, final_status).await?;
        info!(orchestration_id = %id, status = %final_status, "compensation finished");
        Ok(final_status)
    }

    /// Dispatch one compensation request with the standard retry policy.
    async fn compensate_node(&self, id: &OrchestrationId, node: &TaskNode) -> Result<()> {
        let service = self.services.get(&node.service_id).await?;
        if !service.revertible {
            // no declared compensation: no-op
            return Ok(());
        }

        let snapshot = self.store.get(id).await?;
        let original_output = snapshot
            .results
            .get(&node.output_key)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let envelope = ChannelMessage::CompensationRequest {
            original_task_id: node.id.clone(),
            execution_id: id.clone(),
            service_id: node.service_id.clone(),
            original_output,
        };

        let mut events = self.router.register(id, &node.id);
        let mut retry = self.backoff.state();
        let outcome = loop {
            if !self.dispatcher.is_healthy(&node.service_id) {
                self.dispatcher.wait_healthy(&node.service_id).await;
            }

            let attempt = match self.dispatcher.dispatch(&node.service_id, envelope.clone()).await {
                Err(e) => Err(e.to_string()),
                Ok(()) => self.await_result(&mut events).await,
            };

            match attempt {
                Ok(()) => break Ok(()),
                Err(reason) => match retry.next_delay() {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        break Err(orra_core::DomainError::Permanent(format!(
                            "compensation failed after {} attempts: {reason}",
                            retry.attempts()
                        )))
                    }
                },
            }
        };
        self.router.deregister(id, &node.id);
        outcome
    }

    async fn await_result(
        &self,
        events: &mut mpsc::UnboundedReceiver<TaskEvent>,
    ) -> std::result::Result<(), String> {
        loop {
            let event = tokio::time::timeout(self.result_timeout, events.recv())
                .await
                .map_err(|_| "timed out waiting for compensation result".to_string())?;
            match event {
                Some(TaskEvent::CompensationResult {
                    status: TaskResultStatus::Completed,
                    ..
                }) => return Ok(()),
                Some(TaskEvent::CompensationResult { error, .. }) => {
                    return Err(error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "compensation rejected by worker".to_string()));
                }
                Some(TaskEvent::SessionClosed) => {
                    return Err("worker session closed".to_string());
                }
                Some(TaskEvent::Result { .. }) => {
                    // stale execution result for the same task id
                    continue;
                }
                None => return Err("result channel closed".to_string()),
            }
        }
    }
}
