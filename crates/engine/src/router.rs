//! Result routing between the worker channel and waiting task runners.
//!
//! Task and compensation results arrive on whatever session the service is
//! currently connected through; the router demultiplexes them by
//! `(orchestration, task)` onto the runner that is awaiting them. Unknown
//! keys are logged and dropped.

use dashmap::DashMap;
use orra_core::protocol::{TaskResultStatus, WorkerFailure};
use orra_core::{OrchestrationId, TaskId};
use tokio::sync::mpsc;
use tracing::warn;

/// Event delivered to a waiting task runner.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Result {
        status: TaskResultStatus,
        output: Option<serde_json::Value>,
        error: Option<WorkerFailure>,
    },
    CompensationResult {
        status: TaskResultStatus,
        error: Option<WorkerFailure>,
    },
    /// The session carrying the in-flight dispatch closed (disconnect or
    /// supersession); the runner retries with the same idempotency key.
    SessionClosed,
}

type RouteKey = (OrchestrationId, TaskId);

#[derive(Debug, Default)]
pub struct ResultRouter {
    routes: DashMap<RouteKey, mpsc::UnboundedSender<TaskEvent>>,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in results for one task. The previous registration
    /// for the same key, if any, is replaced.
    pub fn register(
        &self,
        orchestration_id: &OrchestrationId,
        task_id: &TaskId,
    ) -> mpsc::UnboundedReceiver<TaskEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .insert((orchestration_id.clone(), task_id.clone()), tx);
        rx
    }

    pub fn deregister(&self, orchestration_id: &OrchestrationId, task_id: &TaskId) {
        self.routes
            .remove(&(orchestration_id.clone(), task_id.clone()));
    }

    /// Deliver an event; unknown routing keys are dropped with a log line.
    pub fn deliver(&self, orchestration_id: &OrchestrationId, task_id: &TaskId, event: TaskEvent) {
        let key = (orchestration_id.clone(), task_id.clone());
        match self.routes.get(&key) {
            Some(route) => {
                if route.send(event).is_err() {
                    warn!(orchestration_id = %orchestration_id, task_id = %task_id,
                        "task runner gone, result dropped");
                }
            }
            None => {
                warn!(orchestration_id = %orchestration_id, task_id = %task_id,
                    "result for unknown task dropped");
            }
        }
    }
}
