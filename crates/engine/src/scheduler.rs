//! Task scheduler and dispatch pool.
//!
//! Each orchestration runs under its own supervisor task with a cancellation
//! token; the root engine only spawns supervisors, never blocks on them. A
//! shared semaphore bounds dispatch concurrency across orchestrations with
//! FIFO fairness. Readiness is walked with predecessor counts over the
//! arena-ordered graph nodes.

use crate::compensation::CompensationEngine;
use crate::compiler::GraphCompiler;
use crate::registry::{ProjectRegistry, ServiceRegistry};
use crate::router::{ResultRouter, TaskEvent};
use crate::store::OrchestrationStore;
use crate::webhook::WebhookDeliverer;
use dashmap::DashMap;
use orra_core::orchestration::idempotency_key;
use orra_core::protocol::{ChannelMessage, FailureKind, TaskResultStatus};
use orra_core::{
    BackoffPolicy, DomainError, Orchestration, OrchestrationId, OrchestrationStatus, ProjectId,
    Result, TaskGraph, TaskStatus,
};
use orra_ports::dispatcher::TaskDispatcher;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on concurrent dispatches across all orchestrations.
    pub dispatch_concurrency: usize,
    /// Default wait for a worker result per attempt.
    pub task_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_concurrency: 32,
            task_timeout: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

enum TaskOutcome {
    Succeeded(usize),
    Failed(usize),
    Cancelled(usize),
}

pub struct ExecutionEngine {
    store: Arc<OrchestrationStore>,
    projects: Arc<ProjectRegistry>,
    services: Arc<ServiceRegistry>,
    compiler: Arc<GraphCompiler>,
    dispatcher: Arc<dyn TaskDispatcher>,
    router: Arc<ResultRouter>,
    webhooks: Arc<WebhookDeliverer>,
    dispatch_pool: Arc<Semaphore>,
    config: SchedulerConfig,
    cancellations: DashMap<OrchestrationId, CancellationToken>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<OrchestrationStore>,
        projects: Arc<ProjectRegistry>,
        services: Arc<ServiceRegistry>,
        compiler: Arc<GraphCompiler>,
        dispatcher: Arc<dyn TaskDispatcher>,
        router: Arc<ResultRouter>,
        webhooks: Arc<WebhookDeliverer>,
        config: SchedulerConfig,
    ) -> Self {
        let dispatch_pool = Arc::new(Semaphore::new(config.dispatch_concurrency));
        Self {
            store,
            projects,
            services,
            compiler,
            dispatcher,
            router,
            webhooks,
            dispatch_pool,
            config,
            cancellations: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<OrchestrationStore> {
        &self.store
    }

    /// Create the orchestration record and compile its graph. A compile
    /// failure marks the record not actionable instead of erroring out.
    pub async fn prepare(
        &self,
        project_id: &ProjectId,
        action: &str,
        input: serde_json::Value,
    ) -> Result<Orchestration> {
        let orchestration = Orchestration::new(project_id.clone(), action.to_string(), input);
        let id = orchestration.id.clone();
        let input = orchestration.input.clone();
        self.store.insert(orchestration).await;

        let compiled = self.compiler.compile(project_id, action, &input).await;
        match compiled {
            Ok(graph) => {
                self.store.attach_graph(&id, graph).await?;
            }
            Err(DomainError::NotActionable(reason)) => {
                warn!(orchestration_id = %id, %reason, "orchestration not actionable");
                self.store
                    .set_status(&id, OrchestrationStatus::NotActionable)
                    .await?;
                self.store.set_error(&id, reason).await?;
            }
            Err(other) => return Err(other),
        }
        self.store.get(&id).await
    }

    /// Start executing a prepared orchestration. Spawns the supervisor and
    /// returns immediately.
    pub async fn execute(self: &Arc<Self>, id: &OrchestrationId) -> Result<()> {
        let moved = self
            .store
            .compare_and_set_status(id, OrchestrationStatus::Pending, OrchestrationStatus::Processing)
            .await?;
        if !moved {
            let current = self.store.get(id).await?.status;
            return Err(DomainError::Validation(format!(
                "orchestration {id} is {current}, not pending"
            )));
        }

        let token = CancellationToken::new();
        self.cancellations.insert(id.clone(), token.clone());

        let engine = Arc::clone(self);
        let id = id.clone();
        let supervisor = tokio::spawn(async move {
            supervise(engine, id, token).await;
        });
        // Contain panics to the one orchestration; other supervisors keep
        // running.
        tokio::spawn(async move {
            if let Err(e) = supervisor.await {
                if e.is_panic() {
                    error!("orchestration supervisor panicked: {e}");
                }
            }
        });
        Ok(())
    }

    /// Abort an orchestration. In-flight dispatches complete but never
    /// trigger successors; a completed orchestration unwinds through
    /// compensation.
    pub async fn abort(self: &Arc<Self>, id: &OrchestrationId) -> Result<()> {
        let status = self.store.get(id).await?.status;
        match status {
            OrchestrationStatus::Processing => {
                info!(orchestration_id = %id, "aborting orchestration");
                self.store.set_status(id, OrchestrationStatus::Aborted).await?;
                if let Some(token) = self.cancellations.get(id) {
                    token.cancel();
                }
                Ok(())
            }
            OrchestrationStatus::Completed => {
                info!(orchestration_id = %id, "unwinding completed orchestration");
                self.store.set_status(id, OrchestrationStatus::Aborted).await?;
                let engine = Arc::clone(self);
                let id = id.clone();
                tokio::spawn(async move {
                    engine.compensate_and_notify(&id).await;
                });
                Ok(())
            }
            other => Err(DomainError::Validation(format!(
                "orchestration {id} is {other} and cannot be aborted"
            ))),
        }
    }

    fn compensation_engine(&self) -> CompensationEngine {
        CompensationEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.services),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.router),
            self.config.backoff.clone(),
            self.config.task_timeout,
        )
    }

    async fn compensate_and_notify(&self, id: &OrchestrationId) {
        if let Err(e) = self.compensation_engine().run(id).await {
            error!(orchestration_id = %id, error = %e, "compensation run failed");
        }
        self.notify(id).await;
    }

    async fn notify(&self, id: &OrchestrationId) {
        match self.store.get(id).await {
            Ok(snapshot) => {
                let webhooks = match self.projects.webhooks(&snapshot.project_id).await {
                    Ok(urls) => urls,
                    Err(e) => {
                        error!(orchestration_id = %id, error = %e, "webhook lookup failed");
                        return;
                    }
                };
                self.webhooks.deliver(&snapshot, webhooks);
            }
            Err(e) => error!(orchestration_id = %id, error = %e, "webhook snapshot failed"),
        }
    }
}

/// One supervisor per orchestration: seeds ready tasks, spawns runners, and
/// reacts to outcomes until the graph drains.
async fn supervise(engine: Arc<ExecutionEngine>, id: OrchestrationId, token: CancellationToken) {
    let orchestration = match engine.store.get(&id).await {
        Ok(o) => o,
        Err(e) => {
            error!(orchestration_id = %id, error = %e, "orchestration vanished before start");
            return;
        }
    };
    let Some(graph) = orchestration.graph.clone() else {
        let _ = engine.store.set_status(&id, OrchestrationStatus::Failed).await;
        let _ = engine
            .store
            .set_error(&id, "orchestration has no compiled graph".to_string())
            .await;
        return;
    };
    let graph = Arc::new(graph);

    let predecessors = graph.predecessors();
    let adjacency = graph.adjacency();
    let mut remaining: Vec<usize> = predecessors.iter().map(|p| p.len()).collect();
    let node_count = graph.nodes.len();

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<TaskOutcome>();
    let mut ready: VecDeque<usize> = (0..node_count).filter(|&i| remaining[i] == 0).collect();
    let mut in_flight = 0usize;
    let mut succeeded = 0usize;
    let mut failed_indexes: Vec<usize> = Vec::new();

    loop {
        while !token.is_cancelled() {
            let Some(index) = ready.pop_front() else { break };
            let runner = TaskRunner {
                engine: Arc::clone(&engine),
                orchestration_id: id.clone(),
                graph: Arc::clone(&graph),
                index,
                token: token.child_token(),
                outcomes: outcome_tx.clone(),
            };
            tokio::spawn(runner.run());
            in_flight += 1;
        }

        if in_flight == 0 {
            break;
        }
        let Some(outcome) = outcome_rx.recv().await else { break };
        in_flight -= 1;

        match outcome {
            TaskOutcome::Succeeded(index) => {
                succeeded += 1;
                if !token.is_cancelled() {
                    // adjacency lists are sorted, so simultaneous readiness
                    // resolves by topological index
                    for &successor in &adjacency[index] {
                        remaining[successor] -= 1;
                        if remaining[successor] == 0 {
                            ready.push_back(successor);
                        }
                    }
                }
            }
            TaskOutcome::Failed(index) => {
                // A failure only dooms the failed node's descendants; they
                // never become ready because this predecessor never
                // succeeds. Unrelated branches keep running to completion.
                debug!(orchestration_id = %id, task_index = index, "task failed");
                failed_indexes.push(index);
            }
            TaskOutcome::Cancelled(_) => {}
        }
    }

    finalize(&engine, &id, &graph, &failed_indexes, succeeded == node_count).await;
    engine.cancellations.remove(&id);
}

/// Drive the orchestration to its terminal state once no runner is active.
async fn finalize(
    engine: &Arc<ExecutionEngine>,
    id: &OrchestrationId,
    graph: &TaskGraph,
    failed_indexes: &[usize],
    all_succeeded: bool,
) {
    let aborted = matches!(
        engine.store.get(id).await.map(|o| o.status),
        Ok(OrchestrationStatus::Aborted)
    );

    if !aborted && all_succeeded {
        let completed = async {
            let snapshot = engine.store.get(id).await?;
            let output = graph.resolve_output(&snapshot.input, &snapshot.results)?;
            engine.store.set_output(id, output).await?;
            // CAS guards against an abort racing the final result
            engine
                .store
                .compare_and_set_status(
                    id,
                    OrchestrationStatus::Processing,
                    OrchestrationStatus::Completed,
                )
                .await
        }
        .await;
        match completed {
            Ok(true) => {
                info!(orchestration_id = %id, "orchestration completed");
                engine.notify(id).await;
            }
            Ok(false) => {
                engine.compensate_and_notify(id).await;
            }
            Err(e) => {
                error!(orchestration_id = %id, error = %e, "completion failed");
                let _ = engine.store.set_status(id, OrchestrationStatus::Failed).await;
                let _ = engine.store.set_error(id, e.to_string()).await;
                engine.compensate_and_notify(id).await;
            }
        }
        return;
    }

    // Abort skips every un-dispatched node; a failure skips only the
    // un-dispatched descendants of the failed node(s).
    let skip: std::collections::BTreeSet<usize> = if aborted {
        (0..graph.nodes.len()).collect()
    } else {
        failed_indexes
            .iter()
            .flat_map(|&index| graph.descendants(index))
            .collect()
    };
    for &index in &skip {
        let node = &graph.nodes[index];
        if let Ok(status) = engine.store.task_status(id, &node.id).await {
            if matches!(status, TaskStatus::Pending | TaskStatus::Ready) {
                let _ = engine.store.transition_task(id, &node.id, TaskStatus::Skipped).await;
            }
        }
    }

    if !aborted && !failed_indexes.is_empty() {
        let _ = engine.store.set_status(id, OrchestrationStatus::Failed).await;
        // surface the failing task's error on the record
        if let Ok(snapshot) = engine.store.get(id).await {
            let failed = snapshot
                .tasks
                .iter()
                .find(|(_, record)| record.status == TaskStatus::Failed)
                .and_then(|(task_id, record)| {
                    record.error.clone().map(|e| format!("task {task_id}: {e}"))
                });
            if let Some(error) = failed {
                let _ = engine.store.set_error(id, error).await;
            }
        }
        info!(orchestration_id = %id, "orchestration failed");
    }
    engine.compensate_and_notify(id).await;
}

/// Drives a single node: health gate, dispatch with retry, result wait.
struct TaskRunner {
    engine: Arc<ExecutionEngine>,
    orchestration_id: OrchestrationId,
    graph: Arc<TaskGraph>,
    index: usize,
    token: CancellationToken,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
}

impl TaskRunner {
    async fn run(self) {
        let outcome = self.drive().await;
        let node = &self.graph.nodes[self.index];
        self.engine.router.deregister(&self.orchestration_id, &node.id);
        let _ = self.outcomes.send(outcome);
    }

    async fn drive(&self) -> TaskOutcome {
        let node = &self.graph.nodes[self.index];
        let id = &self.orchestration_id;

        let prepared = async {
            let snapshot = self.engine.store.get(id).await?;
            let input = self.graph.render_input(self.index, &snapshot.input, &snapshot.results)?;
            self.engine
                .store
                .transition_task(id, &node.id, TaskStatus::Ready)
                .await?;
            Ok::<_, DomainError>(input)
        }
        .await;
        let input = match prepared {
            Ok(input) => input,
            Err(e) => return self.fail(format!("task setup failed: {e}")).await,
        };

        let key = idempotency_key(id, &node.id, &input);
        let mut events = self.engine.router.register(id, &node.id);
        let timeout = self.task_timeout().await;

        // FIFO pool admission; waiting here preserves readiness order. The
        // permit is held for the task's whole dispatch-and-wait lifetime.
        let _permit = tokio::select! {
            permit = Arc::clone(&self.engine.dispatch_pool).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return self.fail("dispatch pool closed".to_string()).await,
            },
            _ = self.token.cancelled() => return TaskOutcome::Cancelled(self.index),
        };

        let envelope = ChannelMessage::TaskRequest {
            id: node.id.clone(),
            idempotency_key: key.clone(),
            execution_id: id.clone(),
            service_id: node.service_id.clone(),
            input,
        };
        let mut retry = self.engine.config.backoff.state();

        loop {
            if self.token.is_cancelled() {
                return TaskOutcome::Cancelled(self.index);
            }

            // Health gate: waiting for a healthy transition costs no retry
            // budget.
            if !self.engine.dispatcher.is_healthy(&node.service_id) {
                tokio::select! {
                    _ = self.engine.dispatcher.wait_healthy(&node.service_id) => continue,
                    _ = self.token.cancelled() => return TaskOutcome::Cancelled(self.index),
                }
            }

            if let Err(e) = self.engine.store.record_dispatch(id, &node.id, &key).await {
                return self.fail(format!("dispatch bookkeeping failed: {e}")).await;
            }

            match self.engine.dispatcher.dispatch(&node.service_id, envelope.clone()).await {
                Err(e) => {
                    debug!(orchestration_id = %id, task_id = %node.id, error = %e,
                        "dispatch attempt failed");
                    let _ = self
                        .engine
                        .store
                        .record_task_error(id, &node.id, e.to_string())
                        .await;
                    if !self.backoff_or_exhaust(&mut retry).await {
                        return self.fail("dispatch retries exhausted".to_string()).await;
                    }
                }
                Ok(()) => {
                    match self.await_result(&mut events, timeout).await {
                        AttemptEnd::Succeeded(output) => {
                            if let Err(e) = self
                                .engine
                                .store
                                .record_task_success(id, &node.id, output)
                                .await
                            {
                                error!(orchestration_id = %id, task_id = %node.id, error = %e,
                                    "result bookkeeping failed");
                                return TaskOutcome::Failed(self.index);
                            }
                            return TaskOutcome::Succeeded(self.index);
                        }
                        AttemptEnd::Permanent(message) => return self.fail(message).await,
                        AttemptEnd::Transient(message) => {
                            let _ = self
                                .engine
                                .store
                                .record_task_error(id, &node.id, message)
                                .await;
                            if !self.backoff_or_exhaust(&mut retry).await {
                                return self
                                    .fail("task retries exhausted".to_string())
                                    .await;
                            }
                        }
                        AttemptEnd::Cancelled => return TaskOutcome::Cancelled(self.index),
                    }
                }
            }
        }
    }

    /// Wait for the worker's verdict on one dispatched attempt.
    async fn await_result(
        &self,
        events: &mut mpsc::UnboundedReceiver<TaskEvent>,
        timeout: Duration,
    ) -> AttemptEnd {
        loop {
            tokio::select! {
                // cancellation wins over a simultaneously ready result, so an
                // abort never promotes an in-flight task to Succeeded
                biased;
                _ = self.token.cancelled() => {
                    // Let the in-flight dispatch land; its result updates
                    // task state but never triggers successors.
                    self.drain(events, timeout).await;
                    return AttemptEnd::Cancelled;
                }
                event = events.recv() => match event {
                    Some(TaskEvent::Result { status: TaskResultStatus::Completed, output, .. }) => {
                        return AttemptEnd::Succeeded(
                            output.unwrap_or(serde_json::Value::Null),
                        );
                    }
                    Some(TaskEvent::Result { status: TaskResultStatus::Failed, error, .. }) => {
                        let failure = error.unwrap_or(orra_core::WorkerFailure {
                            kind: FailureKind::Permanent,
                            message: "task failed".to_string(),
                        });
                        return match failure.kind {
                            FailureKind::Transient => AttemptEnd::Transient(failure.message),
                            FailureKind::Permanent => AttemptEnd::Permanent(failure.message),
                        };
                    }
                    Some(TaskEvent::SessionClosed) => {
                        // superseded or dropped session: reschedule with the
                        // same idempotency key
                        return AttemptEnd::Transient("worker session closed".to_string());
                    }
                    Some(TaskEvent::CompensationResult { .. }) => {
                        warn!(orchestration_id = %self.orchestration_id,
                            "compensation result during execution dropped");
                    }
                    None => return AttemptEnd::Transient("result channel closed".to_string()),
                },
                _ = tokio::time::sleep(timeout) => {
                    return AttemptEnd::Transient("timed out waiting for worker result".to_string());
                }
            }
        }
    }

    async fn drain(&self, events: &mut mpsc::UnboundedReceiver<TaskEvent>, timeout: Duration) {
        let node = &self.graph.nodes[self.index];
        let id = &self.orchestration_id;
        let _ = tokio::time::timeout(timeout, async {
            while let Some(event) = events.recv().await {
                if let TaskEvent::Result { status: TaskResultStatus::Completed, output, .. } = event
                {
                    let _ = self
                        .engine
                        .store
                        .record_late_result(id, &node.id, output.unwrap_or(serde_json::Value::Null))
                        .await;
                    break;
                }
                if matches!(event, TaskEvent::Result { .. }) {
                    break;
                }
            }
        })
        .await;
    }

    /// Sleep out the backoff for the attempt just spent; false once the
    /// budget is exhausted.
    async fn backoff_or_exhaust(&self, retry: &mut orra_core::retry::RetryState) -> bool {
        match retry.next_delay() {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = self.token.cancelled() => false,
                }
            }
            None => false,
        }
    }

    async fn fail(&self, message: String) -> TaskOutcome {
        if self.token.is_cancelled() {
            return TaskOutcome::Cancelled(self.index);
        }
        let node = &self.graph.nodes[self.index];
        let _ = self
            .engine
            .store
            .record_task_failure(&self.orchestration_id, &node.id, message)
            .await;
        TaskOutcome::Failed(self.index)
    }

    async fn task_timeout(&self) -> Duration {
        let node = &self.graph.nodes[self.index];
        match self.engine.services.get(&node.service_id).await {
            Ok(service) => service
                .task_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.engine.config.task_timeout),
            Err(_) => self.engine.config.task_timeout,
        }
    }
}

enum AttemptEnd {
    Succeeded(serde_json::Value),
    Transient(String),
    Permanent(String),
    Cancelled,
}
