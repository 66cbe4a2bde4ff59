//! Worker channel manager.
//!
//! One active session per connected service. The transport (an axum
//! WebSocket in production, an in-memory pair in tests) pumps inbound frames
//! into [`ChannelManager::handle_message`] and drains the outbound receiver
//! returned by [`ChannelManager::connect`]. A new session for a service
//! supersedes the old one: pending dispatches on the old session observe a
//! `SessionClosed` event and are rescheduled by the scheduler under the same
//! idempotency key.

use crate::router::{ResultRouter, TaskEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use orra_core::protocol::{ChannelMessage, HealthStatus, DEFAULT_MAX_MESSAGE_BYTES};
use orra_core::{DomainError, OrchestrationId, Result, ServiceId, TaskId};
use orra_ports::dispatcher::{DispatchError, TaskDispatcher};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_message_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(45),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Handle returned to the transport on connect: the transport forwards
/// everything from `outbound` to the peer and reports the session id on
/// disconnect.
pub struct SessionHandle {
    pub session_id: Uuid,
    pub outbound: mpsc::UnboundedReceiver<ChannelMessage>,
}

struct Connection {
    session_id: Uuid,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
    /// Dispatches written to this session still awaiting a result.
    pending: Mutex<HashSet<(OrchestrationId, TaskId)>>,
    last_pong: Mutex<Instant>,
}

impl Connection {
    fn drain_pending(&self) -> Vec<(OrchestrationId, TaskId)> {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.drain().collect()
    }
}

pub struct ChannelManager {
    connections: DashMap<ServiceId, Arc<Connection>>,
    health: DashMap<ServiceId, watch::Sender<bool>>,
    router: Arc<ResultRouter>,
    config: ChannelConfig,
}

impl ChannelManager {
    pub fn new(router: Arc<ResultRouter>, config: ChannelConfig) -> Self {
        Self {
            connections: DashMap::new(),
            health: DashMap::new(),
            router,
            config,
        }
    }

    /// Accept a session for a service, superseding any prior session.
    pub fn connect(&self, service_id: &ServiceId) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        let connection = Arc::new(Connection {
            session_id,
            outbound: tx,
            pending: Mutex::new(HashSet::new()),
            last_pong: Mutex::new(Instant::now()),
        });

        let previous = self.connections.insert(service_id.clone(), connection);
        if let Some(old) = previous {
            info!(service_id = %service_id, old_session = %old.session_id,
                new_session = %session_id, "session superseded");
            self.fail_pending(&old);
        } else {
            info!(service_id = %service_id, session = %session_id, "service connected");
        }

        self.set_health(service_id, true);
        SessionHandle {
            session_id,
            outbound: rx,
        }
    }

    /// Remove the session if it is still the active one; stale disconnects
    /// from superseded sessions are ignored.
    pub fn disconnect(&self, service_id: &ServiceId, session_id: Uuid) {
        let removed = self
            .connections
            .remove_if(service_id, |_, conn| conn.session_id == session_id);
        if let Some((_, old)) = removed {
            info!(service_id = %service_id, session = %session_id, "service disconnected");
            self.fail_pending(&old);
            self.set_health(service_id, false);
        }
    }

    pub fn is_connected(&self, service_id: &ServiceId) -> bool {
        self.connections.contains_key(service_id)
    }

    /// Process one inbound frame from the transport. Frames from superseded
    /// sessions and frames above the size bound are dropped without
    /// disconnecting the peer.
    pub fn handle_message(
        &self,
        service_id: &ServiceId,
        session_id: Uuid,
        raw: &str,
    ) -> Result<()> {
        if raw.len() > self.config.max_message_bytes {
            warn!(service_id = %service_id, size = raw.len(),
                limit = self.config.max_message_bytes, "oversized message rejected");
            return Err(DomainError::Validation(format!(
                "message of {} bytes exceeds the {} byte limit",
                raw.len(),
                self.config.max_message_bytes
            )));
        }

        let Some(connection) = self.active_connection(service_id, session_id) else {
            debug!(service_id = %service_id, session = %session_id,
                "frame from superseded session dropped");
            return Ok(());
        };

        let message: ChannelMessage = serde_json::from_str(raw)
            .map_err(|e| DomainError::Validation(format!("malformed channel message: {e}")))?;

        match message {
            ChannelMessage::TaskResult {
                id,
                execution_id,
                status,
                output,
                error,
            } => {
                self.clear_pending(&connection, &execution_id, &id);
                self.router.deliver(
                    &execution_id,
                    &id,
                    TaskEvent::Result {
                        status,
                        output,
                        error,
                    },
                );
            }
            ChannelMessage::CompensationResult {
                original_task_id,
                execution_id,
                status,
                error,
            } => {
                self.clear_pending(&connection, &execution_id, &original_task_id);
                self.router.deliver(
                    &execution_id,
                    &original_task_id,
                    TaskEvent::CompensationResult { status, error },
                );
            }
            ChannelMessage::Ping => {
                let _ = connection.outbound.send(ChannelMessage::Pong);
            }
            ChannelMessage::Pong => {
                *connection.last_pong.lock().expect("pong lock poisoned") = Instant::now();
                self.set_health(service_id, true);
            }
            ChannelMessage::HealthUpdate { status } => {
                self.set_health(service_id, status == HealthStatus::Healthy);
            }
            other => {
                warn!(service_id = %service_id, message = ?other,
                    "unexpected inbound message dropped");
            }
        }
        Ok(())
    }

    /// Periodic ping plus pong-timeout health checks. Runs until aborted.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.ping_round();
            }
        })
    }

    fn ping_round(&self) {
        let timeout = self.config.pong_timeout;
        let mut timed_out = Vec::new();
        for entry in self.connections.iter() {
            let _ = entry.value().outbound.send(ChannelMessage::Ping);
            let last = *entry.value().last_pong.lock().expect("pong lock poisoned");
            if last.elapsed() > timeout {
                timed_out.push(entry.key().clone());
            }
        }
        for service_id in timed_out {
            self.set_health(&service_id, false);
        }
    }

    fn active_connection(&self, service_id: &ServiceId, session_id: Uuid) -> Option<Arc<Connection>> {
        self.connections
            .get(service_id)
            .filter(|conn| conn.session_id == session_id)
            .map(|conn| Arc::clone(&conn))
    }

    fn clear_pending(
        &self,
        connection: &Connection,
        orchestration_id: &OrchestrationId,
        task_id: &TaskId,
    ) {
        connection
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&(orchestration_id.clone(), task_id.clone()));
    }

    /// Report every dispatch pending on a dead session back to its runner.
    fn fail_pending(&self, connection: &Connection) {
        for (orchestration_id, task_id) in connection.drain_pending() {
            debug!(orchestration_id = %orchestration_id, task_id = %task_id,
                "in-flight dispatch failed with its session");
            self.router
                .deliver(&orchestration_id, &task_id, TaskEvent::SessionClosed);
        }
    }

    fn set_health(&self, service_id: &ServiceId, healthy: bool) {
        let sender = self
            .health
            .entry(service_id.clone())
            .or_insert_with(|| watch::channel(false).0);
        let changed = *sender.borrow() != healthy;
        if changed {
            info!(service_id = %service_id, healthy, "service health transition");
        }
        sender.send_replace(healthy);
    }

    fn health_receiver(&self, service_id: &ServiceId) -> watch::Receiver<bool> {
        self.health
            .entry(service_id.clone())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }
}

#[async_trait]
impl TaskDispatcher for ChannelManager {
    async fn dispatch(
        &self,
        service_id: &ServiceId,
        message: ChannelMessage,
    ) -> std::result::Result<(), DispatchError> {
        let connection = self
            .connections
            .get(service_id)
            .map(|conn| Arc::clone(&conn))
            .ok_or_else(|| DispatchError::NotConnected(service_id.clone()))?;

        // Health is consulted and the pending slot reserved before the write,
        // so a message never goes out on a session observed unhealthy.
        if !self.is_healthy(service_id) {
            return Err(DispatchError::Unhealthy(service_id.clone()));
        }

        let routing = match &message {
            ChannelMessage::TaskRequest {
                execution_id, id, ..
            } => Some((execution_id.clone(), id.clone())),
            ChannelMessage::CompensationRequest {
                execution_id,
                original_task_id,
                ..
            } => Some((execution_id.clone(), original_task_id.clone())),
            _ => None,
        };
        if let Some(key) = &routing {
            connection
                .pending
                .lock()
                .expect("pending lock poisoned")
                .insert(key.clone());
        }

        connection.outbound.send(message).map_err(|_| {
            if let Some((orchestration_id, task_id)) = &routing {
                self.clear_pending(&connection, orchestration_id, task_id);
            }
            DispatchError::SendFailed("session writer closed".to_string())
        })
    }

    fn is_healthy(&self, service_id: &ServiceId) -> bool {
        self.health
            .get(service_id)
            .map(|sender| *sender.borrow())
            .unwrap_or(false)
    }

    async fn wait_healthy(&self, service_id: &ServiceId) {
        let mut rx = self.health_receiver(service_id);
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
