//! Task Dispatcher Port
//!
//! The scheduler pushes envelopes to connected workers through this
//! interface. Every error is a transient condition: the scheduler's retry
//! policy owns the decision to give up.

use async_trait::async_trait;
use orra_core::id::ServiceId;
use orra_core::protocol::ChannelMessage;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("service {0} has no active session")]
    NotConnected(ServiceId),

    #[error("service {0} is unhealthy")]
    Unhealthy(ServiceId),

    #[error("session write failed: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Write an envelope to the service's active session. Returns `Ok` only
    /// once the message has been handed to the peer's writer.
    async fn dispatch(
        &self,
        service_id: &ServiceId,
        message: ChannelMessage,
    ) -> Result<(), DispatchError>;

    /// Current health of the service's session, consulted at dispatch time.
    fn is_healthy(&self, service_id: &ServiceId) -> bool;

    /// Resolve on the next healthy transition (immediately when already
    /// healthy). Waiting here does not consume retry budget.
    async fn wait_healthy(&self, service_id: &ServiceId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_service() {
        let id = ServiceId::from("svc-a");
        assert!(DispatchError::NotConnected(id.clone())
            .to_string()
            .contains("svc-a"));
        assert!(DispatchError::Unhealthy(id).to_string().contains("svc-a"));
    }
}
