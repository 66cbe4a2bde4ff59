//! Domain Core - Pure Business Logic
//!
//! This crate contains the control plane's domain entities, value objects and
//! business rules. It has no dependency on the runtime, the HTTP surface or
//! any transport.

pub mod error;
pub mod graph;
pub mod id;
pub mod orchestration;
pub mod project;
pub mod protocol;
pub mod retry;
pub mod schema;
pub mod service;

pub use crate::error::{DomainError, Result};
pub use crate::graph::{Binding, TaskGraph, TaskNode};
pub use crate::id::{ApiKey, OrchestrationId, ProjectId, ServiceId, TaskId};
pub use crate::orchestration::{Orchestration, OrchestrationStatus, TaskRecord, TaskStatus};
pub use crate::project::Project;
pub use crate::protocol::{
    ChannelMessage, FailureKind, HealthStatus, TaskResultStatus, WorkerFailure,
};
pub use crate::retry::BackoffPolicy;
pub use crate::schema::Schema;
pub use crate::service::{ServiceInfo, ServiceType};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
