//! Registered service/agent descriptors.

use crate::id::{ProjectId, ServiceId};
use crate::schema::Schema;
use serde::{Deserialize, Serialize};

/// Services and agents behave identically inside the control plane; the type
/// only informs planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Service,
    Agent,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Service => write!(f, "service"),
            ServiceType::Agent => write!(f, "agent"),
        }
    }
}

/// How a service treats repeated deliveries of the same idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyBehavior {
    /// Worker deduplicates on the key; re-dispatch is safe.
    KeyedDedup,
    /// Worker executes every delivery; the control plane still never issues
    /// two keys for one task.
    ExecuteAlways,
}

impl Default for IdempotencyBehavior {
    fn default() -> Self {
        IdempotencyBehavior::KeyedDedup
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    /// Bumped on every re-registration under the same (project, name).
    pub version: u64,
    #[serde(default)]
    pub idempotency_behavior: IdempotencyBehavior,
    /// Whether the service accepts compensation requests for completed tasks.
    #[serde(default)]
    pub revertible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_input_schema: Option<Schema>,
    /// Per-task execution timeout override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

impl ServiceInfo {
    /// Apply a re-registration: schemas and capabilities are replaced, the id
    /// stays stable and the version is bumped.
    pub fn apply_update(&mut self, update: ServiceInfo) {
        self.service_type = update.service_type;
        self.description = update.description;
        self.input_schema = update.input_schema;
        self.output_schema = update.output_schema;
        self.idempotency_behavior = update.idempotency_behavior;
        self.revertible = update.revertible;
        self.compensation_input_schema = update.compensation_input_schema;
        self.task_timeout_secs = update.task_timeout_secs;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{object_schema, FieldKind};

    fn sample(name: &str) -> ServiceInfo {
        ServiceInfo {
            id: ServiceId::generate(),
            project_id: ProjectId::generate(),
            name: name.to_string(),
            service_type: ServiceType::Service,
            description: String::new(),
            input_schema: object_schema(&[("url", FieldKind::String)], &["url"]),
            output_schema: object_schema(&[("doc", FieldKind::String)], &["doc"]),
            version: 1,
            idempotency_behavior: IdempotencyBehavior::default(),
            revertible: false,
            compensation_input_schema: None,
            task_timeout_secs: None,
        }
    }

    #[test]
    fn update_bumps_version_and_keeps_id() {
        let mut svc = sample("fetcher");
        let original_id = svc.id.clone();

        let mut update = sample("fetcher");
        update.revertible = true;
        update.output_schema = object_schema(&[("body", FieldKind::String)], &["body"]);
        svc.apply_update(update);

        assert_eq!(svc.id, original_id);
        assert_eq!(svc.version, 2);
        assert!(svc.revertible);
        assert_eq!(svc.output_schema.field("body"), Some(FieldKind::String));
    }

    #[test]
    fn service_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServiceType::Agent).unwrap(),
            "\"agent\""
        );
    }
}
