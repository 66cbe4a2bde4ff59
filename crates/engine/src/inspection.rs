//! Read-only projection of orchestration state for the inspection endpoint.
//!
//! Field order is fixed and task entries follow graph order, so serializing
//! a record, reloading it and serializing again yields identical bytes.

use orra_core::{Orchestration, OrchestrationId, OrchestrationStatus, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInspection {
    pub id: TaskId,
    pub service_name: String,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationInspection {
    pub id: OrchestrationId,
    pub action: String,
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub tasks: Vec<TaskInspection>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl OrchestrationInspection {
    pub fn project(orchestration: &Orchestration) -> Self {
        let tasks = orchestration
            .graph
            .as_ref()
            .map(|graph| {
                graph
                    .nodes
                    .iter()
                    .filter_map(|node| {
                        orchestration.tasks.get(&node.id).map(|record| TaskInspection {
                            id: node.id.clone(),
                            service_name: node.service_name.clone(),
                            status: record.status,
                            attempts: record.attempts,
                            output: record.result.clone(),
                            error: record.error.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: orchestration.id.clone(),
            action: orchestration.action.clone(),
            status: orchestration.status,
            error: orchestration.error.clone(),
            result: orchestration.output.clone(),
            tasks,
            created_at: orchestration.created_at,
            updated_at: orchestration.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orra_core::graph::{Binding, TaskGraph, TaskNode};
    use orra_core::{ProjectId, ServiceId};
    use serde_json::json;

    fn orchestration() -> Orchestration {
        let mut orch =
            Orchestration::new(ProjectId::generate(), "summarise".into(), json!({"url": "u"}));
        orch.attach_graph(TaskGraph {
            nodes: vec![TaskNode {
                id: TaskId::indexed(0),
                service_id: ServiceId::from("svc-a"),
                service_name: "fetcher".into(),
                input_bindings: [(
                    "url".to_string(),
                    Binding::Input {
                        field: "url".into(),
                    },
                )]
                .into_iter()
                .collect(),
                output_key: "fetch".into(),
            }],
            output: Binding::Task {
                key: "fetch".into(),
                field: "doc".into(),
            },
        });
        orch
    }

    #[test]
    fn projection_follows_graph_order() {
        let orch = orchestration();
        let view = OrchestrationInspection::project(&orch);
        assert_eq!(view.tasks.len(), 1);
        assert_eq!(view.tasks[0].id, TaskId::indexed(0));
        assert_eq!(view.tasks[0].service_name, "fetcher");
        assert_eq!(view.tasks[0].status, TaskStatus::Pending);
    }

    #[test]
    fn serialize_reload_serialize_is_stable() {
        let orch = orchestration();
        let view = OrchestrationInspection::project(&orch);

        let first = serde_json::to_string(&view).unwrap();
        let reloaded: OrchestrationInspection = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&reloaded).unwrap();
        assert_eq!(first, second);
        assert_eq!(reloaded, view);
    }

    #[test]
    fn record_round_trip_preserves_inspection() {
        let orch = orchestration();
        let wire = serde_json::to_string(&orch).unwrap();
        let reloaded: Orchestration = serde_json::from_str(&wire).unwrap();

        let before = OrchestrationInspection::project(&orch);
        let after = OrchestrationInspection::project(&reloaded);
        assert_eq!(
            serde_json::to_string(&before).unwrap(),
            serde_json::to_string(&after).unwrap()
        );
    }
}
