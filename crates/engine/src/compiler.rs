//! Graph compiler: turns a planner draft into a frozen, validated task graph.
//!
//! Any compile failure marks the orchestration not actionable with a reason
//! naming the offending task, service or reference; compile errors never
//! surface as internal errors.

use crate::registry::ServiceRegistry;
use orra_core::graph::{Binding, TaskGraph, TaskNode};
use orra_core::schema::FieldKind;
use orra_core::{DomainError, ProjectId, Result, ServiceInfo, TaskId};
use orra_ports::planner::{PlanDraft, Planner};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

pub struct GraphCompiler {
    planner: Arc<dyn Planner>,
    services: Arc<ServiceRegistry>,
}

impl GraphCompiler {
    pub fn new(planner: Arc<dyn Planner>, services: Arc<ServiceRegistry>) -> Self {
        Self { planner, services }
    }

    /// Produce a frozen graph for an action, or a `NotActionable` error.
    pub async fn compile(
        &self,
        project_id: &ProjectId,
        action: &str,
        input: &serde_json::Value,
    ) -> Result<TaskGraph> {
        let catalogue = self.services.describe_for_project(project_id).await;
        if catalogue.is_empty() {
            return Err(DomainError::NotActionable(
                "project has no registered services".to_string(),
            ));
        }

        let draft = self
            .planner
            .plan(action, input, &catalogue)
            .await
            .map_err(|e| DomainError::NotActionable(format!("planning failed: {e}")))?;

        self.lower(project_id, input, draft).await
    }

    /// Validate and freeze a draft against the project's live services.
    async fn lower(
        &self,
        project_id: &ProjectId,
        input: &serde_json::Value,
        draft: PlanDraft,
    ) -> Result<TaskGraph> {
        if draft.tasks.is_empty() {
            return Err(DomainError::NotActionable(
                "planner returned an empty task list".to_string(),
            ));
        }

        let mut keys = BTreeSet::new();
        for task in &draft.tasks {
            if !keys.insert(task.key.as_str()) {
                return Err(DomainError::NotActionable(format!(
                    "duplicate task key {}",
                    task.key
                )));
            }
        }

        // Resolve service names; unknown names are not actionable.
        let mut resolved: HashMap<&str, ServiceInfo> = HashMap::new();
        for task in &draft.tasks {
            let service = self
                .services
                .get_by_name(project_id, &task.service_name)
                .await
                .map_err(|_| {
                    DomainError::NotActionable(format!(
                        "unknown service {} referenced by task {}",
                        task.service_name, task.key
                    ))
                })?;
            resolved.insert(task.key.as_str(), service);
        }

        // Parse bindings and build the dependency edges over draft keys.
        let mut bindings_by_key: BTreeMap<&str, BTreeMap<String, Binding>> = BTreeMap::new();
        let mut upstream: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for task in &draft.tasks {
            let mut bindings = BTreeMap::new();
            let mut deps = BTreeSet::new();
            for (field, value) in &task.inputs {
                let binding = Binding::parse(value)?;
                if let Binding::Task { key, .. } = &binding {
                    let dep = keys.get(key.as_str()).copied().ok_or_else(|| {
                        DomainError::NotActionable(format!(
                            "task {} references unknown task {key}",
                            task.key
                        ))
                    })?;
                    deps.insert(dep);
                }
                bindings.insert(field.clone(), binding);
            }
            bindings_by_key.insert(task.key.as_str(), bindings);
            upstream.insert(task.key.as_str(), deps);
        }

        // Kahn over draft keys: assigns topological positions and rejects
        // cycles in one pass.
        let order = topological_keys(&draft, &upstream)?;

        // Validate bindings against schemas in topological order, so every
        // referenced producer is already type-checked.
        for &key in &order {
            let task = draft
                .tasks
                .iter()
                .find(|t| t.key == key)
                .expect("ordered key comes from draft");
            let consumer = &resolved[key];
            let bindings = &bindings_by_key[key];

            let bound: BTreeSet<String> = bindings.keys().cloned().collect();
            let missing = consumer.input_schema.missing_required(&bound);
            if !missing.is_empty() {
                return Err(DomainError::NotActionable(format!(
                    "task {} does not bind required field(s) {} of service {}",
                    task.key,
                    missing.join(", "),
                    consumer.name
                )));
            }

            for (field, binding) in bindings {
                let Some(expected) = consumer.input_schema.field(field) else {
                    return Err(DomainError::NotActionable(format!(
                        "task {} binds unknown field {field} of service {}",
                        task.key, consumer.name
                    )));
                };
                let produced = self.binding_kind(binding, input, &resolved)?;
                if !produced.flows_into(expected) {
                    return Err(DomainError::NotActionable(format!(
                        "task {} field {field}: {produced} does not satisfy {expected} \
                         expected by service {}",
                        task.key, consumer.name
                    )));
                }
            }
        }

        // The final output must itself resolve.
        let output = Binding::parse(&draft.output)?;
        if let Binding::Task { key, field } = &output {
            let producer = resolved.get(key.as_str()).ok_or_else(|| {
                DomainError::NotActionable(format!("output references unknown task {key}"))
            })?;
            if producer.output_schema.field(field).is_none() {
                return Err(DomainError::NotActionable(format!(
                    "output references unknown field {field} of task {key}"
                )));
            }
        }

        // Freeze: stable ids in topological order.
        let nodes = order
            .iter()
            .enumerate()
            .map(|(index, &key)| {
                let service = &resolved[key];
                TaskNode {
                    id: TaskId::indexed(index),
                    service_id: service.id.clone(),
                    service_name: service.name.clone(),
                    input_bindings: bindings_by_key[key].clone(),
                    output_key: key.to_string(),
                }
            })
            .collect();

        let graph = TaskGraph { nodes, output };
        debug!(tasks = graph.nodes.len(), "graph compiled");
        Ok(graph)
    }

    /// Kind a binding produces, checked against its source.
    fn binding_kind(
        &self,
        binding: &Binding,
        input: &serde_json::Value,
        resolved: &HashMap<&str, ServiceInfo>,
    ) -> Result<FieldKind> {
        match binding {
            Binding::Literal(value) => Ok(FieldKind::of_value(value)),
            Binding::Input { field } => {
                let value = input.get(field).ok_or_else(|| {
                    DomainError::NotActionable(format!(
                        "reference $input.{field} has no matching input field"
                    ))
                })?;
                Ok(FieldKind::of_value(value))
            }
            Binding::Task { key, field } => {
                let producer = resolved.get(key.as_str()).ok_or_else(|| {
                    DomainError::NotActionable(format!("reference to unknown task {key}"))
                })?;
                producer.output_schema.field(field).ok_or_else(|| {
                    DomainError::NotActionable(format!(
                        "task {key} does not produce field {field}"
                    ))
                })
            }
        }
    }
}

/// Topological order over draft keys, deterministic (queue seeded in draft
/// order) and cycle-rejecting.
fn topological_keys<'a>(
    draft: &'a PlanDraft,
    upstream: &HashMap<&'a str, BTreeSet<&'a str>>,
) -> Result<Vec<&'a str>> {
    let mut counts: HashMap<&'a str, usize> = draft
        .tasks
        .iter()
        .map(|t| (t.key.as_str(), upstream[t.key.as_str()].len()))
        .collect();
    let mut downstream: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
    for (&key, deps) in upstream {
        for &dep in deps {
            downstream.entry(dep).or_default().push(key);
        }
    }

    let mut queue: VecDeque<&'a str> = draft
        .tasks
        .iter()
        .map(|t| t.key.as_str())
        .filter(|k| counts[k] == 0)
        .collect();
    let mut order = Vec::with_capacity(draft.tasks.len());

    while let Some(key) = queue.pop_front() {
        order.push(key);
        if let Some(successors) = downstream.get(key) {
            let mut unlocked: Vec<&'a str> = Vec::new();
            for &succ in successors {
                let count = counts.get_mut(succ).expect("successor is a draft key");
                *count -= 1;
                if *count == 0 {
                    unlocked.push(succ);
                }
            }
            unlocked.sort_unstable();
            queue.extend(unlocked);
        }
    }

    if order.len() != draft.tasks.len() {
        return Err(DomainError::NotActionable(
            "task graph contains a cycle".to_string(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orra_core::schema::{object_schema, FieldKind};
    use orra_core::service::{IdempotencyBehavior, ServiceType};
    use orra_core::ServiceId;
    use orra_ports::planner::{DraftTask, PlannerError, ServiceDescriptor};
    use serde_json::json;

    struct FixedPlanner(PlanDraft);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(
            &self,
            _action: &str,
            _input: &serde_json::Value,
            _services: &[ServiceDescriptor],
        ) -> std::result::Result<PlanDraft, PlannerError> {
            Ok(self.0.clone())
        }
    }

    fn service(project: &ProjectId, name: &str, input: orra_core::Schema, output: orra_core::Schema) -> ServiceInfo {
        ServiceInfo {
            id: ServiceId::generate(),
            project_id: project.clone(),
            name: name.to_string(),
            service_type: ServiceType::Service,
            description: String::new(),
            input_schema: input,
            output_schema: output,
            version: 1,
            idempotency_behavior: IdempotencyBehavior::default(),
            revertible: false,
            compensation_input_schema: None,
            task_timeout_secs: None,
        }
    }

    async fn registry_with_chain(project: &ProjectId) -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register_or_update(service(
                project,
                "fetcher",
                object_schema(&[("url", FieldKind::String)], &["url"]),
                object_schema(&[("doc", FieldKind::String)], &["doc"]),
            ))
            .await
            .unwrap();
        registry
            .register_or_update(service(
                project,
                "summariser",
                object_schema(&[("doc", FieldKind::String)], &["doc"]),
                object_schema(&[("text", FieldKind::String)], &["text"]),
            ))
            .await
            .unwrap();
        registry
    }

    fn chain_draft() -> PlanDraft {
        PlanDraft {
            tasks: vec![
                DraftTask {
                    key: "fetch".into(),
                    service_name: "fetcher".into(),
                    inputs: [("url".to_string(), json!("$input.url"))].into_iter().collect(),
                },
                DraftTask {
                    key: "summary".into(),
                    service_name: "summariser".into(),
                    inputs: [("doc".to_string(), json!("$tasks.fetch.doc"))]
                        .into_iter()
                        .collect(),
                },
            ],
            output: json!("$tasks.summary.text"),
        }
    }

    async fn compile(draft: PlanDraft, project: &ProjectId) -> Result<TaskGraph> {
        let registry = registry_with_chain(project).await;
        let compiler = GraphCompiler::new(Arc::new(FixedPlanner(draft)), registry);
        compiler
            .compile(project, "summarise", &json!({"url": "u"}))
            .await
    }

    #[tokio::test]
    async fn compiles_two_task_chain_with_stable_ids() {
        let project = ProjectId::generate();
        let graph = compile(chain_draft(), &project).await.unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].id, TaskId::indexed(0));
        assert_eq!(graph.nodes[0].output_key, "fetch");
        assert_eq!(graph.nodes[1].id, TaskId::indexed(1));
        assert_eq!(graph.nodes[1].output_key, "summary");
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn unknown_service_is_not_actionable_and_names_it() {
        let project = ProjectId::generate();
        let mut draft = chain_draft();
        draft.tasks[1].service_name = "C".into();

        let err = compile(draft, &project).await.unwrap_err();
        match err {
            DomainError::NotActionable(reason) => assert!(reason.contains('C')),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dangling_reference_is_not_actionable() {
        let project = ProjectId::generate();
        let mut draft = chain_draft();
        draft.tasks[1].inputs =
            [("doc".to_string(), json!("$tasks.nope.doc"))].into_iter().collect();

        let err = compile(draft, &project).await.unwrap_err();
        assert!(matches!(err, DomainError::NotActionable(_)));
    }

    #[tokio::test]
    async fn cycle_is_not_actionable() {
        let project = ProjectId::generate();
        let draft = PlanDraft {
            tasks: vec![
                DraftTask {
                    key: "a".into(),
                    service_name: "summariser".into(),
                    inputs: [("doc".to_string(), json!("$tasks.b.text"))].into_iter().collect(),
                },
                DraftTask {
                    key: "b".into(),
                    service_name: "summariser".into(),
                    inputs: [("doc".to_string(), json!("$tasks.a.text"))].into_iter().collect(),
                },
            ],
            output: json!("$tasks.b.text"),
        };
        let err = compile(draft, &project).await.unwrap_err();
        match err {
            DomainError::NotActionable(reason) => assert!(reason.contains("cycle")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn schema_mismatch_is_not_actionable() {
        let project = ProjectId::generate();
        let mut draft = chain_draft();
        // bind a number literal to a string field
        draft.tasks[0].inputs = [("url".to_string(), json!(42))].into_iter().collect();

        let err = compile(draft, &project).await.unwrap_err();
        match err {
            DomainError::NotActionable(reason) => assert!(reason.contains("url")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_required_binding_is_not_actionable() {
        let project = ProjectId::generate();
        let mut draft = chain_draft();
        draft.tasks[0].inputs.clear();

        let err = compile(draft, &project).await.unwrap_err();
        match err {
            DomainError::NotActionable(reason) => assert!(reason.contains("url")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn output_must_reference_a_known_field() {
        let project = ProjectId::generate();
        let mut draft = chain_draft();
        draft.output = json!("$tasks.summary.nope");

        let err = compile(draft, &project).await.unwrap_err();
        assert!(matches!(err, DomainError::NotActionable(_)));
    }

    #[tokio::test]
    async fn empty_catalogue_is_not_actionable() {
        let project = ProjectId::generate();
        let registry = Arc::new(ServiceRegistry::new());
        let compiler = GraphCompiler::new(Arc::new(FixedPlanner(chain_draft())), registry);
        let err = compiler
            .compile(&project, "summarise", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotActionable(_)));
    }
}
