//! Compiled task graphs.
//!
//! A graph is frozen at compile time: nodes are held in a flat arena in
//! topological order and edges are derived from input bindings, so the
//! scheduler walks readiness with predecessor counts and adjacency lists
//! instead of a pointer graph.

use crate::error::{DomainError, Result};
use crate::id::{ServiceId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One input slot of a task: either a literal value, a reference to an
/// earlier task's output field (`$tasks.<key>.<field>`) or a reference to the
/// orchestration input (`$input.<field>`).
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(serde_json::Value),
    Task { key: String, field: String },
    Input { field: String },
}

impl Binding {
    /// Parse a draft input value. Strings shaped like `$tasks.*.*` or
    /// `$input.*` are references; everything else is a literal.
    pub fn parse(value: &serde_json::Value) -> Result<Binding> {
        let Some(text) = value.as_str() else {
            return Ok(Binding::Literal(value.clone()));
        };
        if let Some(rest) = text.strip_prefix("$tasks.") {
            let (key, field) = rest.split_once('.').ok_or_else(|| {
                DomainError::NotActionable(format!("malformed task reference: {text}"))
            })?;
            if key.is_empty() || field.is_empty() {
                return Err(DomainError::NotActionable(format!(
                    "malformed task reference: {text}"
                )));
            }
            return Ok(Binding::Task {
                key: key.to_string(),
                field: field.to_string(),
            });
        }
        if let Some(field) = text.strip_prefix("$input.") {
            if field.is_empty() {
                return Err(DomainError::NotActionable(format!(
                    "malformed input reference: {text}"
                )));
            }
            return Ok(Binding::Input {
                field: field.to_string(),
            });
        }
        if text.starts_with('$') {
            return Err(DomainError::NotActionable(format!(
                "unknown reference namespace: {text}"
            )));
        }
        Ok(Binding::Literal(value.clone()))
    }

    fn as_wire(&self) -> serde_json::Value {
        match self {
            Binding::Literal(v) => v.clone(),
            Binding::Task { key, field } => serde_json::Value::String(format!("$tasks.{key}.{field}")),
            Binding::Input { field } => serde_json::Value::String(format!("$input.{field}")),
        }
    }
}

impl Serialize for Binding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.as_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Binding::parse(&value).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Literal(v) => write!(f, "{v}"),
            Binding::Task { key, field } => write!(f, "$tasks.{key}.{field}"),
            Binding::Input { field } => write!(f, "$input.{field}"),
        }
    }
}

/// Static part of one graph node. Execution state (status, attempts, result)
/// lives on the orchestration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub id: TaskId,
    pub service_id: ServiceId,
    pub service_name: String,
    /// Target input field name -> binding.
    pub input_bindings: BTreeMap<String, Binding>,
    /// Key under which this node's output is stored and referenced.
    pub output_key: String,
}

impl TaskNode {
    /// Output keys of the producers this node depends on.
    pub fn upstream_keys(&self) -> BTreeSet<&str> {
        self.input_bindings
            .values()
            .filter_map(|b| match b {
                Binding::Task { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraph {
    /// Nodes in topological order.
    pub nodes: Vec<TaskNode>,
    /// Reference resolved against task outputs (or the orchestration input)
    /// to produce the final orchestration result.
    pub output: Binding,
}

impl TaskGraph {
    pub fn node_index(&self, id: &TaskId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    pub fn index_by_output_key(&self, key: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.output_key == key)
    }

    /// Direct predecessor indexes of each node.
    pub fn predecessors(&self) -> Vec<BTreeSet<usize>> {
        self.nodes
            .iter()
            .map(|node| {
                node.upstream_keys()
                    .iter()
                    .filter_map(|key| self.index_by_output_key(key))
                    .collect()
            })
            .collect()
    }

    /// Direct successor indexes of each node, in topological order.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let preds = self.predecessors();
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for (idx, pred_set) in preds.iter().enumerate() {
            for &p in pred_set {
                adj[p].push(idx);
            }
        }
        for successors in &mut adj {
            successors.sort_unstable();
        }
        adj
    }

    /// Kahn's algorithm; errors when the edge set contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let preds = self.predecessors();
        let adj = self.adjacency();
        let mut counts: Vec<usize> = preds.iter().map(|p| p.len()).collect();
        let mut queue: VecDeque<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &succ in &adj[idx] {
                counts[succ] -= 1;
                if counts[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(DomainError::NotActionable(
                "task graph contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }

    /// All transitive successors of a node.
    pub fn descendants(&self, index: usize) -> BTreeSet<usize> {
        let adj = self.adjacency();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = adj[index].clone();
        while let Some(idx) = stack.pop() {
            if seen.insert(idx) {
                stack.extend(adj[idx].iter().copied());
            }
        }
        seen
    }

    /// Substitute a node's input bindings against the orchestration input and
    /// the collected upstream results.
    pub fn render_input(
        &self,
        index: usize,
        orchestration_input: &serde_json::Value,
        results: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let node = &self.nodes[index];
        let mut rendered = serde_json::Map::new();
        for (field, binding) in &node.input_bindings {
            rendered.insert(
                field.clone(),
                resolve_binding(binding, orchestration_input, results)?,
            );
        }
        Ok(serde_json::Value::Object(rendered))
    }

    /// Resolve the graph's output reference once every node has succeeded.
    pub fn resolve_output(
        &self,
        orchestration_input: &serde_json::Value,
        results: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        resolve_binding(&self.output, orchestration_input, results)
    }
}

fn resolve_binding(
    binding: &Binding,
    orchestration_input: &serde_json::Value,
    results: &BTreeMap<String, serde_json::Value>,
) -> Result<serde_json::Value> {
    match binding {
        Binding::Literal(v) => Ok(v.clone()),
        Binding::Input { field } => orchestration_input
            .get(field)
            .cloned()
            .ok_or_else(|| DomainError::Internal(format!("input field {field} missing"))),
        Binding::Task { key, field } => results
            .get(key)
            .and_then(|out| out.get(field))
            .cloned()
            .ok_or_else(|| {
                DomainError::Internal(format!("unresolved reference $tasks.{key}.{field}"))
            }),
    }
}
