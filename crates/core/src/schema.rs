//! Service input/output schemas and the structural compatibility rule used by
//! the graph compiler.
//!
//! Schemas are a small subset of JSON Schema: a flat object with typed
//! properties and a `required` list. A consumer accepts a producer field when
//! the types line up (integers widen to numbers, `any` accepts everything);
//! consumers may declare optional fields the producer never emits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property type inside a service schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    /// Structural subtype check: can a value of `self` flow into a slot
    /// declared as `consumer`?
    pub fn flows_into(self, consumer: FieldKind) -> bool {
        match (self, consumer) {
            (_, FieldKind::Any) | (FieldKind::Any, _) => true,
            (FieldKind::Integer, FieldKind::Number) => true,
            (a, b) => a == b,
        }
    }

    /// Kind of a literal JSON value, for checking literal bindings.
    pub fn of_value(value: &serde_json::Value) -> FieldKind {
        match value {
            serde_json::Value::String(_) => FieldKind::String,
            serde_json::Value::Bool(_) => FieldKind::Boolean,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
            serde_json::Value::Number(_) => FieldKind::Number,
            serde_json::Value::Array(_) => FieldKind::Array,
            serde_json::Value::Object(_) => FieldKind::Object,
            serde_json::Value::Null => FieldKind::Any,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

impl Property {
    pub fn new(kind: FieldKind) -> Self {
        Self { kind }
    }
}

/// Flat object schema attached to a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Schema {
    pub fn empty() -> Self {
        Self {
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<FieldKind> {
        self.properties.get(name).map(|p| p.kind)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Required fields with no binding supplied by the caller.
    pub fn missing_required<'a>(
        &'a self,
        bound: &std::collections::BTreeSet<String>,
    ) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|r| !bound.contains(r.as_str()))
            .map(|r| r.as_str())
            .collect()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builder-ish helper used heavily by tests and the compiler.
pub fn object_schema(fields: &[(&str, FieldKind)], required: &[&str]) -> Schema {
    Schema {
        properties: fields
            .iter()
            .map(|(name, kind)| (name.to_string(), Property::new(*kind)))
            .collect(),
        required: required.iter().map(|r| r.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn identical_kinds_flow() {
        assert!(FieldKind::String.flows_into(FieldKind::String));
        assert!(FieldKind::Object.flows_into(FieldKind::Object));
    }

    #[test]
    fn integer_widens_to_number_but_not_back() {
        assert!(FieldKind::Integer.flows_into(FieldKind::Number));
        assert!(!FieldKind::Number.flows_into(FieldKind::Integer));
    }

    #[test]
    fn any_accepts_and_is_accepted() {
        assert!(FieldKind::Any.flows_into(FieldKind::String));
        assert!(FieldKind::Array.flows_into(FieldKind::Any));
    }

    #[test]
    fn mismatched_kinds_do_not_flow() {
        assert!(!FieldKind::String.flows_into(FieldKind::Boolean));
        assert!(!FieldKind::Array.flows_into(FieldKind::Object));
    }

    #[test]
    fn literal_value_kinds() {
        assert_eq!(
            FieldKind::of_value(&serde_json::json!("x")),
            FieldKind::String
        );
        assert_eq!(FieldKind::of_value(&serde_json::json!(3)), FieldKind::Integer);
        assert_eq!(
            FieldKind::of_value(&serde_json::json!(3.5)),
            FieldKind::Number
        );
        assert_eq!(
            FieldKind::of_value(&serde_json::json!({"a": 1})),
            FieldKind::Object
        );
    }

    #[test]
    fn missing_required_reports_unbound_fields() {
        let schema = object_schema(
            &[("doc", FieldKind::String), ("lang", FieldKind::String)],
            &["doc", "lang"],
        );
        let bound: BTreeSet<String> = ["doc".to_string()].into_iter().collect();
        assert_eq!(schema.missing_required(&bound), vec!["lang"]);
    }

    #[test]
    fn schema_parses_json_schema_subset() {
        let schema: Schema = serde_json::from_value(serde_json::json!({
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        }))
        .unwrap();
        assert_eq!(schema.field("url"), Some(FieldKind::String));
        assert!(schema.is_required("url"));
    }
}
