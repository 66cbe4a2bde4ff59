//! Opaque identifiers for projects, API keys, services, orchestrations and tasks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Tenancy boundary identifier
    ProjectId,
    "p"
);
string_id!(
    /// Registered service or agent identifier, stable across re-registration
    ServiceId,
    "svc"
);
string_id!(
    /// Orchestration identifier
    OrchestrationId,
    "orch"
);

/// Task identifier inside a compiled graph (`task0`, `task1`, ... in
/// topological order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn indexed(index: usize) -> Self {
        Self(format!("task{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Project-scoped API key. Both the primary key and additional keys grant the
/// same privileges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn generate() -> Self {
        Self(format!("sk-orra-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = ProjectId::generate();
        let b = ProjectId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("p-"));
        assert!(ServiceId::generate().as_str().starts_with("svc-"));
        assert!(OrchestrationId::generate().as_str().starts_with("orch-"));
        assert!(ApiKey::generate().as_str().starts_with("sk-orra-"));
    }

    #[test]
    fn task_ids_follow_topological_index() {
        assert_eq!(TaskId::indexed(0).as_str(), "task0");
        assert_eq!(TaskId::indexed(12).as_str(), "task12");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = OrchestrationId::from("orch-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"orch-abc\"");
        let back: OrchestrationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
