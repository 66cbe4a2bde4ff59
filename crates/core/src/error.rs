//! Error types shared across the system

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DomainError>;

/// Base error type for the entire system
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("orchestration not actionable: {0}")]
    NotActionable(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn invalid_state_transition(from: &str, to: &str) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True for failures the caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = DomainError::invalid_state_transition("Pending", "Succeeded");
        let msg = err.to_string();
        assert!(msg.contains("Pending"));
        assert!(msg.contains("Succeeded"));
    }

    #[test]
    fn only_transient_errors_report_transient() {
        assert!(DomainError::Transient("socket closed".into()).is_transient());
        assert!(!DomainError::Permanent("bad input".into()).is_transient());
        assert!(!DomainError::Validation("missing field".into()).is_transient());
    }
}
