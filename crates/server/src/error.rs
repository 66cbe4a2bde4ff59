//! HTTP error mapping.
//!
//! Domain errors never leak stack traces: each kind maps to one status code
//! and a small JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orra_core::DomainError;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn unauthorized(message: &str) -> Self {
        Self(DomainError::Unauthorized(message.to_string()))
    }

    pub fn validation(message: &str) -> Self {
        Self(DomainError::Validation(message.to_string()))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::NotActionable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::Transient(_)
            | DomainError::Permanent(_)
            | DomainError::InvalidStateTransition { .. }
            | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            DomainError::Validation(_) => "validation",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::NotFound(_) => "not_found",
            DomainError::NotActionable(_) => "not_actionable",
            DomainError::Transient(_) => "transient",
            DomainError::Permanent(_) => "permanent",
            DomainError::InvalidStateTransition { .. } | DomainError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
