//! API-key authentication for the HTTP surface.
//!
//! Every route except project registration requires `X-API-Key`; additional
//! project keys are as privileged as the primary one.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use orra_core::{ApiKey, Project};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Extractor resolving the caller's project from the `X-API-Key` header.
pub struct AuthenticatedProject(pub Project);

impl FromRequestParts<AppState> for AuthenticatedProject {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing api key"))?;

        let project = state.projects.authenticate(&ApiKey::from(key)).await?;
        Ok(Self(project))
    }
}
