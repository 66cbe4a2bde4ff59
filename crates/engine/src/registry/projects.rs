//! Project registry: api key -> project resolution plus key and webhook
//! management.

use orra_core::{ApiKey, DomainError, Project, ProjectId, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
struct ProjectIndex {
    projects: HashMap<ProjectId, Project>,
    by_api_key: HashMap<ApiKey, ProjectId>,
}

#[derive(Debug, Default)]
pub struct ProjectRegistry {
    inner: RwLock<ProjectIndex>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Project {
        let project = Project::new();
        let mut inner = self.inner.write().await;
        inner
            .by_api_key
            .insert(project.api_key.clone(), project.id.clone());
        inner.projects.insert(project.id.clone(), project.clone());
        info!(project_id = %project.id, "project registered");
        project
    }

    /// Resolve an API key (primary or additional) to its project.
    pub async fn authenticate(&self, key: &ApiKey) -> Result<Project> {
        let inner = self.inner.read().await;
        let project_id = inner
            .by_api_key
            .get(key)
            .ok_or_else(|| DomainError::Unauthorized("invalid api key".to_string()))?;
        inner
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| DomainError::Internal("api key index out of sync".to_string()))
    }

    pub async fn get(&self, id: &ProjectId) -> Result<Project> {
        self.inner
            .read()
            .await
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("project {id}")))
    }

    /// Mint an additional key with the same privileges as the primary.
    pub async fn mint_api_key(&self, id: &ProjectId) -> Result<ApiKey> {
        let mut inner = self.inner.write().await;
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("project {id}")))?;
        let key = project.mint_api_key();
        let project_id = project.id.clone();
        inner.by_api_key.insert(key.clone(), project_id);
        Ok(key)
    }

    pub async fn add_webhook(&self, id: &ProjectId, url: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("project {id}")))?;
        project.add_webhook(url)?;
        info!(project_id = %id, url, "webhook registered");
        Ok(())
    }

    pub async fn webhooks(&self, id: &ProjectId) -> Result<Vec<String>> {
        Ok(self.get(id).await?.webhooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_authenticate_with_primary_key() {
        let registry = ProjectRegistry::new();
        let project = registry.create().await;

        let resolved = registry.authenticate(&project.api_key).await.unwrap();
        assert_eq!(resolved.id, project.id);
    }

    #[tokio::test]
    async fn additional_keys_resolve_to_the_same_project() {
        let registry = ProjectRegistry::new();
        let project = registry.create().await;

        let extra = registry.mint_api_key(&project.id).await.unwrap();
        let resolved = registry.authenticate(&extra).await.unwrap();
        assert_eq!(resolved.id, project.id);
        assert!(resolved.additional_api_keys.contains(&extra));
    }

    #[tokio::test]
    async fn unknown_key_is_unauthorized() {
        let registry = ProjectRegistry::new();
        registry.create().await;

        let err = registry.authenticate(&ApiKey::generate()).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn webhooks_accumulate_per_project() {
        let registry = ProjectRegistry::new();
        let project = registry.create().await;

        registry
            .add_webhook(&project.id, "https://example.com/a")
            .await
            .unwrap();
        registry
            .add_webhook(&project.id, "https://example.com/b")
            .await
            .unwrap();

        let hooks = registry.webhooks(&project.id).await.unwrap();
        assert_eq!(hooks, vec!["https://example.com/a", "https://example.com/b"]);
    }
}
