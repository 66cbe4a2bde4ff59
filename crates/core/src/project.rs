//! Project aggregate: the tenancy boundary owning API keys, webhooks,
//! services and orchestrations.

use crate::error::{DomainError, Result};
use crate::id::{ApiKey, ProjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub api_key: ApiKey,
    #[serde(default)]
    pub additional_api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub webhooks: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Project {
    pub fn new() -> Self {
        Self {
            id: ProjectId::generate(),
            api_key: ApiKey::generate(),
            additional_api_keys: Vec::new(),
            webhooks: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Additional keys carry the same privileges as the primary key.
    pub fn authenticates(&self, key: &ApiKey) -> bool {
        &self.api_key == key || self.additional_api_keys.contains(key)
    }

    pub fn mint_api_key(&mut self) -> ApiKey {
        let key = ApiKey::generate();
        self.additional_api_keys.push(key.clone());
        key
    }

    /// Webhook URLs must be absolute; relative references are rejected at the
    /// HTTP boundary but re-checked here.
    pub fn add_webhook(&mut self, url: &str) -> Result<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DomainError::Validation(format!(
                "webhook url must be absolute: {url}"
            )));
        }
        self.webhooks.push(url.to_string());
        Ok(())
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_and_additional_keys_authenticate() {
        let mut project = Project::new();
        let primary = project.api_key.clone();
        let extra = project.mint_api_key();

        assert!(project.authenticates(&primary));
        assert!(project.authenticates(&extra));
        assert!(!project.authenticates(&ApiKey::generate()));
    }

    #[test]
    fn relative_webhook_urls_are_rejected() {
        let mut project = Project::new();
        assert!(project.add_webhook("https://example.com/hook").is_ok());
        assert!(project.add_webhook("/hook").is_err());
        assert_eq!(project.webhooks.len(), 1);
    }
}
