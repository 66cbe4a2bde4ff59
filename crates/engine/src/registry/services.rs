//! Service registry: per-project catalogue of services and agents.
//!
//! Re-registration under the same (project, name) keeps the id stable and
//! bumps the version counter.

use orra_core::{DomainError, ProjectId, Result, ServiceId, ServiceInfo};
use orra_ports::planner::ServiceDescriptor;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
struct ServiceIndex {
    services: HashMap<ServiceId, ServiceInfo>,
    by_name: HashMap<(ProjectId, String), ServiceId>,
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    inner: RwLock<ServiceIndex>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new service or update an existing one in place.
    pub async fn register_or_update(&self, incoming: ServiceInfo) -> Result<ServiceInfo> {
        if incoming.name.is_empty() {
            return Err(DomainError::Validation(
                "service name must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;
        let name_key = (incoming.project_id.clone(), incoming.name.clone());

        if let Some(existing_id) = inner.by_name.get(&name_key).cloned() {
            let service = inner
                .services
                .get_mut(&existing_id)
                .ok_or_else(|| DomainError::Internal("service name index out of sync".into()))?;
            service.apply_update(incoming);
            info!(service_id = %service.id, name = %service.name, version = service.version,
                "service re-registered");
            return Ok(service.clone());
        }

        let service = incoming;
        inner.by_name.insert(name_key, service.id.clone());
        inner.services.insert(service.id.clone(), service.clone());
        info!(service_id = %service.id, name = %service.name, kind = %service.service_type,
            "service registered");
        Ok(service)
    }

    pub async fn get(&self, id: &ServiceId) -> Result<ServiceInfo> {
        self.inner
            .read()
            .await
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("service {id}")))
    }

    pub async fn get_by_name(&self, project_id: &ProjectId, name: &str) -> Result<ServiceInfo> {
        let inner = self.inner.read().await;
        let id = inner
            .by_name
            .get(&(project_id.clone(), name.to_string()))
            .ok_or_else(|| DomainError::NotFound(format!("service {name}")))?;
        inner
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::Internal("service name index out of sync".into()))
    }

    pub async fn list_for_project(&self, project_id: &ProjectId) -> Vec<ServiceInfo> {
        let mut services: Vec<ServiceInfo> = self
            .inner
            .read()
            .await
            .services
            .values()
            .filter(|s| &s.project_id == project_id)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    pub async fn belongs_to_project(&self, id: &ServiceId, project_id: &ProjectId) -> bool {
        self.inner
            .read()
            .await
            .services
            .get(id)
            .map(|s| &s.project_id == project_id)
            .unwrap_or(false)
    }

    /// Catalogue shipped to the planning oracle.
    pub async fn describe_for_project(&self, project_id: &ProjectId) -> Vec<ServiceDescriptor> {
        self.list_for_project(project_id)
            .await
            .into_iter()
            .map(|s| ServiceDescriptor {
                name: s.name,
                service_type: s.service_type,
                description: s.description,
                input_schema: s.input_schema,
                output_schema: s.output_schema,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orra_core::schema::{object_schema, FieldKind};
    use orra_core::service::{IdempotencyBehavior, ServiceType};

    fn service(project_id: &ProjectId, name: &str) -> ServiceInfo {
        ServiceInfo {
            id: ServiceId::generate(),
            project_id: project_id.clone(),
            name: name.to_string(),
            service_type: ServiceType::Service,
            description: String::new(),
            input_schema: object_schema(&[("url", FieldKind::String)], &["url"]),
            output_schema: object_schema(&[("doc", FieldKind::String)], &["doc"]),
            version: 1,
            idempotency_behavior: IdempotencyBehavior::default(),
            revertible: false,
            compensation_input_schema: None,
            task_timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn reregistration_keeps_id_and_bumps_version() {
        let registry = ServiceRegistry::new();
        let project = ProjectId::generate();

        let first = registry
            .register_or_update(service(&project, "fetcher"))
            .await
            .unwrap();

        let mut update = service(&project, "fetcher");
        update.revertible = true;
        let second = registry.register_or_update(update).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert!(second.revertible);
    }

    #[tokio::test]
    async fn same_name_in_different_projects_are_distinct() {
        let registry = ServiceRegistry::new();
        let p1 = ProjectId::generate();
        let p2 = ProjectId::generate();

        let a = registry
            .register_or_update(service(&p1, "fetcher"))
            .await
            .unwrap();
        let b = registry
            .register_or_update(service(&p2, "fetcher"))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert!(registry.belongs_to_project(&a.id, &p1).await);
        assert!(!registry.belongs_to_project(&a.id, &p2).await);
    }

    #[tokio::test]
    async fn lookup_by_name_and_listing() {
        let registry = ServiceRegistry::new();
        let project = ProjectId::generate();
        registry
            .register_or_update(service(&project, "summariser"))
            .await
            .unwrap();
        registry
            .register_or_update(service(&project, "fetcher"))
            .await
            .unwrap();

        let found = registry.get_by_name(&project, "fetcher").await.unwrap();
        assert_eq!(found.name, "fetcher");
        assert!(registry.get_by_name(&project, "missing").await.is_err());

        let listed = registry.list_for_project(&project).await;
        let names: Vec<_> = listed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fetcher", "summariser"]);

        let catalogue = registry.describe_for_project(&project).await;
        assert_eq!(catalogue.len(), 2);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let registry = ServiceRegistry::new();
        let err = registry
            .register_or_update(service(&ProjectId::generate(), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
