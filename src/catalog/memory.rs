use super::not_found;
use crate::errors::Result;
use crate::service::ServiceDefinition;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use std::collections::HashMap;
use std::time::Duration;

use super::CatalogRepository;
use crate::service::StatusUpdate;
use async_trait::async_trait;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// An in-process catalog backed by a lock-guarded map. The default used by tests and
/// by the `supervisorctl` demo binary; nothing here survives a process restart.
#[derive(Clone)]
pub struct InMemoryCatalog {
    services: LockWithTimeout<HashMap<String, ServiceDefinition>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            services: LockWithTimeout::new(HashMap::new()),
        }
    }

    /// Seeds or replaces a definition. Mirrors a "create service" call on the external
    /// catalog store, which this crate does not otherwise implement.
    pub async fn upsert(&self, definition: ServiceDefinition) -> Result<()> {
        let mut guard = self
            .services
            .try_write_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        guard.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut guard = self
            .services
            .try_write_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        guard.remove(id);
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<ServiceDefinition>> {
        let guard = self
            .services
            .try_read_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        Ok(guard.values().cloned().collect())
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn load(&self, id: &str) -> Result<ServiceDefinition> {
        let guard = self
            .services
            .try_read_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        guard.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<()> {
        let mut guard = self
            .services
            .try_write_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        let def = guard.get_mut(id).ok_or_else(|| not_found(id))?;
        def.status = update.status;
        if let Some(pid) = update.pid {
            def.pid = pid;
        }
        if let Some(start_time) = update.start_time {
            def.start_time = start_time;
        }
        if let Some(stop_time) = update.stop_time {
            def.stop_time = stop_time;
        }
        if let Some(last_error) = update.last_error {
            def.last_error = last_error;
        }
        Ok(())
    }

    async fn update_logs(&self, id: &str, lines: &[String]) -> Result<()> {
        let mut guard = self
            .services
            .try_write_with_timeout(Some(LOCK_TIMEOUT))
            .await?;
        let def = guard.get_mut(id).ok_or_else(|| not_found(id))?;
        def.logs = lines.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceStatus, ServiceType};

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let cat = InMemoryCatalog::new();
        let err = cat.load("ghost").await.unwrap_err();
        assert!(matches!(err, crate::errors::SupervisorError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_status_mutates_only_named_fields() {
        let cat = InMemoryCatalog::new();
        let def = ServiceDefinition::new("svc", ServiceType::Backend, "/tmp");
        cat.upsert(def).await.unwrap();

        cat.update_status("svc", StatusUpdate::new(ServiceStatus::Running).with_pid(123))
            .await
            .unwrap();

        let loaded = cat.load("svc").await.unwrap();
        assert_eq!(loaded.status, ServiceStatus::Running);
        assert_eq!(loaded.pid, 123);
        assert_eq!(loaded.last_error, "");
    }

    #[tokio::test]
    async fn update_logs_replaces_snapshot() {
        let cat = InMemoryCatalog::new();
        cat.upsert(ServiceDefinition::new("svc", ServiceType::Backend, "/tmp"))
            .await
            .unwrap();
        cat.update_logs("svc", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let loaded = cat.load("svc").await.unwrap();
        assert_eq!(loaded.logs, vec!["a", "b"]);
    }
}
