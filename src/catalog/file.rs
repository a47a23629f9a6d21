use super::not_found;
use super::CatalogRepository;
use crate::errors::{Result, SupervisorError};
use crate::service::{ServiceDefinition, StatusUpdate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A catalog backed by one JSON document per service id under `root`. Writes go to a
/// sibling `.tmp` file and are renamed into place, so a reader never observes a
/// half-written document even if the process is killed mid-write.
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Creates the backing directory if it does not already exist.
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_definition(&self, id: &str) -> Result<ServiceDefinition> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).await.map_err(|_| not_found(id))?;
        let def: ServiceDefinition = serde_json::from_slice(&bytes)?;
        Ok(def)
    }

    async fn write_definition(&self, def: &ServiceDefinition) -> Result<()> {
        let path = self.path_for(&def.id);
        let contents = serde_json::to_string_pretty(def)?;
        self.write_atomic(&path, &contents).await
    }

    /// Seeds or replaces a definition on disk.
    pub async fn upsert(&self, definition: &ServiceDefinition) -> Result<()> {
        self.ensure_root().await?;
        self.write_definition(definition).await
    }
}

#[async_trait]
impl CatalogRepository for FileCatalog {
    async fn load(&self, id: &str) -> Result<ServiceDefinition> {
        self.read_definition(id).await
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<()> {
        let mut def = self.read_definition(id).await?;
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
        self.write_definition(&def).await
    }

    async fn update_logs(&self, id: &str, lines: &[String]) -> Result<()> {
        let mut def = self.read_definition(id).await?;
        def.logs = lines.to_vec();
        self.write_definition(&def).await
    }
}
