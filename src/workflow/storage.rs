/// JSON file persistence layer
///
/// One pretty-printed JSON document per entity, keyed by id:
/// `{dir}/{id}.json`. Used for both workflow definitions and schedules.

use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Anything persisted as one document per id
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn entity_id(&self) -> &str;
}

impl Entity for WorkflowDefinition {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Key-value persistence contract used by the scheduler and the API layer
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<T>>;
    async fn save(&self, entity: &T) -> Result<()>;
    async fn list_all(&self) -> Result<Vec<T>>;
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// File-backed store, one JSON document per entity
#[derive(Debug, Clone)]
pub struct JsonFileStore<T> {
    dir: PathBuf,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> JsonFileStore<T> {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create storage directory '{}': {}", dir.display(), e))?;
        Ok(Self {
            dir,
            _entity: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(anyhow::anyhow!("Invalid entity id: {:?}", id));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for JsonFileStore<T> {
    async fn load(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
        };
        let entity = serde_json::from_slice(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        Ok(Some(entity))
    }

    /// Write through a temp file and rename so readers never see a torn document
    async fn save(&self, entity: &T) -> Result<()> {
        let path = self.path_for(entity.entity_id())?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(entity)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("💾 Saved {}", path.display());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<T>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut entities = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_slice::<T>(&raw).map_err(anyhow::Error::from));
            match parsed {
                Ok(entity) => entities.push(entity),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable document {}: {}", path.display(), e),
            }
        }
        Ok(entities)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
