use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{ProtocolSettings, Result};
use crate::device::scan::ScanSnapshot;

/// Storage for the single configuration blob of the application
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn save_config(&self, blob: Value) -> Result<()>;

    async fn load_config(&self) -> Result<Option<Value>>;

    async fn clear_config(&self) -> Result<()>;
}

/// Everything written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub settings: ProtocolSettings,
    pub scan: Option<ScanSnapshot>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn new(settings: ProtocolSettings, scan: Option<ScanSnapshot>) -> Self {
        Self {
            settings,
            scan,
            saved_at: Utc::now(),
        }
    }

    pub async fn save(&self, store: &dyn ConfigStore) -> Result<()> {
        store.save_config(serde_json::to_value(self)?).await
    }

    /// Read the stored state. A blob that does not match the expected shape
    /// is logged and treated as absent.
    pub async fn load(store: &dyn ConfigStore) -> Result<Option<Self>> {
        let blob = match store.load_config().await? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        match serde_json::from_value(blob) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                log::warn!("Ignoring stored configuration: {}", e);
                Ok(None)
            }
        }
    }
}

/// JSON file on disk
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn save_config(&self, blob: Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(&blob)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, data).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        log::debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_config(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                log::info!("Configuration cleared at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store. Clones share the same blob.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blob: Arc<Mutex<Option<Value>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn save_config(&self, blob: Value) -> Result<()> {
        *self.blob.lock().await = Some(blob);
        *self.saves.lock().await += 1;
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<Value>> {
        Ok(self.blob.lock().await.clone())
    }

    async fn clear_config(&self) -> Result<()> {
        *self.blob.lock().await = None;
        Ok(())
    }
}
