//! State persistence
//!
//! Providers, API keys, assignments and usage records survive restarts
//! through a [`StateStore`]. The file store writes JSON to a temporary file
//! and renames it over the target so a crash never leaves a partial file.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{ApiAssignment, ApiKey, ApiUsage, Provider, RouterError};

/// Everything the API manager persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub assignments: Vec<ApiAssignment>,
    #[serde(default)]
    pub usage: Vec<ApiUsage>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved state; an empty snapshot when nothing was saved
    async fn load(&self) -> Result<StateSnapshot, RouterError>;

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RouterError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<StateSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StateSnapshot, RouterError> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RouterError> {
        *self.snapshot.lock() = snapshot.clone();
        Ok(())
    }
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persistence_error(action: &str, path: &Path, e: impl std::fmt::Display) -> RouterError {
    RouterError::PersistenceError {
        message: format!("Failed to {} {}: {}", action, path.display(), e),
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<StateSnapshot, RouterError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved state found, starting empty");
                return Ok(StateSnapshot::default());
            }
            Err(e) => return Err(persistence_error("read", &self.path, e)),
        };

        let snapshot: StateSnapshot = serde_json::from_str(&content)
            .map_err(|e| persistence_error("parse", &self.path, e))?;

        info!(
            path = %self.path.display(),
            providers = snapshot.providers.len(),
            api_keys = snapshot.api_keys.len(),
            assignments = snapshot.assignments.len(),
            "Loaded saved state"
        );
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RouterError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error("create directory for", &self.path, e))?;
        }

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| persistence_error("serialize", &self.path, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| persistence_error("write", &tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| persistence_error("replace", &self.path, e))?;

        debug!(path = %self.path.display(), "Saved state");
        Ok(())
    }
}
