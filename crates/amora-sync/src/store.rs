//! Persistent key-value storage for the session and cached resources.
//!
//! The core only ever talks to a [`KeyValueStore`]. Two backends ship with
//! the crate: [`FileStore`], a single JSON file that survives restarts, and
//! [`MemoryStore`], for tests and throwaway sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::StoreError;

/// Slot names used by the session manager and the resource cache.
pub mod keys {
    /// Bearer credential.
    pub const TOKEN: &str = "token";
    /// Identity of the logged-in user.
    pub const USER: &str = "user";
    pub const PROFILE: &str = "profile";
    pub const PREFERENCES: &str = "preferences";
    pub const MATCHES: &str = "matches";
    /// Match id to message thread mapping, as one JSON object.
    pub const MESSAGES: &str = "messages";
}

/// Durable, asynchronous storage of string blobs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Non-durable store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// File backend
// =============================================================================

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: HashMap<String, String>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: 1,
            entries: HashMap::new(),
        }
    }
}

/// Store persisted as one JSON file.
///
/// Every mutation rewrites the file through a temp file and an atomic
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreFile>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let data = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            StoreFile::default()
        };

        debug!(path = %path.display(), entries = data.entries.len(), "opened file store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file on disk. Readers see either the old or the new
    /// contents, never a partial write.
    async fn save(&self, data: &StoreFile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let staging = self.path.with_extension("json.partial");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Owner read/write only: the file holds a bearer credential.
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&staging).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.lock().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        let previous = data.entries.insert(key.to_string(), value.to_string());

        if let Err(e) = self.save(&data).await {
            // Keep memory in step with what is on disk.
            match previous {
                Some(old) => data.entries.insert(key.to_string(), old),
                None => data.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        let Some(previous) = data.entries.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.save(&data).await {
            data.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}
