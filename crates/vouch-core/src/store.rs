//! Key-namespaced persistence facade.
//!
//! The provider persists one blob under a fixed key path and reads it back
//! at startup. The backend is pluggable; writes to the same key are
//! last-writer-wins.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Persistence backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-addressed persistent backend, namespaced by key paths.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `value` under `key_path`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn save(&self, key_path: &[&str], value: Vec<u8>) -> StorageResult<()>;

    /// Load the value under `key_path`, if present.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn load(&self, key_path: &[&str]) -> StorageResult<Option<Vec<u8>>>;

    /// Remove the value under `key_path`, if present.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn remove(&self, key_path: &[&str]) -> StorageResult<()>;
}

/// In-memory storage backend.
///
/// Clones share the same underlying map, so a test can hand the "disk" to a
/// restarted provider.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<Vec<String>, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no values.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn owned_key(key_path: &[&str]) -> Vec<String> {
    key_path.iter().map(|s| (*s).to_string()).collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, key_path: &[&str], value: Vec<u8>) -> StorageResult<()> {
        self.entries.lock().await.insert(owned_key(key_path), value);
        Ok(())
    }

    async fn load(&self, key_path: &[&str]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(&owned_key(key_path)).cloned())
    }

    async fn remove(&self, key_path: &[&str]) -> StorageResult<()> {
        self.entries.lock().await.remove(&owned_key(key_path));
        Ok(())
    }
}
