//! Storage backends
//!
//! The persistence boundary: one namespaced key holding the whole
//! serialized pageKey -> notes mapping. Both operations are async and may
//! fail; a backend signalling a "context invalidated" condition is treated
//! as permanently gone by the sync engine.

use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

/// Asynchronous key/value store holding one serialized value per key.
/// No transactional multi-key guarantee is assumed; the engine always
/// writes the full value.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        (**self).set(key, value).await
    }
}

/// In-memory backend for tests and embedding without persistence.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// File-per-key JSON backend for native hosts.
pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed identifiers chosen by this crate, not user input.
        self.root.join(format!("{}.json", key))
    }
}

#[async_trait::async_trait]
impl StorageBackend for JsonFileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Backend(format!(
                "failed to read {:?}: {}",
                path, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);

        // Write to a temp file first, then rename (atomic replace).
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, value).await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("wrote backend value: {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);
        backend.set("k", "v".to_string()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let temp = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(temp.path().join("data"));

        assert_eq!(backend.get("notes").await.unwrap(), None);
        backend.set("notes", "{}".to_string()).await.unwrap();
        assert_eq!(backend.get("notes").await.unwrap(), Some("{}".to_string()));

        backend.set("notes", r#"{"a":[]}"#.to_string()).await.unwrap();
        assert_eq!(
            backend.get("notes").await.unwrap(),
            Some(r#"{"a":[]}"#.to_string())
        );
    }
}
