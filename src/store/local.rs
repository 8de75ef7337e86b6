//! Local file-based user store.
//!
//! Keeps every user resource in one JSON document. Each mutation reads the
//! document, applies the change and writes it back through a temporary file
//! and a rename, all under an async mutex so that passes for different keys
//! never lose each other's writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{OperatorError, Result, StoreError};

use super::memory::Catalog;
use super::port::UserStore;
use super::types::{ResourceKey, UserResource, UserSpec, UserStatus};

/// Default store directory name.
const STORE_DIR: &str = ".userpool";

/// Store file name.
const STORE_FILE: &str = "users.json";

/// Current version of the store document format.
pub const STORE_VERSION: &str = "1";

/// On-disk document.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    #[serde(default)]
    users: Vec<UserResource>,
}

/// Local file-based user store.
#[derive(Debug)]
pub struct LocalUserStore {
    /// Path to the store file.
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl LocalUserStore {
    /// Creates a store in `.userpool/` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| OperatorError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STORE_DIR);

        Ok(Self::with_path(base_dir.join(STORE_FILE)))
    }

    /// Creates a store backed by the given file.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the catalog; a missing file is an empty store.
    async fn load(&self) -> Result<Catalog> {
        if !self.path.exists() {
            debug!("Store file does not exist: {}", self.path.display());
            return Ok(Catalog::default());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            OperatorError::Store(StoreError::corrupted(format!("Failed to read store file: {e}")))
        })?;

        let document: StoreDocument = serde_json::from_str(&content).map_err(|e| {
            OperatorError::Store(StoreError::corrupted(format!("Failed to parse store file: {e}")))
        })?;

        if document.version != STORE_VERSION {
            return Err(OperatorError::Store(StoreError::corrupted(format!(
                "unsupported store version {}, expected {STORE_VERSION}",
                document.version
            ))));
        }

        Ok(Catalog::from_resources(document.users))
    }

    /// Writes the catalog atomically.
    async fn save(&self, catalog: &Catalog) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            debug!("Creating store directory: {}", parent.display());
            fs::create_dir_all(parent).await.map_err(|e| {
                OperatorError::Store(StoreError::write(format!("Failed to create store directory: {e}")))
            })?;
        }

        let document = StoreDocument {
            version: STORE_VERSION.to_string(),
            users: catalog.resources(),
        };
        let content = serde_json::to_string_pretty(&document).map_err(|e| {
            OperatorError::Store(StoreError::SerializationError {
                message: format!("Failed to serialize store: {e}"),
            })
        })?;

        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            OperatorError::Store(StoreError::write(format!("Failed to create temp store file: {e}")))
        })?;
        file.write_all(content.as_bytes()).await.map_err(|e| {
            OperatorError::Store(StoreError::write(format!("Failed to write store file: {e}")))
        })?;
        file.sync_all().await.map_err(|e| {
            OperatorError::Store(StoreError::write(format!("Failed to sync store file: {e}")))
        })?;

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            OperatorError::Store(StoreError::write(format!("Failed to rename store file: {e}")))
        })?;

        Ok(())
    }

    /// Runs a mutation under the write lock and persists the result.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T> + Send) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load().await?;
        let value = f(&mut catalog)?;
        self.save(&catalog).await?;
        Ok(value)
    }
}

#[async_trait]
impl UserStore for LocalUserStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<UserResource>> {
        Ok(self.load().await?.get(key))
    }

    async fn list(&self) -> Result<Vec<UserResource>> {
        Ok(self.load().await?.resources())
    }

    async fn apply(&self, key: &ResourceKey, spec: UserSpec) -> Result<UserResource> {
        info!("Applying {key} to {}", self.path.display());
        self.mutate(|c| c.apply(key, spec)).await
    }

    async fn request_delete(&self, key: &ResourceKey) -> Result<()> {
        info!("Requesting deletion of {key}");
        self.mutate(|c| c.request_delete(key)).await
    }

    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        self.mutate(|c| c.add_finalizer(key, finalizer)).await
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        self.mutate(|c| c.remove_finalizer(key, finalizer)).await
    }

    async fn update_status(&self, key: &ResourceKey, status: UserStatus) -> Result<()> {
        self.mutate(|c| c.update_status(key, status)).await
    }

    fn store_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USER_FINALIZER;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalUserStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalUserStore::with_path(temp_dir.path().join("nested").join(STORE_FILE));
        (store, temp_dir)
    }

    fn spec(email: &str) -> UserSpec {
        UserSpec {
            email: Some(email.to_string()),
            enabled: Some(true),
        }
    }

    #[tokio::test]
    async fn test_empty_store() {
        let (store, _temp) = create_test_store();
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_apply_and_reload() {
        let (store, temp) = create_test_store();
        let key = ResourceKey::parse("team/alice");
        store.apply(&key, spec("a@x.com")).await.expect("apply");
        store.add_finalizer(&key, USER_FINALIZER).await.expect("finalizer");

        let reopened = LocalUserStore::with_path(temp.path().join("nested").join(STORE_FILE));
        let loaded = reopened.get(&key).await.expect("get").expect("present");
        assert_eq!(loaded.spec.email(), "a@x.com");
        assert!(loaded.has_finalizer(USER_FINALIZER));
    }

    #[tokio::test]
    async fn test_status_persisted() {
        let (store, _temp) = create_test_store();
        let key = ResourceKey::parse("alice");
        store.apply(&key, spec("a@x.com")).await.expect("apply");

        let status = UserStatus {
            provisioned: true,
            ..UserStatus::default()
        };
        store.update_status(&key, status).await.expect("status");

        let loaded = store.get(&key).await.expect("get").expect("present");
        assert!(loaded.status.expect("status").provisioned);
    }

    #[tokio::test]
    async fn test_corrupted_file() {
        let (store, _temp) = create_test_store();
        let parent = store.path().parent().expect("parent");
        fs::create_dir_all(parent).await.expect("dir");
        fs::write(store.path(), "not json").await.expect("write");

        assert!(store.list().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_not_lost() {
        let (store, _temp) = create_test_store();
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = ResourceKey::parse(&format!("user-{i}"));
                store.apply(&key, spec("x@x.com")).await.expect("apply");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(store.list().await.expect("list").len(), 8);
    }
}
