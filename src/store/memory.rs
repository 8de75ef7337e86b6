//! In-memory user store.
//!
//! [`Catalog`] holds the store semantics (generations, deletion timestamps,
//! finalizer-gated removal) and is shared with the file-backed store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{OperatorError, Result, StoreError};

use super::port::UserStore;
use super::types::{ResourceKey, UserResource, UserSpec, UserStatus};

/// Resources indexed by key.
#[derive(Debug, Clone, Default)]
pub(super) struct Catalog {
    users: BTreeMap<ResourceKey, UserResource>,
}

fn not_found(key: &ResourceKey) -> OperatorError {
    OperatorError::Store(StoreError::NotFound {
        key: key.to_string(),
    })
}

impl Catalog {
    pub(super) fn from_resources(resources: Vec<UserResource>) -> Self {
        Self {
            users: resources.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }

    pub(super) fn resources(&self) -> Vec<UserResource> {
        self.users.values().cloned().collect()
    }

    pub(super) fn get(&self, key: &ResourceKey) -> Option<UserResource> {
        self.users.get(key).cloned()
    }

    fn get_mut(&mut self, key: &ResourceKey) -> Result<&mut UserResource> {
        self.users.get_mut(key).ok_or_else(|| not_found(key))
    }

    pub(super) fn apply(&mut self, key: &ResourceKey, spec: UserSpec) -> Result<UserResource> {
        if let Some(existing) = self.users.get_mut(key) {
            if existing.is_being_deleted() {
                return Err(OperatorError::Store(StoreError::write(format!(
                    "{key} is being deleted"
                ))));
            }
            if existing.spec != spec {
                existing.spec = spec;
                existing.generation += 1;
                debug!("Updated spec of {key} (generation {})", existing.generation);
            }
            return Ok(existing.clone());
        }

        let resource = UserResource::new(key.clone(), spec);
        debug!("Created resource {key}");
        self.users.insert(key.clone(), resource.clone());
        Ok(resource)
    }

    pub(super) fn request_delete(&mut self, key: &ResourceKey) -> Result<()> {
        let resource = self.get_mut(key)?;
        if resource.finalizers.is_empty() {
            self.users.remove(key);
            debug!("Removed {key} (no finalizers)");
        } else if resource.deletion_timestamp.is_none() {
            resource.deletion_timestamp = Some(Utc::now());
            debug!("Marked {key} for deletion");
        }
        Ok(())
    }

    pub(super) fn add_finalizer(&mut self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        let resource = self.get_mut(key)?;
        if !resource.has_finalizer(finalizer) {
            resource.finalizers.push(finalizer.to_string());
        }
        Ok(())
    }

    pub(super) fn remove_finalizer(&mut self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        let resource = self.get_mut(key)?;
        resource.finalizers.retain(|f| f != finalizer);

        if resource.is_being_deleted() && resource.finalizers.is_empty() {
            self.users.remove(key);
            debug!("Garbage-collected {key}");
        }
        Ok(())
    }

    pub(super) fn update_status(&mut self, key: &ResourceKey, status: UserStatus) -> Result<()> {
        self.get_mut(key)?.status = Some(status);
        Ok(())
    }
}

/// In-memory user store.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    catalog: RwLock<Catalog>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<UserResource>> {
        Ok(self.catalog.read().await.get(key))
    }

    async fn list(&self) -> Result<Vec<UserResource>> {
        Ok(self.catalog.read().await.resources())
    }

    async fn apply(&self, key: &ResourceKey, spec: UserSpec) -> Result<UserResource> {
        self.catalog.write().await.apply(key, spec)
    }

    async fn request_delete(&self, key: &ResourceKey) -> Result<()> {
        self.catalog.write().await.request_delete(key)
    }

    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        self.catalog.write().await.add_finalizer(key, finalizer)
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        self.catalog.write().await.remove_finalizer(key, finalizer)
    }

    async fn update_status(&self, key: &ResourceKey, status: UserStatus) -> Result<()> {
        self.catalog.write().await.update_status(key, status)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USER_FINALIZER;

    fn spec(email: &str) -> UserSpec {
        UserSpec {
            email: Some(email.to_string()),
            enabled: None,
        }
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_on_change() {
        let store = MemoryUserStore::new();
        let key = ResourceKey::parse("alice");

        let first = store.apply(&key, spec("a@x.com")).await.expect("apply");
        assert_eq!(first.generation, 1);

        let same = store.apply(&key, spec("a@x.com")).await.expect("apply");
        assert_eq!(same.generation, 1);

        let changed = store.apply(&key, spec("b@x.com")).await.expect("apply");
        assert_eq!(changed.generation, 2);
        assert_eq!(changed.uid, first.uid);
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes() {
        let store = MemoryUserStore::new();
        let key = ResourceKey::parse("alice");
        store.apply(&key, spec("a@x.com")).await.expect("apply");

        store.request_delete(&key).await.expect("delete");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_finalizer_blocks_removal() {
        let store = MemoryUserStore::new();
        let key = ResourceKey::parse("alice");
        store.apply(&key, spec("a@x.com")).await.expect("apply");
        store.add_finalizer(&key, USER_FINALIZER).await.expect("finalizer");
        store.add_finalizer(&key, USER_FINALIZER).await.expect("idempotent");

        store.request_delete(&key).await.expect("delete");
        let marked = store.get(&key).await.expect("get").expect("still present");
        assert!(marked.is_being_deleted());
        assert_eq!(marked.finalizers.len(), 1);

        store.remove_finalizer(&key, USER_FINALIZER).await.expect("remove");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_apply_rejected_while_deleting() {
        let store = MemoryUserStore::new();
        let key = ResourceKey::parse("alice");
        store.apply(&key, spec("a@x.com")).await.expect("apply");
        store.add_finalizer(&key, USER_FINALIZER).await.expect("finalizer");
        store.request_delete(&key).await.expect("delete");

        assert!(store.apply(&key, spec("b@x.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_resource_errors() {
        let store = MemoryUserStore::new();
        let key = ResourceKey::parse("ghost");
        assert!(store.update_status(&key, UserStatus::default()).await.is_err());
        assert!(store.request_delete(&key).await.is_err());
    }
}
