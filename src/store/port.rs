//! User store trait definition.
//!
//! This module defines the interface to the declarative store of record.
//! The reconciler only reads specs through it and writes finalizers and
//! status; `apply` and `request_delete` are the operator's side.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{ResourceKey, UserResource, UserSpec, UserStatus};

/// Trait for declarative user stores.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Gets a resource. Returns `None` if it does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Option<UserResource>>;

    /// Lists every resource, ordered by key.
    async fn list(&self) -> Result<Vec<UserResource>>;

    /// Creates a resource or replaces its spec, bumping the generation on change.
    async fn apply(&self, key: &ResourceKey, spec: UserSpec) -> Result<UserResource>;

    /// Marks a resource for deletion.
    ///
    /// A resource without finalizers is removed immediately; otherwise only
    /// the deletion timestamp is set and removal waits for the finalizers.
    async fn request_delete(&self, key: &ResourceKey) -> Result<()>;

    /// Attaches a finalizer. No-op if already present.
    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()>;

    /// Detaches a finalizer.
    ///
    /// A resource marked for deletion with no finalizers left is removed.
    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()>;

    /// Replaces the status of a resource.
    async fn update_status(&self, key: &ResourceKey, status: UserStatus) -> Result<()>;

    /// Gets the store type name.
    fn store_type(&self) -> &'static str;
}

#[async_trait]
impl UserStore for Box<dyn UserStore> {
    async fn get(&self, key: &ResourceKey) -> Result<Option<UserResource>> {
        (**self).get(key).await
    }

    async fn list(&self) -> Result<Vec<UserResource>> {
        (**self).list().await
    }

    async fn apply(&self, key: &ResourceKey, spec: UserSpec) -> Result<UserResource> {
        (**self).apply(key, spec).await
    }

    async fn request_delete(&self, key: &ResourceKey) -> Result<()> {
        (**self).request_delete(key).await
    }

    async fn add_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        (**self).add_finalizer(key, finalizer).await
    }

    async fn remove_finalizer(&self, key: &ResourceKey, finalizer: &str) -> Result<()> {
        (**self).remove_finalizer(key, finalizer).await
    }

    async fn update_status(&self, key: &ResourceKey, status: UserStatus) -> Result<()> {
        (**self).update_status(key, status).await
    }

    fn store_type(&self) -> &'static str {
        (**self).store_type()
    }
}
