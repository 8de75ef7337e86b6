//! Identity backend trait definition.
//!
//! This module defines the capability set every identity-provider adapter
//! must provide. The reconciler only ever talks to a pool through it.

use async_trait::async_trait;

use crate::error::BackendError;

use super::types::{DesiredUser, ObservedUser, UserPage};

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Trait for identity provider user pools.
///
/// Implementations own their connection and credentials and must be safe to
/// call concurrently for different usernames.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Creates a user.
    ///
    /// Fails with `AlreadyExists` if the username is taken and with
    /// `InvalidArgument` if the name is empty.
    async fn create_user(&self, user: &DesiredUser) -> BackendResult<()>;

    /// Reads a user. `Ok(None)` means the user does not exist.
    async fn get_user(&self, username: &str) -> BackendResult<Option<ObservedUser>>;

    /// Replaces the user's attributes (email). Fails with `NotFound` if absent.
    async fn update_attributes(&self, user: &DesiredUser) -> BackendResult<()>;

    /// Enables or disables the user. Fails with `NotFound` if absent.
    async fn set_enabled(&self, username: &str, enabled: bool) -> BackendResult<()>;

    /// Deletes a user. Fails with `NotFound` if already absent.
    async fn delete_user(&self, username: &str) -> BackendResult<()>;

    /// Fetches one page of the pool listing.
    ///
    /// `token` is `None` for the first page and the previous page's
    /// continuation token afterwards.
    async fn list_page(&self, token: Option<String>) -> BackendResult<UserPage>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl IdentityBackend for Box<dyn IdentityBackend> {
    async fn create_user(&self, user: &DesiredUser) -> BackendResult<()> {
        (**self).create_user(user).await
    }

    async fn get_user(&self, username: &str) -> BackendResult<Option<ObservedUser>> {
        (**self).get_user(username).await
    }

    async fn update_attributes(&self, user: &DesiredUser) -> BackendResult<()> {
        (**self).update_attributes(user).await
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> BackendResult<()> {
        (**self).set_enabled(username, enabled).await
    }

    async fn delete_user(&self, username: &str) -> BackendResult<()> {
        (**self).delete_user(username).await
    }

    async fn list_page(&self, token: Option<String>) -> BackendResult<UserPage> {
        (**self).list_page(token).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
