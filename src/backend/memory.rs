//! In-process identity backend.
//!
//! Holds the pool in memory. Used for local dry runs (`backend.kind: memory`)
//! and as the pool in reconciler tests: it records every call it receives
//! and can be told to fail the next call of a given operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{BackendError, ErrorKind};

use super::port::{BackendResult, IdentityBackend};
use super::types::{DesiredUser, ObservedUser, UserPage};

/// Default number of users per listing page.
const DEFAULT_PAGE_SIZE: usize = 60;

/// Backend operations, as recorded in the call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `create_user`.
    Create,
    /// `get_user`.
    Get,
    /// `update_attributes`.
    UpdateAttributes,
    /// `set_enabled`.
    SetEnabled,
    /// `delete_user`.
    Delete,
    /// `list_page`.
    ListPage,
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    /// Operation invoked.
    pub op: BackendOp,
    /// Username the call targeted (empty for listings).
    pub username: String,
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<String, ObservedUser>,
    calls: Vec<BackendCall>,
    faults: HashMap<BackendOp, Vec<ErrorKind>>,
}

/// In-memory identity backend.
#[derive(Debug)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    page_size: usize,
    overlapping_pages: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            page_size: DEFAULT_PAGE_SIZE,
            overlapping_pages: false,
        }
    }

    /// Sets the listing page size (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Makes every page after the first repeat the last user of the previous page.
    #[must_use]
    pub const fn with_overlapping_pages(mut self, overlapping: bool) -> Self {
        self.overlapping_pages = overlapping;
        self
    }

    /// Makes the next call of `op` fail with `kind`. Faults queue up per operation.
    pub async fn fail_next(&self, op: BackendOp, kind: ErrorKind) {
        self.inner.write().await.faults.entry(op).or_default().push(kind);
    }

    /// Returns every call received so far.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.inner.read().await.calls.clone()
    }

    /// Returns the number of mutating calls received so far.
    pub async fn mutation_count(&self) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|c| !matches!(c.op, BackendOp::Get | BackendOp::ListPage))
            .count()
    }

    /// Clears the call journal.
    pub async fn clear_calls(&self) {
        self.inner.write().await.calls.clear();
    }

    /// Returns a user without recording a call.
    pub async fn peek(&self, username: &str) -> Option<ObservedUser> {
        self.inner.read().await.users.get(username).cloned()
    }

    /// Inserts a user directly, bypassing the journal.
    pub async fn insert(&self, user: ObservedUser) {
        self.inner.write().await.users.insert(user.username.clone(), user);
    }

    /// Records a call and returns the injected fault for it, if any.
    fn record(inner: &mut Inner, op: BackendOp, username: &str) -> BackendResult<()> {
        inner.calls.push(BackendCall {
            op,
            username: username.to_string(),
        });

        let fault = inner.faults.get_mut(&op).and_then(|queue| {
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        });

        match fault {
            Some(kind) => Err(BackendError::new(kind, format!("injected {kind} on {op:?}"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityBackend for MemoryBackend {
    async fn create_user(&self, user: &DesiredUser) -> BackendResult<()> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::Create, &user.name)?;

        if user.name.is_empty() {
            return Err(BackendError::invalid_argument("username cannot be empty"));
        }
        if inner.users.contains_key(&user.name) {
            return Err(BackendError::already_exists(&user.name));
        }

        debug!("Creating user {} in memory pool", user.name);
        // New accounts start enabled, as with hosted providers.
        inner.users.insert(
            user.name.clone(),
            ObservedUser {
                username: user.name.clone(),
                email: user.email.clone(),
                enabled: true,
            },
        );
        Ok(())
    }

    async fn get_user(&self, username: &str) -> BackendResult<Option<ObservedUser>> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::Get, username)?;

        if username.is_empty() {
            return Err(BackendError::invalid_argument("username cannot be empty"));
        }
        Ok(inner.users.get(username).cloned())
    }

    async fn update_attributes(&self, user: &DesiredUser) -> BackendResult<()> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::UpdateAttributes, &user.name)?;

        let existing = inner
            .users
            .get_mut(&user.name)
            .ok_or_else(|| BackendError::not_found(&user.name))?;
        existing.email.clone_from(&user.email);
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> BackendResult<()> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::SetEnabled, username)?;

        let existing = inner
            .users
            .get_mut(username)
            .ok_or_else(|| BackendError::not_found(username))?;
        existing.enabled = enabled;
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> BackendResult<()> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::Delete, username)?;

        inner
            .users
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(username))
    }

    async fn list_page(&self, token: Option<String>) -> BackendResult<UserPage> {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, BackendOp::ListPage, "")?;

        let offset = match token.as_deref() {
            None | Some("") => 0,
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| BackendError::invalid_argument(format!("malformed token {t}")))?,
        };

        let start = if self.overlapping_pages && offset > 0 {
            offset - 1
        } else {
            offset
        };
        let end = offset.saturating_add(self.page_size).min(inner.users.len());

        let users = inner
            .users
            .values()
            .skip(start)
            .take(end.saturating_sub(start))
            .cloned()
            .collect();
        let next_token = (end < inner.users.len()).then(|| end.to_string());

        Ok(UserPage::new(users, next_token))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
