//! User resource types held by the declarative store.
//!
//! These mirror a namespaced `User` custom resource: operator-owned `spec`,
//! controller-owned `status`, and the metadata fields that drive deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::DesiredUser;

/// Finalizer the reconciler attaches to every user it manages.
pub const USER_FINALIZER: &str = "users.userpool.dev/finalizer";

/// Namespace used when a key has none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identifies a user resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Namespace scope.
    pub namespace: String,
    /// Resource name, which is also the username in the pool.
    pub name: String,
}

/// Operator-declared user spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the account is enabled (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A user resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResource {
    /// Resource key.
    pub key: ResourceKey,
    /// Unique ID assigned by the store.
    pub uid: Uuid,
    /// Incremented on every spec change.
    pub generation: u64,
    /// When the resource was created.
    pub creation_timestamp: DateTime<Utc>,
    /// Set when the operator asked for deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Finalizers blocking removal.
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Desired state.
    pub spec: UserSpec,
    /// Observed state, written by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

/// Lifecycle phase reported in status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserPhase {
    /// Seen, finalizer not yet attached.
    #[default]
    Pending,
    /// Pool matches the spec.
    Synced,
    /// The last pass failed.
    Error,
    /// Deletion in progress.
    Deleting,
}

/// Controller-owned status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// Lifecycle phase.
    pub phase: UserPhase,
    /// Whether the user exists in the pool.
    pub provisioned: bool,
    /// Error of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the current error was first seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_since: Option<DateTime<Utc>>,
    /// When the pool last fully matched the spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Operations applied by the most recent pass.
    #[serde(default)]
    pub applied_operations: Vec<String>,
    /// Generation the status was computed from.
    #[serde(default)]
    pub observed_generation: u64,
    /// Hash of the spec last applied successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

impl ResourceKey {
    /// Creates a key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `namespace/name` or a bare `name` in the default namespace.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new(DEFAULT_NAMESPACE, s),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl UserSpec {
    /// Email with the empty default applied.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }

    /// Enabled flag with the `true` default applied.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

impl UserResource {
    /// Creates a fresh resource.
    #[must_use]
    pub fn new(key: ResourceKey, spec: UserSpec) -> Self {
        Self {
            key,
            uid: Uuid::new_v4(),
            generation: 1,
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            finalizers: Vec::new(),
            spec,
            status: None,
        }
    }

    /// Returns the desired pool record for this resource.
    #[must_use]
    pub fn desired(&self) -> DesiredUser {
        DesiredUser {
            name: self.key.name.clone(),
            email: self.spec.email().to_string(),
            enabled: self.spec.enabled(),
        }
    }

    /// Returns true once the operator has asked for deletion.
    #[must_use]
    pub const fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Returns true if the given finalizer is attached.
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns the current status or an empty one.
    #[must_use]
    pub fn status_or_default(&self) -> UserStatus {
        self.status.clone().unwrap_or_default()
    }
}

impl std::fmt::Display for UserPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Synced => "Synced",
            Self::Error => "Error",
            Self::Deleting => "Deleting",
        };
        write!(f, "{s}")
    }
}
