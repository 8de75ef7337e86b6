//! Configuration specification types for the operator.
//!
//! This module defines the structs that map to the operator configuration
//! file (`userpool.yaml`) and to `User` manifests applied to the store.

use serde::{Deserialize, Serialize};

use crate::store::{ResourceKey, UserSpec, DEFAULT_NAMESPACE};

/// API version accepted in `User` manifests.
pub const USER_API_VERSION: &str = "userpool.dev/v1alpha1";

/// Kind accepted in `User` manifests.
pub const USER_KIND: &str = "User";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperatorConfig {
    /// Identity backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Declarative store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Control loop configuration.
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Identity backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend type.
    #[serde(default)]
    pub kind: BackendKind,
    /// Cognito user pool ID (required for the cognito backend).
    #[serde(default)]
    pub user_pool_id: Option<String>,
    /// AWS region (uses the AWS default chain if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Users requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Deadline for a single backend call in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

/// Identity backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process pool, lost on exit.
    #[default]
    Memory,
    /// AWS Cognito user pool.
    Cognito,
}

/// Declarative store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the store file (defaults to `.userpool/users.json`).
    #[serde(default)]
    pub path: Option<String>,
}

/// Control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Seconds between resyncs.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    /// Maximum passes running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Backoff after failed passes.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// First delay in milliseconds.
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,
    /// Maximum delay in seconds.
    #[serde(default = "default_backoff_max")]
    pub max_secs: u64,
    /// Growth factor per consecutive failure.
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

/// A `User` manifest document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserManifest {
    /// API version.
    pub api_version: String,
    /// Resource kind.
    pub kind: String,
    /// Resource metadata.
    pub metadata: ManifestMetadata,
    /// Desired state.
    #[serde(default)]
    pub spec: UserSpec,
}

/// Manifest metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestMetadata {
    /// Resource name, used as the pool username.
    pub name: String,
    /// Namespace (defaults to `default`).
    #[serde(default)]
    pub namespace: Option<String>,
}

const fn default_page_size() -> u32 {
    60
}

const fn default_call_timeout() -> u64 {
    30
}

const fn default_resync_interval() -> u64 {
    60
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_backoff_initial() -> u64 {
    500
}

const fn default_backoff_max() -> u64 {
    300
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            user_pool_id: None,
            region: None,
            page_size: default_page_size(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            max_concurrency: default_max_concurrency(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_secs: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl UserManifest {
    /// Returns the store key for this manifest.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.metadata
                .namespace
                .as_deref()
                .unwrap_or(DEFAULT_NAMESPACE),
            self.metadata.name.clone(),
        )
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cognito => write!(f, "cognito"),
        }
    }
}
