//! Configuration module for the user pool operator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `userpool.yaml` and environment overrides
//! - Loading `User` manifests
//! - Validation of configuration values and manifests

mod spec;
mod parser;
mod validator;

pub use spec::{
    BackendConfig, BackendKind, BackoffConfig, ControllerConfig, ManifestMetadata, OperatorConfig,
    StoreConfig, UserManifest, USER_API_VERSION, USER_KIND,
};
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
