//! Configuration validation.
//!
//! This module checks the operator configuration and `User` manifests before
//! anything is built from them. Every problem is collected; the first one is
//! returned as the error.

use std::collections::HashSet;
use tracing::debug;
use validator::ValidateEmail;

use crate::error::{ConfigError, OperatorError, Result};

use super::spec::{
    BackendConfig, BackendKind, ControllerConfig, OperatorConfig, UserManifest, USER_API_VERSION,
    USER_KIND,
};

/// Largest page size the Cognito `ListUsers` call accepts.
const MAX_PAGE_SIZE: u32 = 60;

/// Validator for operator configuration and manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an operator configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &OperatorConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_backend(&config.backend, &mut result);
        Self::validate_controller(&config.controller, &mut result);

        if config.store.path.as_deref().is_some_and(str::is_empty) {
            result.error("store.path", "Store path cannot be empty");
        }

        result.into_result("Configuration")
    }

    /// Validates `User` manifests.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_manifests(&self, manifests: &[UserManifest]) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let mut seen = HashSet::new();
        let mut usernames = HashSet::new();

        for (i, manifest) in manifests.iter().enumerate() {
            let field = |name: &str| format!("manifests[{i}].{name}");

            if manifest.api_version != USER_API_VERSION {
                result.error(
                    field("apiVersion"),
                    format!(
                        "Unsupported apiVersion '{}', expected '{USER_API_VERSION}'",
                        manifest.api_version
                    ),
                );
            }
            if manifest.kind != USER_KIND {
                result.error(
                    field("kind"),
                    format!("Unsupported kind '{}', expected '{USER_KIND}'", manifest.kind),
                );
            }

            let name = &manifest.metadata.name;
            if name.trim().is_empty() {
                result.error(field("metadata.name"), "User name cannot be empty");
            } else if name.contains('/') {
                result.error(
                    field("metadata.name"),
                    format!("User name '{name}' cannot contain '/'"),
                );
            }

            let email = manifest.spec.email();
            if !email.is_empty() && !email.validate_email() {
                result.error(
                    field("spec.email"),
                    format!("'{email}' is not a valid email address"),
                );
            }

            if !seen.insert(manifest.key()) {
                result.error(
                    field("metadata.name"),
                    format!("Duplicate user '{}'", manifest.key()),
                );
            } else if !usernames.insert(name.clone()) {
                result.warnings.push(format!(
                    "Username '{name}' is declared in more than one namespace; only the oldest is reconciled"
                ));
            }
        }

        result.into_result("Manifest")
    }

    /// Validates backend configuration.
    fn validate_backend(backend: &BackendConfig, result: &mut ValidationResult) {
        if backend.kind == BackendKind::Cognito
            && backend.user_pool_id.as_deref().is_none_or(str::is_empty)
        {
            result.error(
                "backend.user_pool_id",
                "User pool ID is required when using the cognito backend",
            );
        }

        if backend.page_size == 0 || backend.page_size > MAX_PAGE_SIZE {
            result.error(
                "backend.page_size",
                format!("Page size must be between 1 and {MAX_PAGE_SIZE}"),
            );
        }

        if backend.call_timeout_secs == 0 {
            result.error("backend.call_timeout_secs", "Call timeout must be positive");
        }

        if backend.kind == BackendKind::Memory && backend.user_pool_id.is_some() {
            result
                .warnings
                .push(String::from("backend.user_pool_id is ignored by the memory backend"));
        }
    }

    /// Validates controller configuration.
    fn validate_controller(controller: &ControllerConfig, result: &mut ValidationResult) {
        if controller.resync_interval_secs == 0 {
            result.error(
                "controller.resync_interval_secs",
                "Resync interval must be positive",
            );
        }

        if controller.max_concurrency == 0 {
            result.error("controller.max_concurrency", "Concurrency must be at least 1");
        }

        let backoff = &controller.backoff;
        if backoff.initial_ms == 0 {
            result.error("controller.backoff.initial_ms", "Initial backoff must be positive");
        }
        if backoff.max_secs.saturating_mul(1000) < backoff.initial_ms {
            result.error(
                "controller.backoff.max_secs",
                "Maximum backoff must not be below the initial backoff",
            );
        }
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            result.error("controller.backoff.multiplier", "Multiplier must be at least 1.0");
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn into_result(self, what: &str) -> Result<Self> {
        match self.errors.first() {
            None => {
                debug!("{what} validation passed");
                Ok(self)
            }
            Some(first) => Err(OperatorError::Config(ConfigError::validation(
                first.message.clone(),
                first.field.clone(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn manifests(yaml: &str) -> Vec<UserManifest> {
        ConfigParser::new().parse_manifests(yaml, None).expect("parse")
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::new()
            .validate(&OperatorConfig::default())
            .expect("valid");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_cognito_requires_pool_id() {
        let mut config = OperatorConfig::default();
        config.backend.kind = BackendKind::Cognito;

        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert!(err.to_string().contains("User pool ID"));

        config.backend.user_pool_id = Some(String::from("eu-west-1_abc"));
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_page_size_bounds() {
        let mut config = OperatorConfig::default();
        config.backend.page_size = 61;
        assert!(ConfigValidator::new().validate(&config).is_err());
        config.backend.page_size = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_bad_backoff() {
        let mut config = OperatorConfig::default();
        config.controller.backoff.multiplier = 0.5;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_valid_manifests() {
        let yaml = r"
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
spec:
  email: alice@example.com
";
        assert!(ConfigValidator::new().validate_manifests(&manifests(yaml)).is_ok());
    }

    #[test]
    fn test_invalid_manifest_fields() {
        let yaml = r"
apiVersion: v1
kind: User
metadata:
  name: alice
";
        assert!(ConfigValidator::new().validate_manifests(&manifests(yaml)).is_err());

        let yaml = r"
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
spec:
  email: not-an-email
";
        let err = ConfigValidator::new()
            .validate_manifests(&manifests(yaml))
            .expect_err("bad email");
        assert!(err.to_string().contains("not a valid email"));
    }

    #[test]
    fn test_duplicate_manifest() {
        let yaml = r"
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
---
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
  namespace: default
";
        let err = ConfigValidator::new()
            .validate_manifests(&manifests(yaml))
            .expect_err("duplicate");
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_shared_username_warns() {
        let yaml = r"
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
---
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
  namespace: team
";
        let result = ConfigValidator::new()
            .validate_manifests(&manifests(yaml))
            .expect("valid");
        assert_eq!(result.warnings.len(), 1);
    }
}
