//! Configuration parser for loading configuration and manifests.
//!
//! This module handles loading the operator configuration from YAML and
//! environment variables, with proper precedence, and loading `User`
//! manifests for `apply`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, OperatorError, Result};

use super::spec::{BackendKind, OperatorConfig, UserManifest};

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "USERPOOL";

/// Configuration parser for the operator.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<OperatorConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<OperatorConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(OperatorConfig::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            OperatorError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Without a path, the defaults are used as the base. Variables have the
    /// form `USERPOOL_<SECTION>_<KEY>` (e.g. `USERPOOL_BACKEND_USER_POOL_ID`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an unparseable value.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<OperatorConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => OperatorConfig::default(),
        };

        Self::apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    fn apply_overrides(
        config: &mut OperatorConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}_{suffix}");
            lookup(&name).map(|value| {
                debug!("Overriding from environment: {name}");
                (name, value)
            })
        };

        if let Some((name, kind)) = var("BACKEND_KIND") {
            config.backend.kind = match kind.to_lowercase().as_str() {
                "memory" => BackendKind::Memory,
                "cognito" => BackendKind::Cognito,
                _ => return Err(invalid_env(&name, &kind)),
            };
        }
        if let Some((_, pool)) = var("BACKEND_USER_POOL_ID") {
            config.backend.user_pool_id = Some(pool);
        }
        if let Some((_, region)) = var("BACKEND_REGION") {
            config.backend.region = Some(region);
        }
        if let Some((name, size)) = var("BACKEND_PAGE_SIZE") {
            config.backend.page_size = size.parse().map_err(|_| invalid_env(&name, &size))?;
        }
        if let Some((name, secs)) = var("BACKEND_CALL_TIMEOUT_SECS") {
            config.backend.call_timeout_secs =
                secs.parse().map_err(|_| invalid_env(&name, &secs))?;
        }
        if let Some((_, path)) = var("STORE_PATH") {
            config.store.path = Some(path);
        }
        if let Some((name, secs)) = var("CONTROLLER_RESYNC_INTERVAL_SECS") {
            config.controller.resync_interval_secs =
                secs.parse().map_err(|_| invalid_env(&name, &secs))?;
        }
        if let Some((name, n)) = var("CONTROLLER_MAX_CONCURRENCY") {
            config.controller.max_concurrency = n.parse().map_err(|_| invalid_env(&name, &n))?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OperatorError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads every `User` document from a multi-document YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a document is invalid.
    pub fn load_manifests(&self, path: impl AsRef<Path>) -> Result<Vec<UserManifest>> {
        let path = path.as_ref();
        info!("Loading manifests from: {}", path.display());

        let content = read_file(path)?;
        self.parse_manifests(&content, Some(path))
    }

    /// Parses `User` documents from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if a document is invalid.
    pub fn parse_manifests(&self, content: &str, source: Option<&Path>) -> Result<Vec<UserManifest>> {
        let mut manifests = Vec::new();

        for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let value = serde_yaml::Value::deserialize(document).map_err(|e| {
                manifest_error(format!("document {index}: {e}"), source)
            })?;
            if value.is_null() {
                continue;
            }

            let manifest: UserManifest = serde_yaml::from_value(value).map_err(|e| {
                manifest_error(format!("document {index}: {e}"), source)
            })?;
            manifests.push(manifest);
        }

        debug!("Parsed {} manifests", manifests.len());
        Ok(manifests)
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["userpool.yaml", "userpool.yml"];

/// Finds the configuration file in the given directory or its parents.
///
/// Returns `None` when there is none; the operator then runs on defaults.
#[must_use]
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(OperatorError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        OperatorError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

fn invalid_env(name: &str, value: &str) -> OperatorError {
    OperatorError::Config(ConfigError::ParseError {
        message: format!("invalid value '{value}'"),
        location: Some(name.to_string()),
    })
}

fn manifest_error(message: String, source: Option<&Path>) -> OperatorError {
    OperatorError::Config(ConfigError::ParseError {
        message: format!("Invalid manifest: {message}"),
        location: source.map(|p| p.display().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = ConfigParser::new().parse_yaml("", None).expect("parse");
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.backend.page_size, 60);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
backend:
  kind: cognito
  user_pool_id: eu-west-1_AbCdEf
  region: eu-west-1
  page_size: 25
  call_timeout_secs: 10
store:
  path: /var/lib/userpool/users.json
controller:
  resync_interval_secs: 30
  max_concurrency: 8
  backoff:
    initial_ms: 200
    max_secs: 60
    multiplier: 1.5
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.backend.kind, BackendKind::Cognito);
        assert_eq!(config.backend.user_pool_id.as_deref(), Some("eu-west-1_AbCdEf"));
        assert_eq!(config.backend.page_size, 25);
        assert_eq!(config.controller.max_concurrency, 8);
        assert!((config.controller.backoff.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = ConfigParser::new().parse_yaml("backend:\n  kind: ldap\n", None);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("USERPOOL_BACKEND_KIND", "Cognito"),
            ("USERPOOL_BACKEND_USER_POOL_ID", "pool-1"),
            ("USERPOOL_CONTROLLER_MAX_CONCURRENCY", "2"),
        ]);
        let mut config = OperatorConfig::default();
        ConfigParser::apply_overrides(&mut config, |name| vars.get(name).map(ToString::to_string))
            .expect("overrides");

        assert_eq!(config.backend.kind, BackendKind::Cognito);
        assert_eq!(config.backend.user_pool_id.as_deref(), Some("pool-1"));
        assert_eq!(config.controller.max_concurrency, 2);
    }

    #[test]
    fn test_env_override_bad_number() {
        let mut config = OperatorConfig::default();
        let result = ConfigParser::apply_overrides(&mut config, |name| {
            (name == "USERPOOL_BACKEND_PAGE_SIZE").then(|| String::from("lots"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_manifests() {
        let yaml = r"
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: alice
spec:
  email: alice@example.com
---
apiVersion: userpool.dev/v1alpha1
kind: User
metadata:
  name: bob
  namespace: team
spec:
  email: bob@example.com
  enabled: false
---
";
        let manifests = ConfigParser::new().parse_manifests(yaml, None).expect("parse");
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].key().to_string(), "default/alice");
        assert!(manifests[0].spec.enabled());
        assert_eq!(manifests[1].key().to_string(), "team/bob");
        assert!(!manifests[1].spec.enabled());
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().expect("temp dir");
        let result = ConfigParser::new().load_file(temp.path().join("missing.yaml"));
        assert!(matches!(
            result,
            Err(OperatorError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = TempDir::new().expect("temp dir");
        std::fs::write(temp.path().join("userpool.yaml"), "").expect("write");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("userpool.yaml"));
    }
}
