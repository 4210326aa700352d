//! Configuration loading
//!
//! ```yaml
//! backend: planner
//! cache:
//!   enabled: true
//!   directory: .cache/workflows
//!   ttl_seconds: 3600
//! planner:
//!   parallel_execution: true
//! command:
//!   program: my-agent
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ConclaveError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "conclave.yaml";
pub const ENV_CONFIG_PATH: &str = "CONCLAVE_CONFIG_PATH";
pub const ENV_BACKEND: &str = "CONCLAVE_BACKEND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from(".cache/workflows"),
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend identifier; the factory falls back to the environment when unset
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Optional YAML catalog replacing the built-in organisation
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Backend-namespaced sections, keyed by backend identifier
    #[serde(flatten)]
    pub backends: BTreeMap<String, Value>,
}

impl Config {
    /// Load from `path`, else `$CONCLAVE_CONFIG_PATH`, else `conclave.yaml`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(ENV_CONFIG_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The config section for one backend, `Null` when absent
    pub fn backend_section(&self, backend: &str) -> Value {
        self.backends.get(backend).cloned().unwrap_or(Value::Null)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(backend) = &self.backend {
            if backend.trim().is_empty() {
                errors.push("'backend' must not be empty".to_string());
            }
        }

        if self.cache.enabled && self.cache.directory.as_os_str().is_empty() {
            errors.push("'cache.directory' must be set when caching is enabled".to_string());
        }

        for (name, section) in &self.backends {
            if !(section.is_object() || section.is_null()) {
                errors.push(format!("section '{}' must be a mapping", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConclaveError::Configuration(format!(
                "invalid configuration:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert!(config.backend.is_none());
        assert_eq!(config.cache, CacheConfig::default());
        assert!(config.backend_section("planner").is_null());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
backend: command
cache:
  enabled: false
  directory: /tmp/wf
  ttl_seconds: 60
command:
  program: cat
  max_parallel_tasks: 2
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.backend.as_deref(), Some("command"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.backend_section("command")["program"], "cat");
    }

    #[test]
    fn test_partial_cache_section() {
        let config = Config::from_yaml_str("cache:\n  ttl_seconds: 5\n").unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, 5);
    }

    #[test]
    fn test_negative_ttl_rejected() {
        let err = Config::from_yaml_str("cache:\n  ttl_seconds: -1\n").unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(_)));
    }

    #[test]
    fn test_scalar_backend_section_rejected() {
        let err = Config::from_yaml_str("planner: fast\n").unwrap_err();
        assert!(err.to_string().contains("section 'planner' must be a mapping"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.yaml");
        std::fs::write(&path, "backend: planner\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backend.as_deref(), Some("planner"));
    }
}
