//! YAML configuration parsing.
//!
//! Parses and validates the service configuration file.

use std::path::Path;

use super::error::ConfigError;
use super::types::{ServiceConfig, StorageConfig};

/// Longest pod name Kubernetes accepts.
const MAX_POD_NAME_LEN: usize = 253;

/// Characters appended to the prefix by the dispatcher (`-<millis>-<8 hex>`).
const POD_NAME_SUFFIX_LEN: usize = 1 + 13 + 1 + 8;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate service configuration from a file.
    pub fn load_service_config(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let config: ServiceConfig = if content.trim().is_empty() {
            ServiceConfig::default()
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?
        };
        Self::validate_service_config(&config)?;
        Ok(config)
    }

    /// Parse and validate service configuration from a YAML string.
    pub fn parse_service_config(yaml: &str) -> Result<ServiceConfig, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: ServiceConfig = if yaml.trim().is_empty() {
            ServiceConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::validate_service_config(&config)?;
        Ok(config)
    }

    /// Validate a service configuration.
    pub fn validate_service_config(config: &ServiceConfig) -> Result<(), ConfigError> {
        if config.api.host.trim().is_empty() {
            return Err(ConfigError::MissingField("api.host".into()));
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }

        let cluster = &config.cluster;
        if cluster.enabled {
            if cluster.namespace.trim().is_empty() {
                return Err(ConfigError::MissingField("cluster.namespace".into()));
            }
            if cluster.image.trim().is_empty() {
                return Err(ConfigError::MissingField("cluster.image".into()));
            }
            if cluster.container_name.trim().is_empty() {
                return Err(ConfigError::MissingField("cluster.container_name".into()));
            }
            if !is_dns_label_prefix(&cluster.pod_name_prefix) {
                return Err(ConfigError::InvalidConfig(format!(
                    "cluster.pod_name_prefix '{}' must be lowercase alphanumerics or '-', \
                     start with an alphanumeric and leave room for the generated suffix",
                    cluster.pod_name_prefix
                )));
            }
            if cluster.credentials.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "cluster.credentials must list at least one source".into(),
                ));
            }
            if cluster.submit_timeout_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "cluster.submit_timeout_secs cannot be zero".into(),
                ));
            }
        }

        if let Some(shell) = &config.local.shell
            && shell.first().is_none_or(|program| program.trim().is_empty())
        {
            return Err(ConfigError::InvalidConfig(
                "local.shell must name a program".into(),
            ));
        }

        if config.local.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "local.timeout_secs cannot be zero".into(),
            ));
        }

        Ok(())
    }
}

fn is_dns_label_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() + POD_NAME_SUFFIX_LEN <= MAX_POD_NAME_LEN
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
}
