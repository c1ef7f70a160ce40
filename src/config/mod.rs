//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the service: listener,
//! storage backend, cluster dispatch, local runner and command screening.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::ServiceConfigBuilder;
pub use error::ConfigError;
pub use types::{ApiConfig, ClusterConfig, LocalConfig, SafetyConfig, ServiceConfig, StorageConfig};
pub use yaml::YamlLoader;
