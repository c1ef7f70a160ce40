//! Configuration type definitions.
//!
//! Every section is optional in YAML and falls back to its `Default`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::validator::DEFAULT_DENYLIST;
use crate::execution::{CredentialSource, default_credential_order};

/// Service configuration (taskd.yaml).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener.
    pub api: ApiConfig,
    /// Task persistence.
    pub storage: StorageConfig,
    /// Kubernetes pod dispatch.
    pub cluster: ClusterConfig,
    /// Local process fallback.
    pub local: LocalConfig,
    /// Command screening.
    pub safety: SafetyConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl ApiConfig {
    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Kubernetes dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// When false every command runs locally.
    pub enabled: bool,
    pub namespace: String,
    pub image: String,
    pub container_name: String,
    pub pod_name_prefix: String,
    /// Credential sources, tried in order.
    pub credentials: Vec<CredentialSource>,
    /// Explicit kubeconfig path; otherwise `KUBECONFIG` or `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    pub submit_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "default".to_string(),
            image: "busybox".to_string(),
            container_name: "executor".to_string(),
            pod_name_prefix: "task-executor".to_string(),
            credentials: default_credential_order(),
            kubeconfig: None,
            submit_timeout_secs: 10,
        }
    }
}

/// Local runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Interpreter prefix, e.g. `["bash", "-lc"]`. Host default when unset.
    pub shell: Option<Vec<String>>,
    /// Kill local commands after this many seconds.
    pub timeout_secs: Option<u64>,
}

/// Command screening configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Replaces the built-in token list when set.
    pub denylist: Vec<String>,
    /// Added on top of `denylist`.
    pub extra_denylist: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            extra_denylist: Vec::new(),
        }
    }
}
