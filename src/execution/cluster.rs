//! Cluster dispatch backend.
//!
//! [`KubeDispatcher`] submits a command as a single-container pod and returns
//! as soon as the API server accepts the create request. It never waits for
//! the pod to be scheduled, run or finish: a [`Submission`] only confirms that
//! the pod object exists.
//!
//! Credentials are resolved by walking an ordered list of
//! [`CredentialSource`]s and taking the first that yields a configuration.
//! Failing to find credentials is a dispatch failure like any other and is
//! reported as [`DispatchUnavailable`].

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::types::TaskId;

/// Label put on every pod this crate creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation carrying the id of the task that created the pod.
pub const TASK_ID_ANNOTATION: &str = "taskd.io/task-id";

/// Where cluster credentials can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// The service account mounted into a pod.
    InCluster,
    /// A kubeconfig file: the configured path, else `$KUBECONFIG` or
    /// `~/.kube/config`.
    Kubeconfig,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::InCluster => f.write_str("in-cluster"),
            CredentialSource::Kubeconfig => f.write_str("kubeconfig"),
        }
    }
}

/// Default resolution order: in-cluster first, then kubeconfig.
pub fn default_credential_order() -> Vec<CredentialSource> {
    vec![CredentialSource::InCluster, CredentialSource::Kubeconfig]
}

/// A pod the cluster accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub pod_name: String,
    pub namespace: String,
}

impl Submission {
    /// Text recorded as the execution output.
    pub fn confirmation(&self, command: &str) -> String {
        format!(
            "Pod '{}' created in namespace '{}' to execute: {}",
            self.pod_name, self.namespace, command
        )
    }
}

/// Why a command could not be handed to the cluster.
///
/// Always recoverable: the orchestrator falls back to local execution.
#[derive(Debug, Error)]
pub enum DispatchUnavailable {
    /// Cluster dispatch is turned off.
    #[error("cluster dispatch is disabled")]
    Disabled,

    /// None of the credential sources produced a configuration.
    #[error("no usable cluster credentials ({0})")]
    NoCredentials(String),

    /// A configuration was found but no client could be built from it.
    #[error("failed to build cluster client: {0}")]
    Client(String),

    /// The API server rejected or failed the create request.
    #[error("pod submission failed: {0}")]
    Submission(String),

    /// The create request did not complete in time.
    #[error("pod submission timed out after {0:?}")]
    Timeout(Duration),
}

/// Something that can hand a command off to run elsewhere.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Submit `command` on behalf of `task_id`.
    async fn dispatch(
        &self,
        task_id: &TaskId,
        command: &str,
    ) -> Result<Submission, DispatchUnavailable>;
}

/// A dispatcher that is always unavailable, so every run goes local.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDispatcher;

#[async_trait]
impl Dispatcher for DisabledDispatcher {
    async fn dispatch(
        &self,
        _task_id: &TaskId,
        _command: &str,
    ) -> Result<Submission, DispatchUnavailable> {
        Err(DispatchUnavailable::Disabled)
    }
}

/// Creates pods through the Kubernetes API.
#[derive(Debug, Clone)]
pub struct KubeDispatcher {
    namespace: String,
    image: String,
    container_name: String,
    pod_name_prefix: String,
    credentials: Vec<CredentialSource>,
    kubeconfig: Option<PathBuf>,
    submit_timeout: Duration,
}

impl KubeDispatcher {
    /// Create a dispatcher with the stock settings: namespace `default`,
    /// image `busybox`, in-cluster then kubeconfig credentials.
    pub fn new() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "busybox".to_string(),
            container_name: "executor".to_string(),
            pod_name_prefix: "task-executor".to_string(),
            credentials: default_credential_order(),
            kubeconfig: None,
            submit_timeout: Duration::from_secs(10),
        }
    }

    /// Set the namespace pods are created in.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the container name.
    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Set the prefix of generated pod names.
    pub fn pod_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pod_name_prefix = prefix.into();
        self
    }

    /// Set the credential resolution order.
    pub fn credentials(mut self, order: Vec<CredentialSource>) -> Self {
        self.credentials = order;
        self
    }

    /// Read kubeconfig from this path instead of the default locations.
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Bound the time spent connecting and submitting.
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Generate a unique pod name: prefix, millisecond timestamp, random suffix.
    pub fn generate_pod_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.pod_name_prefix,
            Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }

    /// Build the pod object for a command.
    pub fn build_pod(&self, pod_name: &str, task_id: &TaskId, command: &str) -> Pod {
        let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), "taskd".to_string())]);
        let annotations =
            BTreeMap::from([(TASK_ID_ANNOTATION.to_string(), task_id.to_string())]);

        Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: self.container_name.clone(),
                    image: Some(self.image.clone()),
                    command: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Try each credential source in order, stopping at the first success.
    async fn resolve_config(&self) -> Result<Config, DispatchUnavailable> {
        let mut failures = Vec::new();
        for source in &self.credentials {
            match self.load_config(*source).await {
                Ok(config) => {
                    debug!(source = %source, "resolved cluster credentials");
                    return Ok(config);
                }
                Err(reason) => {
                    debug!(source = %source, reason = %reason, "credential source unusable");
                    failures.push(format!("{}: {}", source, reason));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no credential sources configured".to_string());
        }
        Err(DispatchUnavailable::NoCredentials(failures.join("; ")))
    }

    async fn load_config(&self, source: CredentialSource) -> Result<Config, String> {
        match source {
            CredentialSource::InCluster => Config::incluster().map_err(|e| e.to_string()),
            CredentialSource::Kubeconfig => {
                let options = KubeConfigOptions::default();
                match &self.kubeconfig {
                    Some(path) => {
                        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| e.to_string())?;
                        Config::from_custom_kubeconfig(kubeconfig, &options)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    None => Config::from_kubeconfig(&options)
                        .await
                        .map_err(|e| e.to_string()),
                }
            }
        }
    }

    async fn client(&self) -> Result<Client, DispatchUnavailable> {
        let mut config = self.resolve_config().await?;
        config.connect_timeout = Some(self.submit_timeout);
        config.read_timeout = Some(self.submit_timeout);
        Client::try_from(config).map_err(|e| DispatchUnavailable::Client(e.to_string()))
    }
}

impl Default for KubeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for KubeDispatcher {
    async fn dispatch(
        &self,
        task_id: &TaskId,
        command: &str,
    ) -> Result<Submission, DispatchUnavailable> {
        let client = self.client().await?;
        let pods: Api<Pod> = Api::namespaced(client, &self.namespace);

        let pod_name = self.generate_pod_name();
        let pod = self.build_pod(&pod_name, task_id, command);

        // Not cancellable once sent; the pod keeps running detached.
        match tokio::time::timeout(self.submit_timeout, pods.create(&PostParams::default(), &pod))
            .await
        {
            Ok(Ok(_)) => {
                info!(task_id = %task_id, pod = %pod_name, namespace = %self.namespace, "pod submitted");
                Ok(Submission {
                    pod_name,
                    namespace: self.namespace.clone(),
                })
            }
            Ok(Err(e)) => Err(DispatchUnavailable::Submission(e.to_string())),
            Err(_) => Err(DispatchUnavailable::Timeout(self.submit_timeout)),
        }
    }
}
