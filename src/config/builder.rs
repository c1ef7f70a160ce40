//! Service component builder from YAML configuration.
//!
//! This module converts a [`ServiceConfig`] into the validator, dispatcher
//! and runner the orchestrator is assembled from.

use std::sync::Arc;
use std::time::Duration;

use crate::core::validator::{CommandValidator, DenylistValidator};
use crate::execution::{DisabledDispatcher, Dispatcher, KubeDispatcher, LocalRunner, Runner};

use super::types::{ClusterConfig, LocalConfig, SafetyConfig, ServiceConfig};

/// Builder for the execution components described by a [`ServiceConfig`].
pub struct ServiceConfigBuilder;

impl ServiceConfigBuilder {
    /// Build the command validator.
    pub fn validator(config: &ServiceConfig) -> Arc<dyn CommandValidator> {
        Arc::new(Self::build_validator(&config.safety))
    }

    /// Build the cluster dispatcher, or a disabled one when dispatch is off.
    pub fn dispatcher(config: &ServiceConfig) -> Arc<dyn Dispatcher> {
        if config.cluster.enabled {
            Arc::new(Self::build_kube_dispatcher(&config.cluster))
        } else {
            Arc::new(DisabledDispatcher)
        }
    }

    /// Build the local runner.
    pub fn runner(config: &ServiceConfig) -> Arc<dyn Runner> {
        Arc::new(Self::build_local_runner(&config.local))
    }

    fn build_validator(safety: &SafetyConfig) -> DenylistValidator {
        DenylistValidator::new(&safety.denylist).extend(&safety.extra_denylist)
    }

    fn build_kube_dispatcher(cluster: &ClusterConfig) -> KubeDispatcher {
        let mut dispatcher = KubeDispatcher::new()
            .namespace(&cluster.namespace)
            .image(&cluster.image)
            .container_name(&cluster.container_name)
            .pod_name_prefix(&cluster.pod_name_prefix)
            .credentials(cluster.credentials.clone())
            .submit_timeout(Duration::from_secs(cluster.submit_timeout_secs));

        if let Some(path) = &cluster.kubeconfig {
            dispatcher = dispatcher.kubeconfig(path);
        }

        dispatcher
    }

    fn build_local_runner(local: &LocalConfig) -> LocalRunner {
        let mut runner = LocalRunner::new();

        if let Some(shell) = &local.shell {
            runner = runner.with_shell(shell.iter().cloned());
        }

        if let Some(secs) = local.timeout_secs {
            runner = runner.with_timeout(Duration::from_secs(secs));
        }

        runner
    }
}
