//! taskd - stores owner-tagged shell commands and runs them on demand.
//!
//! A run is handed to a Kubernetes cluster as a one-off pod when a cluster
//! is reachable, and falls back to a local child process otherwise. Every
//! run is appended to the task's execution history.

pub mod api;
pub mod config;
pub mod core;
pub mod execution;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, ServiceConfig, ServiceConfigBuilder, StorageConfig, YamlLoader};
pub use core::execution::{
    Backend, Execution, ExecutionResult, ExecutionStatus, FAILURE_EXIT_CODE, SUCCESS_EXIT_CODE,
};
pub use core::task::{Task, TaskError, TaskSpec};
pub use core::types::TaskId;
pub use core::validator::{CommandValidator, DEFAULT_DENYLIST, DenylistValidator, Rejection};
pub use execution::{
    CredentialSource, DisabledDispatcher, DispatchUnavailable, Dispatcher, ExecuteError,
    KubeDispatcher, LocalFailure, LocalRunner, Orchestrator, Runner, Submission,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{InMemoryStore, StorageError, TaskStore};
