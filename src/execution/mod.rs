//! Task execution engine.
//!
//! This module provides the two execution backends (cluster dispatch and
//! local processes) and the orchestrator that chooses between them.

mod cluster;
mod local;
mod orchestrator;

pub use cluster::{
    CredentialSource, DisabledDispatcher, DispatchUnavailable, Dispatcher, KubeDispatcher,
    MANAGED_BY_LABEL, Submission, TASK_ID_ANNOTATION, default_credential_order,
};
pub use local::{
    Completion, EMPTY_OUTPUT_PLACEHOLDER, LocalFailure, LocalRunner, Runner, default_shell,
    normalize_output,
};
pub use orchestrator::{ExecuteError, Orchestrator};
