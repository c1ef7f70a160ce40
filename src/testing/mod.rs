//! Testing utilities for users of the taskd library.
//!
//! This module provides doubles for the execution backends and the store:
//!
//! - [`ScriptedDispatcher`]: a cluster dispatcher that always submits or is always unavailable
//! - [`ScriptedRunner`]: a local runner that returns a fixed completion or failure
//! - [`FailingAppendStore`]: an in-memory store whose history appends fail
//!
//! Each double counts its calls so tests can assert which backends ran.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::core::execution::Execution;
use crate::core::task::{Task, TaskSpec};
use crate::core::types::TaskId;
use crate::core::validator::DenylistValidator;
use crate::execution::{
    Completion, DispatchUnavailable, Dispatcher, LocalFailure, Orchestrator, Runner, Submission,
};
use crate::storage::{InMemoryStore, StorageError, TaskStore};

/// A dispatcher with a fixed answer.
///
/// # Example
///
/// ```
/// use taskd::testing::ScriptedDispatcher;
///
/// let dispatcher = ScriptedDispatcher::unavailable();
/// assert_eq!(dispatcher.calls(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedDispatcher {
    namespace: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDispatcher {
    /// Accept every submission into the `default` namespace.
    pub fn submitting() -> Self {
        Self {
            namespace: Some("default".to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reject every submission with [`DispatchUnavailable::NoCredentials`].
    pub fn unavailable() -> Self {
        Self {
            namespace: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `dispatch` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        task_id: &TaskId,
        _command: &str,
    ) -> Result<Submission, DispatchUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.namespace {
            Some(namespace) => Ok(Submission {
                pod_name: format!("scripted-{}", task_id),
                namespace: namespace.clone(),
            }),
            None => Err(DispatchUnavailable::NoCredentials(
                "scripted dispatcher".to_string(),
            )),
        }
    }
}

/// A runner with a fixed answer.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    completion: Option<Completion>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    /// Complete every run with this output and exit code.
    pub fn completing(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            completion: Some(Completion {
                output: output.into(),
                exit_code,
            }),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every run as if the shell could not be spawned.
    pub fn failing() -> Self {
        Self {
            completion: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `run` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(
        &self,
        _command: &str,
        _cancel: &CancellationToken,
    ) -> Result<Completion, LocalFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.completion {
            Some(completion) => Ok(completion.clone()),
            None => Err(LocalFailure::Spawn {
                program: "scripted".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            }),
        }
    }
}

/// An in-memory store that refuses to append history.
///
/// Everything except `append_execution` delegates to [`InMemoryStore`].
#[derive(Default)]
pub struct FailingAppendStore {
    inner: InMemoryStore,
}

impl FailingAppendStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for FailingAppendStore {
    async fn create(&self, spec: TaskSpec) -> Result<Task, StorageError> {
        self.inner.create(spec).await
    }

    async fn get(&self, id: &TaskId) -> Result<Task, StorageError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Task>, StorageError> {
        self.inner.list().await
    }

    async fn search(&self, pattern: Option<&str>) -> Result<Vec<Task>, StorageError> {
        self.inner.search(pattern).await
    }

    async fn save(&self, task: Task) -> Result<Task, StorageError> {
        self.inner.save(task).await
    }

    async fn update(&self, id: &TaskId, spec: TaskSpec) -> Result<Task, StorageError> {
        self.inner.update(id, spec).await
    }

    async fn append_execution(
        &self,
        _id: &TaskId,
        _execution: Execution,
    ) -> Result<(), StorageError> {
        Err(StorageError::Other("append rejected".to_string()))
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StorageError> {
        self.inner.delete(id).await
    }

    async fn exists(&self, id: &TaskId) -> Result<bool, StorageError> {
        self.inner.exists(id).await
    }
}

/// An orchestrator over `store` with the default denylist and scripted backends.
pub fn scripted_orchestrator<S: TaskStore>(
    store: Arc<S>,
    dispatcher: ScriptedDispatcher,
    runner: ScriptedRunner,
) -> Orchestrator<S> {
    Orchestrator::new(
        store,
        Arc::new(DenylistValidator::default()),
        Arc::new(dispatcher),
        Arc::new(runner),
    )
}
