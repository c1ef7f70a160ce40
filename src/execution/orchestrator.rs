//! Task execution orchestration.
//!
//! [`Orchestrator::execute`] drives one run of a stored task:
//!
//! 1. load the task and capture the start time,
//! 2. validate the command (rejections stop here, nothing is written),
//! 3. try the cluster [`Dispatcher`],
//! 4. on [`DispatchUnavailable`] only, run it with the local [`Runner`],
//! 5. append the resulting [`Execution`] to the task's history.
//!
//! The backends are tried strictly in that order and never concurrently.
//! Local failures (spawn errors, timeouts, cancellation) are recorded as
//! failed executions rather than returned as errors. The only error raised
//! after a command has run is [`ExecuteError::Recording`].

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cluster::{Dispatcher, DispatchUnavailable};
use super::local::Runner;
use crate::core::execution::{Backend, Execution, ExecutionResult, FAILURE_EXIT_CODE};
use crate::core::types::TaskId;
use crate::core::validator::{CommandValidator, Rejection};
use crate::storage::{StorageError, TaskStore};

/// Errors returned by [`Orchestrator::execute`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// No task has this id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task's command failed validation; nothing was run.
    #[error("invalid command for task {task_id}: {reason}")]
    InvalidCommand { task_id: TaskId, reason: Rejection },

    /// The task could not be loaded for a reason other than absence.
    #[error("failed to load task {task_id}: {source}")]
    Lookup {
        task_id: TaskId,
        #[source]
        source: StorageError,
    },

    /// The command ran but its execution could not be saved.
    ///
    /// The side effect may already have happened; retrying risks running
    /// the command twice.
    #[error("command ran but recording its execution for task {task_id} failed: {source}")]
    Recording {
        task_id: TaskId,
        execution: Box<Execution>,
        #[source]
        source: StorageError,
    },
}

/// Validates, dispatches or runs, and records task executions.
pub struct Orchestrator<S: TaskStore> {
    store: Arc<S>,
    validator: Arc<dyn CommandValidator>,
    dispatcher: Arc<dyn Dispatcher>,
    runner: Arc<dyn Runner>,
}

impl<S: TaskStore> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            validator: Arc::clone(&self.validator),
            dispatcher: Arc::clone(&self.dispatcher),
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<S: TaskStore> Orchestrator<S> {
    /// Create an orchestrator over a store and its collaborators.
    pub fn new(
        store: Arc<S>,
        validator: Arc<dyn CommandValidator>,
        dispatcher: Arc<dyn Dispatcher>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            store,
            validator,
            dispatcher,
            runner,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Execute a stored task and record the result.
    pub async fn execute(&self, id: &TaskId) -> Result<ExecutionResult, ExecuteError> {
        self.execute_with_cancel(id, &CancellationToken::new()).await
    }

    /// Execute a stored task, killing a local child process if `cancel` fires.
    ///
    /// A cancelled local run is still recorded, as a failed execution.
    pub async fn execute_with_cancel(
        &self,
        id: &TaskId,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecuteError> {
        let task = self.store.get(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => ExecuteError::TaskNotFound(id.clone()),
            source => ExecuteError::Lookup {
                task_id: id.clone(),
                source,
            },
        })?;

        let execution = self
            .run_command(&task.id, &task.command, cancel)
            .await
            .map_err(|reason| {
                warn!(task_id = %task.id, reason = %reason, "command rejected");
                ExecuteError::InvalidCommand {
                    task_id: task.id.clone(),
                    reason,
                }
            })?;

        if let Err(source) = self
            .store
            .append_execution(&task.id, execution.clone())
            .await
        {
            warn!(task_id = %task.id, error = %source, "failed to record execution");
            return Err(ExecuteError::Recording {
                task_id: task.id,
                execution: Box::new(execution),
                source,
            });
        }

        info!(
            task_id = %task.id,
            backend = %execution.backend,
            exit_code = execution.exit_code,
            "execution recorded"
        );
        Ok(ExecutionResult::from_execution(task.id, &execution))
    }

    /// Validate and run a command without touching the store.
    ///
    /// The start time is taken before validation and the end time as soon as
    /// a backend returns.
    pub async fn run_command(
        &self,
        task_id: &TaskId,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<Execution, Rejection> {
        let start_time = Utc::now();
        self.validator.validate(command)?;

        let (backend, output, exit_code) = match self.dispatcher.dispatch(task_id, command).await
        {
            Ok(submission) => (Backend::Cluster, submission.confirmation(command), 0),
            Err(unavailable) => {
                log_fallback(task_id, &unavailable);
                match self.runner.run(command, cancel).await {
                    Ok(completion) => (Backend::Local, completion.output, completion.exit_code),
                    Err(failure) => {
                        warn!(task_id = %task_id, error = %failure, "local execution failed");
                        (
                            Backend::Local,
                            format!("Local execution failed: {}", failure),
                            FAILURE_EXIT_CODE,
                        )
                    }
                }
            }
        };
        let end_time = Utc::now();

        Ok(Execution::new(
            start_time, end_time, output, exit_code, backend,
        ))
    }
}

fn log_fallback(task_id: &TaskId, unavailable: &DispatchUnavailable) {
    match unavailable {
        DispatchUnavailable::Disabled => {
            debug!(task_id = %task_id, "cluster dispatch disabled, running locally");
        }
        other => {
            info!(task_id = %task_id, cause = %other, "cluster unavailable, falling back to local execution");
        }
    }
}
