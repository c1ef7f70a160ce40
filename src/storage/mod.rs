//! Storage abstraction for tasks and their execution history.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::execution::Execution;
use crate::core::task::{Task, TaskSpec};
use crate::core::types::TaskId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A saved snapshot disagrees with the history already stored.
    #[error("execution history of task {0} does not extend the stored history")]
    HistoryConflict(TaskId),

    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Durable mapping from task id to task record.
///
/// `append_execution` is the only way the orchestrator writes history. It
/// must be atomic per task so that concurrent executions of the same task
/// never lose each other's records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task under a freshly generated id.
    async fn create(&self, spec: TaskSpec) -> Result<Task, StorageError>;

    /// Get a task by id.
    async fn get(&self, id: &TaskId) -> Result<Task, StorageError>;

    /// List all tasks in creation order.
    async fn list(&self) -> Result<Vec<Task>, StorageError>;

    /// Tasks whose name contains `pattern`, ignoring case.
    ///
    /// A missing or blank pattern returns every task.
    async fn search(&self, pattern: Option<&str>) -> Result<Vec<Task>, StorageError>;

    /// Insert a task keyed by its id, or overwrite the editable fields of an
    /// existing one.
    ///
    /// History is append-only: executions in `task` beyond the stored count
    /// are appended, and a snapshot that lacks records appended since it was
    /// read keeps them. A snapshot whose history differs from the stored one
    /// on their common prefix fails with [`StorageError::HistoryConflict`].
    async fn save(&self, task: Task) -> Result<Task, StorageError>;

    /// Replace the editable fields of an existing task, keeping its history.
    async fn update(&self, id: &TaskId, spec: TaskSpec) -> Result<Task, StorageError>;

    /// Append one execution to the end of a task's history.
    async fn append_execution(
        &self,
        id: &TaskId,
        execution: Execution,
    ) -> Result<(), StorageError>;

    /// Delete a task and its history.
    async fn delete(&self, id: &TaskId) -> Result<(), StorageError>;

    /// Whether a task with this id exists.
    async fn exists(&self, id: &TaskId) -> Result<bool, StorageError>;
}

/// The executions in `snapshot` that come after everything in `stored`.
///
/// Both histories must agree on their common prefix.
pub(crate) fn unsaved_executions<'a>(
    id: &TaskId,
    stored: &[Execution],
    snapshot: &'a [Execution],
) -> Result<&'a [Execution], StorageError> {
    if stored.iter().zip(snapshot).any(|(old, new)| old != new) {
        return Err(StorageError::HistoryConflict(id.clone()));
    }
    Ok(snapshot.get(stored.len()..).unwrap_or_default())
}
