//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{StorageError, TaskStore, unsaved_executions};
use crate::core::execution::Execution;
use crate::core::task::{Task, TaskSpec};
use crate::core::types::TaskId;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    // Creation order, so listings are stable.
    order: Vec<TaskId>,
}

impl Inner {
    fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, spec: TaskSpec) -> Result<Task, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = Task::new(TaskId::generate(), spec);
        inner.order.push(task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> Result<Task, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    async fn list(&self) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.ordered().cloned().collect())
    }

    async fn search(&self, pattern: Option<&str>) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        let pattern = pattern.unwrap_or_default();
        Ok(inner
            .ordered()
            .filter(|t| t.name_matches(pattern))
            .cloned()
            .collect())
    }

    async fn save(&self, task: Task) -> Result<Task, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(stored) = inner.tasks.get_mut(&task.id) else {
            inner.order.push(task.id.clone());
            inner.tasks.insert(task.id.clone(), task.clone());
            return Ok(task);
        };

        let tail = unsaved_executions(&task.id, &stored.executions, &task.executions)?;
        stored.executions.extend_from_slice(tail);
        stored.name = task.name;
        stored.owner = task.owner;
        stored.command = task.command;
        Ok(stored.clone())
    }

    async fn update(&self, id: &TaskId, spec: TaskSpec) -> Result<Task, StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        task.apply(spec);
        Ok(task.clone())
    }

    async fn append_execution(
        &self,
        id: &TaskId,
        execution: Execution,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        task.executions.push(execution);
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .tasks
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        inner.order.retain(|existing| existing != id);
        Ok(())
    }

    async fn exists(&self, id: &TaskId) -> Result<bool, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.tasks.contains_key(id))
    }
}
