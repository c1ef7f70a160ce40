//! Task records and field validation.
//!
//! A [`Task`] is a named, owner-tagged shell command together with the
//! history of every time it was executed. Tasks are created from a
//! [`TaskSpec`], which carries only the user-editable fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::execution::Execution;
use super::types::TaskId;

/// Errors raised when task fields fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A required field was empty or whitespace only.
    #[error("{0} must not be blank")]
    BlankField(&'static str),
}

/// The user-editable fields of a task.
///
/// Used both for creation and for in-place updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Display name, searched case-insensitively.
    pub name: String,
    /// Who asked for the task.
    pub owner: String,
    /// Shell command to execute.
    pub command: String,
}

impl TaskSpec {
    /// Create a new task spec.
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            command: command.into(),
        }
    }

    /// Check that every field is non-blank.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.name.trim().is_empty() {
            return Err(TaskError::BlankField("name"));
        }
        if self.owner.trim().is_empty() {
            return Err(TaskError::BlankField("owner"));
        }
        if self.command.trim().is_empty() {
            return Err(TaskError::BlankField("command"));
        }
        Ok(())
    }
}

/// A stored task and its execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Requester.
    pub owner: String,
    /// Shell command.
    pub command: String,
    /// Executions in the order they happened.
    #[serde(default)]
    pub executions: Vec<Execution>,
}

impl Task {
    /// Build a task with the given id and an empty history.
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            owner: spec.owner,
            command: spec.command,
            executions: Vec::new(),
        }
    }

    /// Replace the editable fields, keeping id and history.
    pub fn apply(&mut self, spec: TaskSpec) {
        self.name = spec.name;
        self.owner = spec.owner;
        self.command = spec.command;
    }

    /// Whether the name contains `pattern`, ignoring case.
    ///
    /// A blank pattern matches every task.
    pub fn name_matches(&self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        pattern.is_empty() || self.name.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// The most recent execution, if any.
    pub fn last_execution(&self) -> Option<&Execution> {
        self.executions.last()
    }
}
