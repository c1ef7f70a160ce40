//! Execution records and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::TaskId;

/// Exit code that marks a successful run.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Exit code recorded when a command could not be run to completion.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Which execution path produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Submitted as a pod to the cluster. Success only confirms submission.
    Cluster,
    /// Run as a child process on this host. Success is the real exit status.
    Local,
}

impl Backend {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cluster => "cluster",
            Backend::Local => "local",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Backend::Cluster),
            "local" => Ok(Backend::Local),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// One immutable run attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Merged stdout/stderr, or a placeholder.
    pub output: String,
    pub exit_code: i32,
    pub backend: Backend,
}

impl Execution {
    /// Build a record. An `end_time` earlier than `start_time` is clamped.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        output: impl Into<String>,
        exit_code: i32,
        backend: Backend,
    ) -> Self {
        Self {
            start_time,
            end_time: end_time.max(start_time),
            output: output.into(),
            exit_code,
            backend,
        }
    }

    /// Whether the run reported success.
    pub fn succeeded(&self) -> bool {
        self.exit_code == SUCCESS_EXIT_CODE
    }
}

/// Overall outcome reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    /// `Success` iff `exit_code` is the success sentinel.
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == SUCCESS_EXIT_CODE {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        }
    }
}

/// What `execute` hands back once the execution has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub output: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub backend: Backend,
}

impl ExecutionResult {
    /// Summarize a recorded execution.
    pub fn from_execution(task_id: TaskId, execution: &Execution) -> Self {
        Self {
            task_id,
            status: ExecutionStatus::from_exit_code(execution.exit_code),
            exit_code: execution.exit_code,
            output: execution.output.clone(),
            start_time: execution.start_time,
            end_time: execution.end_time,
            backend: execution.backend,
        }
    }
}
