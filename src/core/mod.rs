//! Core domain types: identifiers, tasks, executions and command validation.

pub mod execution;
pub mod task;
pub mod types;
pub mod validator;
