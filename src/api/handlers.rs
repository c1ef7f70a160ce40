//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::execution::{Execution, ExecutionResult};
use crate::core::task::{Task, TaskSpec};
use crate::core::types::TaskId;
use crate::execution::Orchestrator;
use crate::storage::TaskStore;

use super::errors::ApiError;
use super::responses::HealthResponse;

/// Shared application state for API handlers.
pub struct ApiState<S: TaskStore> {
    pub store: Arc<S>,
    pub orchestrator: Orchestrator<S>,
}

impl<S: TaskStore> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

/// Query parameters for the list endpoint.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub id: Option<String>,
}

/// Query parameters for the search endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub name: Option<String>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// List all tasks, or just the one named by `?id=`.
pub async fn list_tasks<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    match query.id {
        Some(id) => {
            let task = state.store.get(&TaskId::new(id)).await?;
            Ok(Json(vec![task]))
        }
        None => Ok(Json(state.store.list().await?)),
    }
}

/// Create a task.
pub async fn create_task<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    body: Result<Json<TaskSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(spec) = body?;
    spec.validate()?;
    let task = state.store.create(spec).await?;
    tracing::info!(task_id = %task.id, name = %task.name, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

/// Find tasks whose name contains `?name=`, ignoring case.
pub async fn search_tasks<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.store.search(query.name.as_deref()).await?;
    Ok(Json(tasks))
}

/// Get a task.
pub async fn get_task<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.store.get(&TaskId::new(id)).await?;
    Ok(Json(task))
}

/// Replace a task's name, owner and command. History is kept.
pub async fn update_task<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
    body: Result<Json<TaskSpec>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(spec) = body?;
    spec.validate()?;
    let task = state.store.update(&TaskId::new(id), spec).await?;
    Ok(Json(task))
}

/// Delete a task and its history.
pub async fn delete_task<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = TaskId::new(id);
    state.store.delete(&id).await?;
    tracing::info!(task_id = %id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Run a task's command and record the execution.
pub async fn execute_task<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let result = state.orchestrator.execute(&TaskId::new(id)).await?;
    Ok(Json(result))
}

/// A task's execution history, oldest first.
pub async fn list_executions<S: TaskStore + 'static>(
    State(state): State<ApiState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let task = state.store.get(&TaskId::new(id)).await?;
    Ok(Json(task.executions))
}
