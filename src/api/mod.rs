//! HTTP API module for the task service.
//!
//! Provides REST endpoints for managing tasks, running them and reading
//! their execution history.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::execution::Orchestrator;
use crate::storage::TaskStore;

/// Build the API router with all endpoints.
pub fn build_router<S: TaskStore + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks::<S>).post(handlers::create_task::<S>),
        )
        .route("/api/tasks/search", get(handlers::search_tasks::<S>))
        .route(
            "/api/tasks/{task_id}",
            get(handlers::get_task::<S>)
                .put(handlers::update_task::<S>)
                .delete(handlers::delete_task::<S>),
        )
        .route(
            "/api/tasks/{task_id}/execute",
            put(handlers::execute_task::<S>),
        )
        .route(
            "/api/tasks/{task_id}/executions",
            get(handlers::list_executions::<S>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from an orchestrator and its store.
pub fn create_api_state<S: TaskStore>(orchestrator: Orchestrator<S>) -> ApiState<S> {
    ApiState {
        store: Arc::clone(orchestrator.store()),
        orchestrator,
    }
}

/// Start the API server.
///
/// Spawns the server and returns a handle to its task. The server stops
/// accepting connections once `shutdown` is cancelled and the task finishes
/// after in-flight requests complete.
pub async fn start_server<S: TaskStore + 'static>(
    config: &ApiConfig,
    state: ApiState<S>,
    shutdown: CancellationToken,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let listener = TcpListener::bind(config.bind_address()).await?;
    let addr = listener.local_addr()?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled_owned().await });
        if let Err(e) = serve.await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
