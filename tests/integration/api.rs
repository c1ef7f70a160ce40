//! API integration tests.
//!
//! These tests drive the router in-process with scripted backends.

use taskd::api::{ApiState, build_router, create_api_state};
use taskd::storage::InMemoryStore;
use taskd::testing::{
    FailingAppendStore, ScriptedDispatcher, ScriptedRunner, scripted_orchestrator,
};

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::common::{send, send_raw};

fn create_test_state(
    dispatcher: ScriptedDispatcher,
    runner: ScriptedRunner,
) -> ApiState<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    create_api_state(scripted_orchestrator(store, dispatcher, runner))
}

fn default_router() -> axum::Router {
    build_router(create_test_state(
        ScriptedDispatcher::unavailable(),
        ScriptedRunner::completing("hello", 0),
    ))
}

async fn create_task(router: &axum::Router, name: &str, command: &str) -> Value {
    let (status, json) = send(
        router,
        Method::POST,
        "/api/tasks",
        Some(json!({ "name": name, "owner": "ops", "command": command })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let router = default_router();

    let (status, json) = send(&router, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Created tasks get an id and an empty history.
#[tokio::test]
async fn test_create_task() {
    let router = default_router();

    let task = create_task(&router, "Backup", "echo backup").await;

    assert!(task["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(task["name"], "Backup");
    assert_eq!(task["owner"], "ops");
    assert_eq!(task["command"], "echo backup");
    assert_eq!(task["executions"], json!([]));
}

/// Test: Blank fields are rejected with 400.
#[tokio::test]
async fn test_create_task_with_blank_field() {
    let router = default_router();

    let (status, json) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({ "name": "x", "owner": "  ", "command": "echo" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("owner"));

    let (_, all) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(all, json!([]));
}

/// Test: A body missing a field is a JSON 400, not a bare 422.
#[tokio::test]
async fn test_create_task_with_missing_field() {
    let router = default_router();

    let (status, json) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({ "name": "x", "owner": "ops" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["error"].as_str().unwrap().contains("command"));

    let (_, all) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(all, json!([]));
}

/// Test: Malformed JSON and non-JSON bodies get the same error shape.
#[tokio::test]
async fn test_create_task_with_unreadable_body() {
    let router = default_router();

    let (status, json) = send_raw(
        &router,
        Method::POST,
        "/api/tasks",
        "application/json",
        "{\"name\": ",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let (status, json) = send_raw(
        &router,
        Method::POST,
        "/api/tasks",
        "text/plain",
        "name=x&owner=ops&command=date",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Test: Update rejects a mistyped body with a JSON 400.
#[tokio::test]
async fn test_update_task_with_wrong_field_type() {
    let router = default_router();
    let task = create_task(&router, "typed", "echo typed").await;
    let uri = format!("/api/tasks/{}", task["id"].as_str().unwrap());

    let (status, json) = send(
        &router,
        Method::PUT,
        &uri,
        Some(json!({ "name": 5, "owner": "ops", "command": "echo" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let (_, unchanged) = send(&router, Method::GET, &uri, None).await;
    assert_eq!(unchanged["name"], "typed");
}

/// Test: List returns tasks in creation order, `?id=` narrows to one.
#[tokio::test]
async fn test_list_tasks() {
    let router = default_router();
    let first = create_task(&router, "first", "echo 1").await;
    create_task(&router, "second", "echo 2").await;

    let (status, all) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);
    assert_eq!(all[0]["name"], "first");
    assert_eq!(all[1]["name"], "second");

    let id = first["id"].as_str().unwrap();
    let (status, one) = send(&router, Method::GET, &format!("/api/tasks?id={}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one.as_array().unwrap().len(), 1);
    assert_eq!(one[0]["id"], id);

    let (status, _) = send(&router, Method::GET, "/api/tasks?id=missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Search is a case-insensitive substring match; blank returns all.
#[tokio::test]
async fn test_search_tasks() {
    let router = default_router();
    create_task(&router, "Nightly Backup", "echo a").await;
    create_task(&router, "backup-check", "echo b").await;
    create_task(&router, "Report", "echo c").await;

    let (status, hits) = send(&router, Method::GET, "/api/tasks/search?name=BACKUP", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = hits
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Nightly Backup", "backup-check"]);

    let (_, all) = send(&router, Method::GET, "/api/tasks", None).await;
    let (_, empty_pattern) = send(&router, Method::GET, "/api/tasks/search?name=", None).await;
    let (_, no_pattern) = send(&router, Method::GET, "/api/tasks/search", None).await;
    assert_eq!(empty_pattern, all);
    assert_eq!(no_pattern, all);

    let (status, none) = send(&router, Method::GET, "/api/tasks/search?name=zzz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(none, json!([]));
}

/// Test: Update replaces the editable fields and keeps history.
#[tokio::test]
async fn test_update_task_keeps_history() {
    let router = default_router();
    let task = create_task(&router, "old", "echo old").await;
    let id = task["id"].as_str().unwrap();

    let (status, _) = send(&router, Method::PUT, &format!("/api/tasks/{}/execute", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, updated) = send(
        &router,
        Method::PUT,
        &format!("/api/tasks/{}", id),
        Some(json!({ "name": "new", "owner": "dev", "command": "echo new" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["id"], id);
    assert_eq!(updated["name"], "new");
    assert_eq!(updated["owner"], "dev");
    assert_eq!(updated["executions"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &router,
        Method::PUT,
        "/api/tasks/missing",
        Some(json!({ "name": "n", "owner": "o", "command": "c" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Delete removes the task and a second delete is 404.
#[tokio::test]
async fn test_delete_task() {
    let router = default_router();
    let task = create_task(&router, "gone", "echo bye").await;
    let uri = format!("/api/tasks/{}", task["id"].as_str().unwrap());

    let (status, body) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Execute returns the structured result and history grows.
#[tokio::test]
async fn test_execute_endpoint() {
    let router = default_router();
    let task = create_task(&router, "greet", "echo hello").await;
    let id = task["id"].as_str().unwrap();

    let (status, result) =
        send(&router, Method::PUT, &format!("/api/tasks/{}/execute", id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["taskId"], id);
    assert_eq!(result["status"], "SUCCESS");
    assert_eq!(result["exitCode"], 0);
    assert_eq!(result["output"], "hello");
    assert_eq!(result["backend"], "local");
    assert!(result["startTime"].is_string());
    assert!(result["endTime"].is_string());

    let (status, history) = send(
        &router,
        Method::GET,
        &format!("/api/tasks/{}/executions", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["exitCode"], 0);
    assert_eq!(history[0]["output"], "hello");
}

/// Test: A cluster submission is reported as success with a confirmation.
#[tokio::test]
async fn test_execute_via_cluster() {
    let router = build_router(create_test_state(
        ScriptedDispatcher::submitting(),
        ScriptedRunner::completing("never", 0),
    ));
    let task = create_task(&router, "remote", "echo remote").await;
    let id = task["id"].as_str().unwrap();

    let (status, result) =
        send(&router, Method::PUT, &format!("/api/tasks/{}/execute", id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["backend"], "cluster");
    let output = result["output"].as_str().unwrap();
    assert!(output.contains("namespace 'default'"));
    assert!(output.ends_with("echo remote"));
}

/// Test: Unsafe commands are refused with 400 and nothing is recorded.
#[tokio::test]
async fn test_execute_unsafe_command() {
    let router = default_router();
    let task = create_task(&router, "danger", "SHUTDOWN -h now").await;
    let id = task["id"].as_str().unwrap();

    let (status, json) =
        send(&router, Method::PUT, &format!("/api/tasks/{}/execute", id), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("unsafe command"));

    let (_, history) = send(
        &router,
        Method::GET,
        &format!("/api/tasks/{}/executions", id),
        None,
    )
    .await;
    assert_eq!(history, json!([]));
}

/// Test: Executing a missing task is 404.
#[tokio::test]
async fn test_execute_missing_task() {
    let router = default_router();

    let (status, json) = send(&router, Method::PUT, "/api/tasks/nope/execute", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (_, all) = send(&router, Method::GET, "/api/tasks", None).await;
    assert_eq!(all, json!([]));
}

/// Test: A recording failure is a 500 with its own code.
#[tokio::test]
async fn test_execute_recording_failure() {
    let store = Arc::new(FailingAppendStore::new());
    let orchestrator = scripted_orchestrator(
        store,
        ScriptedDispatcher::unavailable(),
        ScriptedRunner::completing("ran", 0),
    );
    let router = build_router(create_api_state(orchestrator));
    let task = create_task(&router, "t", "echo ran").await;
    let id = task["id"].as_str().unwrap();

    let (status, json) =
        send(&router, Method::PUT, &format!("/api/tasks/{}/execute", id), None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "RECORDING_FAILED");
}
