//! End-to-end execution tests.
//!
//! These run real shell commands through the local fallback, with cluster
//! dispatch disabled.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use taskd::{
    Backend, DenylistValidator, DisabledDispatcher, ExecuteError, ExecutionStatus,
    FAILURE_EXIT_CODE, InMemoryStore, KubeDispatcher, LocalRunner, Orchestrator, Rejection,
    TaskId, TaskSpec, TaskStore,
};
use tokio_util::sync::CancellationToken;

use crate::common::local_orchestrator;

async fn store_with(command: &str) -> (Arc<InMemoryStore>, TaskId) {
    let store = Arc::new(InMemoryStore::new());
    let task = store
        .create(TaskSpec::new("task", "tester", command))
        .await
        .unwrap();
    (store, task.id)
}

/// Test: An echoed token comes back and exactly one execution is appended.
#[tokio::test]
async fn test_echo_succeeds_locally() {
    let (store, id) = store_with("echo token_4711").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));

    let result = orchestrator.execute(&id).await.unwrap();

    assert_eq!(result.task_id, id);
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.exit_code, 0);
    assert!(result.output.contains("token_4711"));
    assert_eq!(result.backend, Backend::Local);

    let history = store.get(&id).await.unwrap().executions;
    assert_eq!(history.len(), 1);
    assert!(history[0].end_time >= history[0].start_time);
}

/// Test: A failing command records its real exit code.
#[tokio::test]
async fn test_nonzero_exit_is_recorded() {
    let (store, id) = store_with("echo failing >&2; exit 3").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));

    let result = orchestrator.execute(&id).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.output, "failing");

    let history = store.get(&id).await.unwrap().executions;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].exit_code, 3);
}

/// Test: Denylisted tokens are caught in any case and nothing is appended.
#[tokio::test]
async fn test_denylisted_commands_are_rejected() {
    for command in ["rm -rf /tmp/x", "RM -RF /tmp/x", "sudo Reboot", "mkfs.ext4 /dev/sda"] {
        let (store, id) = store_with(command).await;
        let orchestrator = local_orchestrator(Arc::clone(&store));

        let err = orchestrator.execute(&id).await.unwrap_err();

        assert!(
            matches!(
                err,
                ExecuteError::InvalidCommand {
                    reason: Rejection::Unsafe { .. },
                    ..
                }
            ),
            "{command:?} should be rejected, got {err:?}"
        );
        assert!(store.get(&id).await.unwrap().executions.is_empty());
    }
}

/// Test: Whitespace-only commands are rejected as empty.
#[tokio::test]
async fn test_whitespace_command_is_rejected() {
    let (store, id) = store_with("echo placeholder").await;
    let mut task = store.get(&id).await.unwrap();
    task.command = " \t ".to_string();
    store.save(task).await.unwrap();

    let err = local_orchestrator(Arc::clone(&store))
        .execute(&id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecuteError::InvalidCommand {
            reason: Rejection::Empty,
            ..
        }
    ));
    assert!(store.get(&id).await.unwrap().executions.is_empty());
}

/// Test: A missing task appends nothing anywhere.
#[tokio::test]
async fn test_missing_task_appends_nothing() {
    let (store, id) = store_with("echo hi").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));

    let err = orchestrator.execute(&TaskId::new("ghost")).await.unwrap_err();

    assert!(matches!(err, ExecuteError::TaskNotFound(_)));
    assert_eq!(store.list().await.unwrap().len(), 1);
    assert!(store.get(&id).await.unwrap().executions.is_empty());
}

/// Test: Two sequential runs append two executions in call order.
#[tokio::test]
async fn test_sequential_runs_are_ordered() {
    let (store, id) = store_with("echo tick").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));

    let first = orchestrator.execute(&id).await.unwrap();
    let second = orchestrator.execute(&id).await.unwrap();

    assert!(second.start_time >= first.end_time);
    let history = store.get(&id).await.unwrap().executions;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].start_time, first.start_time);
    assert_eq!(history[1].start_time, second.start_time);
}

/// Test: Concurrent runs of one task all land in its history.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_are_all_recorded() {
    let (store, id) = store_with("echo parallel").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { orchestrator.execute(&id).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.get(&id).await.unwrap().executions.len(), 8);
}

/// Test: A local timeout becomes a recorded failure, not an error.
#[tokio::test]
async fn test_local_timeout_is_recorded_as_failure() {
    let (store, id) = store_with("sleep 30").await;
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(DenylistValidator::default()),
        Arc::new(DisabledDispatcher),
        Arc::new(LocalRunner::new().with_timeout(Duration::from_millis(200))),
    );

    let result = orchestrator.execute(&id).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
    assert!(result.output.starts_with("Local execution failed"));
    assert_eq!(store.get(&id).await.unwrap().executions.len(), 1);
}

/// Test: Cancelling an execute call kills the child and records a failure.
#[tokio::test]
async fn test_cancellation_is_recorded_and_observable() {
    let (store, id) = store_with("sleep 30").await;
    let orchestrator = local_orchestrator(Arc::clone(&store));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.execute_with_cancel(&id, &cancel),
    )
    .await
    .expect("cancelled run should finish promptly")
    .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.output.contains("interrupted"));
    assert!(cancel.is_cancelled());
    assert_eq!(store.get(&id).await.unwrap().executions.len(), 1);
}

/// Test: With no usable credentials the cluster path falls back to local.
#[tokio::test]
async fn test_unreachable_cluster_falls_back_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = KubeDispatcher::new()
        .credentials(vec![taskd::CredentialSource::Kubeconfig])
        .kubeconfig(dir.path().join("missing-kubeconfig"))
        .submit_timeout(Duration::from_secs(2));

    let (store, id) = store_with("echo fallback_ok").await;
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(DenylistValidator::default()),
        Arc::new(dispatcher),
        Arc::new(LocalRunner::new()),
    );

    let result = orchestrator.execute(&id).await.unwrap();

    assert_eq!(result.backend, Backend::Local);
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "fallback_ok");
}
