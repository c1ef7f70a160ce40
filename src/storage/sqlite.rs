//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Executions live in
//! their own table keyed by an autoincrement sequence, so appending history
//! is a single `INSERT` and ordering is the insertion order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use super::{StorageError, TaskStore, unsaved_executions};
use crate::core::execution::{Backend, Execution};
use crate::core::task::{Task, TaskSpec};
use crate::core::types::TaskId;

type TaskRow = (String, String, String, String);
type ExecutionRow = (String, String, String, String, i64, String);

// Task ids bound per `IN (...)` list, well under SQLite's variable limit.
const ID_BATCH: usize = 500;

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        // A single connection that is never recycled, otherwise the
        // database disappears with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn fetch_task_rows(conn: &mut SqliteConnection) -> Result<Vec<TaskRow>, StorageError> {
    sqlx::query_as("SELECT id, name, owner, command FROM tasks ORDER BY rowid")
        .fetch_all(conn)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))
}

async fn fetch_executions(
    conn: &mut SqliteConnection,
    id: &TaskId,
) -> Result<Vec<Execution>, StorageError> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(
        "SELECT task_id, start_time, end_time, output, exit_code, backend FROM executions WHERE task_id = ? ORDER BY seq",
    )
    .bind(id.as_str())
    .fetch_all(conn)
    .await
    .map_err(|e| StorageError::Other(e.to_string()))?;

    rows.into_iter().map(row_to_execution).collect()
}

/// Attach histories to task rows, reading only the executions of those tasks.
async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<TaskRow>,
) -> Result<Vec<Task>, StorageError> {
    let mut by_task: HashMap<String, Vec<Execution>> = HashMap::new();

    for batch in rows.chunks(ID_BATCH) {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT task_id, start_time, end_time, output, exit_code, backend FROM executions WHERE task_id IN (",
        );
        let mut ids = query.separated(", ");
        for row in batch {
            ids.push_bind(row.0.clone());
        }
        ids.push_unseparated(") ORDER BY seq");

        let exec_rows: Vec<ExecutionRow> = query
            .build_query_as::<ExecutionRow>()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        for row in exec_rows {
            let task_id = row.0.clone();
            by_task
                .entry(task_id)
                .or_default()
                .push(row_to_execution(row)?);
        }
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let executions = by_task.remove(&row.0).unwrap_or_default();
            let mut task = row_to_task(row);
            task.executions = executions;
            task
        })
        .collect())
}

async fn insert_execution(
    conn: &mut SqliteConnection,
    id: &TaskId,
    execution: &Execution,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO executions (task_id, start_time, end_time, output, exit_code, backend)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.as_str())
    .bind(time_to_string(execution.start_time))
    .bind(time_to_string(execution.end_time))
    .bind(&execution.output)
    .bind(execution.exit_code as i64)
    .bind(execution.backend.as_str())
    .execute(conn)
    .await
    .map_err(|e| StorageError::Other(e.to_string()))?;
    Ok(())
}

// Helper functions for time conversion
fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn string_to_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp '{}': {}", s, e)))
}

fn row_to_task(row: TaskRow) -> Task {
    Task::new(TaskId::new(row.0), TaskSpec::new(row.1, row.2, row.3))
}

fn row_to_execution(row: ExecutionRow) -> Result<Execution, StorageError> {
    let backend = Backend::from_str(&row.5).map_err(StorageError::Corrupt)?;
    let exit_code = i32::try_from(row.4)
        .map_err(|_| StorageError::Corrupt(format!("exit code out of range: {}", row.4)))?;
    Ok(Execution {
        start_time: string_to_time(&row.1)?,
        end_time: string_to_time(&row.2)?,
        output: row.3,
        exit_code,
        backend,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, spec: TaskSpec) -> Result<Task, StorageError> {
        let task = Task::new(TaskId::generate(), spec);
        sqlx::query("INSERT INTO tasks (id, name, owner, command) VALUES (?, ?, ?, ?)")
            .bind(task.id.as_str())
            .bind(&task.name)
            .bind(&task.owner)
            .bind(&task.command)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> Result<Task, StorageError> {
        // One read transaction, so the row and its history are a consistent pair.
        let mut tx = self.begin().await?;

        let row: TaskRow =
            sqlx::query_as("SELECT id, name, owner, command FROM tasks WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?
                .ok_or_else(|| StorageError::NotFound(id.clone()))?;

        let mut task = row_to_task(row);
        task.executions = fetch_executions(&mut tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(task)
    }

    async fn list(&self) -> Result<Vec<Task>, StorageError> {
        let mut tx = self.begin().await?;
        let rows = fetch_task_rows(&mut tx).await?;
        let tasks = hydrate(&mut tx, rows).await?;
        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(tasks)
    }

    async fn search(&self, pattern: Option<&str>) -> Result<Vec<Task>, StorageError> {
        let pattern = pattern.unwrap_or_default().trim().to_lowercase();
        let mut tx = self.begin().await?;
        // Filter in Rust so case folding matches the in-memory store
        // for non-ASCII names.
        let rows = fetch_task_rows(&mut tx)
            .await?
            .into_iter()
            .filter(|row| pattern.is_empty() || row.1.to_lowercase().contains(&pattern))
            .collect();
        let tasks = hydrate(&mut tx, rows).await?;
        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(tasks)
    }

    async fn save(&self, mut task: Task) -> Result<Task, StorageError> {
        let mut tx = self.begin().await?;

        // Write first so the transaction holds the write lock before it reads.
        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, owner, command) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                command = excluded.command
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.name)
        .bind(&task.owner)
        .bind(&task.command)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut history = fetch_executions(&mut tx, &task.id).await?;
        let tail = unsaved_executions(&task.id, &history, &task.executions)?.to_vec();
        for execution in &tail {
            insert_execution(&mut tx, &task.id, execution).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        history.extend(tail);
        task.executions = history;
        Ok(task)
    }

    async fn update(&self, id: &TaskId, spec: TaskSpec) -> Result<Task, StorageError> {
        let result = sqlx::query("UPDATE tasks SET name = ?, owner = ?, command = ? WHERE id = ?")
            .bind(&spec.name)
            .bind(&spec.owner)
            .bind(&spec.command)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.clone()));
        }
        self.get(id).await
    }

    async fn append_execution(
        &self,
        id: &TaskId,
        execution: Execution,
    ) -> Result<(), StorageError> {
        // Existence check and insert in one statement.
        let result = sqlx::query(
            r#"
            INSERT INTO executions (task_id, start_time, end_time, output, exit_code, backend)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM tasks WHERE id = ?)
            "#,
        )
        .bind(id.as_str())
        .bind(time_to_string(execution.start_time))
        .bind(time_to_string(execution.end_time))
        .bind(&execution.output)
        .bind(execution.exit_code as i64)
        .bind(execution.backend.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn exists(&self, id: &TaskId) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(row.is_some())
    }
}
