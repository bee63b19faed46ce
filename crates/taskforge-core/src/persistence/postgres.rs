//! PostgreSQL implementation of [`TaskStore`]
//!
//! Uses `FOR UPDATE SKIP LOCKED` to let `get_next_pending_task` and the
//! reaper coexist safely with a future multi-process deployment, even
//! though the current runner is single-worker.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{StoreError, TaskStore};
use crate::content_log::{ContentAction, ContentLogEntry};
use crate::task::{Task, TaskFilter, TaskStatus};

/// PostgreSQL-backed [`TaskStore`]. Uses a connection pool for efficient
/// database access.
///
/// # Example
///
/// ```ignore
/// use taskforge_core::persistence::PostgresTaskStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/taskforge").await?;
/// let store = PostgresTaskStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations. Call once at startup.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn parse_task_status(status: &str) -> Result<TaskStatus, StoreError> {
    status
        .parse()
        .map_err(|_| StoreError::Database(format!("invalid task status: {status}")))
}

fn parse_content_action(action: &str) -> Result<ContentAction, StoreError> {
    action
        .parse()
        .map_err(|_| StoreError::Database(format!("invalid content action: {action}")))
}

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let status_str: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        task_type: row.get("task_type"),
        status: parse_task_status(&status_str)?,
        payload: row.get("payload"),
        user_context: row.get("user_context"),
        created_at: row.get("created_at"),
        delayed_until: row.get("delayed_until"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        progress_current: row.get("progress_current"),
        progress_total: row.get("progress_total"),
        progress_message: row.get("progress_message"),
        heartbeat_at: row.get("heartbeat_at"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        accepted_at: row.get("accepted_at"),
        reverted_at: row.get("reverted_at"),
    })
}

fn row_to_content_log_entry(row: sqlx::postgres::PgRow) -> Result<ContentLogEntry, StoreError> {
    let action_str: String = row.get("action");
    Ok(ContentLogEntry {
        id: row.get("id"),
        task_id: row.get("task_id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        action: parse_content_action(&action_str)?,
        previous_data: row.get("previous_data"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self, task))]
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, task_type, status, payload, user_context, created_at, delayed_until,
                progress_current, progress_total, retry_count, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(task.status.to_string())
        .bind(&task.payload)
        .bind(&task.user_context)
        .bind(task.created_at)
        .bind(task.delayed_until)
        .bind(task.progress_current)
        .bind(task.progress_total)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create task: {e}");
            StoreError::Database(e.to_string())
        })?;

        debug!(task_id = %task.id, task_type = %task.task_type, "created task");
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn get_task_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list_tasks(&self, filter: TaskFilter, limit: u32, offset: u32) -> Result<Vec<Task>, StoreError> {
        let status_str = filter.status.map(|s| s.to_string());
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR task_type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status_str)
        .bind(&filter.task_type)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn count_tasks(&self, filter: TaskFilter) -> Result<u64, StoreError> {
        let status_str = filter.status.map(|s| s.to_string());
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM tasks
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR task_type = $2)
            "#,
        )
        .bind(status_str)
        .bind(&filter.task_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let count: i64 = row.get("count");
        Ok(count as u64)
    }

    #[instrument(skip(self, task))]
    async fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2, payload = $3, user_context = $4, delayed_until = $5,
                started_at = $6, completed_at = $7, progress_current = $8,
                progress_total = $9, progress_message = $10, heartbeat_at = $11,
                error_message = $12, retry_count = $13, max_retries = $14,
                accepted_at = $15, reverted_at = $16
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(task.status.to_string())
        .bind(&task.payload)
        .bind(&task.user_context)
        .bind(task.delayed_until)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.progress_current)
        .bind(task.progress_total)
        .bind(&task.progress_message)
        .bind(task.heartbeat_at)
        .bind(&task.error_message)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(task.accepted_at)
        .bind(task.reverted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task.id));
        }
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_next_pending_task(&self) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status = 'pending'
              AND (delayed_until IS NULL OR delayed_until <= NOW())
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                error_message = $3,
                started_at = CASE WHEN $2 = 'in_progress' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_task_progress(
        &self,
        id: Uuid,
        current: i32,
        total: i32,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET progress_current = $2, progress_total = $3, progress_message = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(current)
        .bind(total)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_task_heartbeat(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET heartbeat_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_stuck_tasks(&self, timeout_s: i64) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE status = 'in_progress'
              AND heartbeat_at IS NOT NULL
              AND heartbeat_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(timeout_s as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn increment_retry_count(&self, id: Uuid, delay_s: f64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                retry_count = retry_count + 1,
                status = 'pending',
                delayed_until = NOW() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delay_s)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transition_in_progress_to(
        &self,
        id: Uuid,
        new_status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                error_message = $3,
                completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(new_status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, entry))]
    async fn create_content_log(&self, entry: ContentLogEntry) -> Result<ContentLogEntry, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO content_log (id, task_id, entity_type, entity_id, action, previous_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.task_id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.action.to_string())
        .bind(&entry.previous_data)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn get_content_log_by_task(&self, id: Uuid) -> Result<Vec<ContentLogEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM content_log WHERE task_id = $1 ORDER BY created_at")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_content_log_entry).collect()
    }

    #[instrument(skip(self))]
    async fn delete_content_log_by_task(&self, id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM content_log WHERE task_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
