//! TaskStore trait definition
//!
//! The abstract store every runner and admin operation goes through.
//! [`crate::persistence::InMemoryTaskStore`] backs tests;
//! [`crate::persistence::PostgresTaskStore`] backs production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::content_log::ContentLogEntry;
use crate::task::{Task, TaskFilter, TaskStatus};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Store for tasks and their artifact logs.
///
/// Implementations must be thread-safe and support concurrent access;
/// the runner's poll loop, reaper loop, and the HTTP admin surface all
/// hold a reference to the same store concurrently.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Most recent first by `created_at`.
    async fn list_tasks(
        &self,
        filter: TaskFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Task>, StoreError>;

    async fn count_tasks(&self, filter: TaskFilter) -> Result<u64, StoreError>;

    /// Whole-record write.
    async fn update_task(&self, task: Task) -> Result<Task, StoreError>;

    /// Cascades artifact log deletion.
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError>;

    /// The oldest ready pending task, as defined by `Task::is_ready`.
    async fn get_next_pending_task(&self) -> Result<Option<Task>, StoreError>;

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    async fn update_task_progress(
        &self,
        id: Uuid,
        current: i32,
        total: i32,
        message: Option<String>,
    ) -> Result<(), StoreError>;

    async fn update_task_heartbeat(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get_stuck_tasks(&self, timeout_s: i64) -> Result<Vec<Task>, StoreError>;

    /// Atomic: `retry_count += 1`, `status = pending`, `delayed_until = now + delay_s`.
    async fn increment_retry_count(&self, id: Uuid, delay_s: f64) -> Result<(), StoreError>;

    /// Conditional write backing cancellation safety: applies only if the
    /// task's current status is still `in_progress`. Returns whether the
    /// transition applied.
    async fn transition_in_progress_to(
        &self,
        id: Uuid,
        new_status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError>;

    async fn create_content_log(&self, entry: ContentLogEntry) -> Result<ContentLogEntry, StoreError>;

    /// Chronological.
    async fn get_content_log_by_task(&self, id: Uuid) -> Result<Vec<ContentLogEntry>, StoreError>;

    async fn delete_content_log_by_task(&self, id: Uuid) -> Result<u64, StoreError>;
}

/// Helper shared by in-memory and Postgres backends to decide whether a
/// stuck-task row qualifies, given the reaper's timeout window.
pub(crate) fn is_stuck(task: &Task, now: DateTime<Utc>, timeout_s: i64) -> bool {
    task.status == TaskStatus::InProgress
        && task
            .heartbeat_at
            .map(|hb| now - hb > chrono::Duration::seconds(timeout_s))
            .unwrap_or(false)
}
