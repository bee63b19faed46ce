//! In-memory implementation of [`TaskStore`], for tests
//!
//! Provides the same semantics as [`super::postgres::PostgresTaskStore`]
//! without a database: every operation takes the same write lock, so
//! atomicity claims in the trait docs hold trivially here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{is_stuck, StoreError, TaskStore};
use crate::content_log::ContentLogEntry;
use crate::task::{Task, TaskFilter, TaskStatus};

/// In-memory [`TaskStore`]. Primarily for unit and integration tests.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    content_log: RwLock<HashMap<Uuid, Vec<ContentLogEntry>>>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            content_log: RwLock::new(HashMap::new()),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }
}

fn matches(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(status) = filter.status {
        if task.status != status {
            return false;
        }
    }
    if let Some(task_type) = &filter.task_type {
        if &task.task_type != task_type {
            return false;
        }
    }
    true
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write();
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn list_tasks(
        &self,
        filter: TaskFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read();
        let mut matching: Vec<Task> = tasks.values().filter(|t| matches(t, &filter)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let start = offset as usize;
        if start >= matching.len() {
            return Ok(vec![]);
        }
        let end = (start + limit as usize).min(matching.len());
        Ok(matching[start..end].to_vec())
    }

    async fn count_tasks(&self, filter: TaskFilter) -> Result<u64, StoreError> {
        let tasks = self.tasks.read();
        Ok(tasks.values().filter(|t| matches(t, &filter)).count() as u64)
    }

    async fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write();
        if !tasks.contains_key(&task.id) {
            return Err(StoreError::TaskNotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let removed = self.tasks.write().remove(&id).is_some();
        if removed {
            self.content_log.write().remove(&id);
        }
        Ok(removed)
    }

    async fn get_next_pending_task(&self) -> Result<Option<Task>, StoreError> {
        let now = Utc::now();
        let tasks = self.tasks.read();
        let next = tasks
            .values()
            .filter(|t| t.is_ready(now))
            .min_by_key(|t| t.created_at);
        Ok(next.cloned())
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.status = status;
        task.error_message = error_message;
        if status == TaskStatus::InProgress {
            task.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_task_progress(
        &self,
        id: Uuid,
        current: i32,
        total: i32,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.progress_current = current;
        task.progress_total = total;
        task.progress_message = message;
        Ok(())
    }

    async fn update_task_heartbeat(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn get_stuck_tasks(&self, timeout_s: i64) -> Result<Vec<Task>, StoreError> {
        let now = Utc::now();
        let tasks = self.tasks.read();
        Ok(tasks
            .values()
            .filter(|t| is_stuck(t, now, timeout_s))
            .cloned()
            .collect())
    }

    async fn increment_retry_count(&self, id: Uuid, delay_s: f64) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.retry_count += 1;
        task.status = TaskStatus::Pending;
        task.delayed_until = Some(Utc::now() + chrono::Duration::milliseconds((delay_s * 1000.0) as i64));
        Ok(())
    }

    async fn transition_in_progress_to(
        &self,
        id: Uuid,
        new_status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }
        task.status = new_status;
        task.error_message = error_message;
        if new_status.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn create_content_log(&self, entry: ContentLogEntry) -> Result<ContentLogEntry, StoreError> {
        let mut log = self.content_log.write();
        log.entry(entry.task_id).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn get_content_log_by_task(&self, id: Uuid) -> Result<Vec<ContentLogEntry>, StoreError> {
        let log = self.content_log.read();
        Ok(log.get(&id).cloned().unwrap_or_default())
    }

    async fn delete_content_log_by_task(&self, id: Uuid) -> Result<u64, StoreError> {
        let mut log = self.content_log.write();
        Ok(log.remove(&id).map(|entries| entries.len() as u64).unwrap_or(0))
    }
}
