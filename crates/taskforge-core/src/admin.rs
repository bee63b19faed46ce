//! Administrative operations on a task's lifecycle
//!
//! These sit outside the runner's own state machine: an operator (or the
//! HTTP surface over this crate) calls through here to cancel, retry,
//! accept, or revert a task. Each operation validates the task's current
//! status before writing, so a racing runner and a racing admin call can
//! never leave a task in an inconsistent state.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::persistence::{StoreError, TaskStore};
use crate::revert::{self, RevertError, RevertSummary};
use crate::task::{Task, TaskStatus};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("task {id} is {status}, which cannot be cancelled")]
    NotCancellable { id: Uuid, status: TaskStatus },
    #[error("task {id} is {status}, only a failed task can be retried")]
    NotRetryable { id: Uuid, status: TaskStatus },
    #[error("task {id} is {status}, only a completed task can be accepted")]
    NotAcceptable { id: Uuid, status: TaskStatus },
    #[error("task {id} was already accepted")]
    AlreadyAccepted { id: Uuid },
    #[error(transparent)]
    Revert(#[from] RevertError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cancel a task that is still `pending` or `in_progress`.
///
/// An in-progress handler is not interrupted; it simply finds on its next
/// write that the task has moved out from under it (store writes that key
/// off the prior `in_progress` status, such as
/// [`TaskStore::transition_in_progress_to`], will no-op).
pub async fn cancel_task(store: &dyn TaskStore, id: Uuid) -> Result<Task, AdminError> {
    let task = store.get_task_by_id(id).await?.ok_or(AdminError::TaskNotFound(id))?;
    if !matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
        return Err(AdminError::NotCancellable {
            id,
            status: task.status,
        });
    }
    store.update_task_status(id, TaskStatus::Cancelled, None).await?;
    store.get_task_by_id(id).await?.ok_or(AdminError::TaskNotFound(id))
}

/// Reset a `failed` task back to `pending` so the poll loop can pick it up
/// again. Clears every field the prior run left behind except
/// `retry_count`, which is a lifetime counter, not a per-attempt one.
pub async fn retry_task(store: &dyn TaskStore, id: Uuid) -> Result<Task, AdminError> {
    let mut task = store.get_task_by_id(id).await?.ok_or(AdminError::TaskNotFound(id))?;
    if task.status != TaskStatus::Failed {
        return Err(AdminError::NotRetryable {
            id,
            status: task.status,
        });
    }
    task.status = TaskStatus::Pending;
    task.error_message = None;
    task.started_at = None;
    task.completed_at = None;
    task.progress_current = 0;
    task.progress_total = 0;
    task.progress_message = None;
    task.delayed_until = None;
    store.update_task(task).await.map_err(AdminError::from)
}

/// Mark a `completed` task as accepted. Accepted tasks can never be
/// reverted; this is the caller's signal that the artifacts are final.
pub async fn accept_task(store: &dyn TaskStore, clock: &Arc<dyn Clock>, id: Uuid) -> Result<Task, AdminError> {
    let mut task = store.get_task_by_id(id).await?.ok_or(AdminError::TaskNotFound(id))?;
    if task.status != TaskStatus::Completed {
        return Err(AdminError::NotAcceptable {
            id,
            status: task.status,
        });
    }
    if task.accepted_at.is_some() {
        return Err(AdminError::AlreadyAccepted { id });
    }
    task.accepted_at = Some(clock.now());
    store.update_task(task).await.map_err(AdminError::from)
}

/// Revert accounting for a completed task: tallies the artifact log by
/// entity type and stamps `reverted_at`. See [`crate::revert`] for why this
/// stops short of undoing anything.
pub async fn revert_task(
    store: &dyn TaskStore,
    clock: &Arc<dyn Clock>,
    id: Uuid,
) -> Result<RevertSummary, AdminError> {
    let task = store.get_task_by_id(id).await?.ok_or(AdminError::TaskNotFound(id))?;
    let summary = revert::revert_task(store, &task, clock.now()).await?;
    Ok(summary)
}
