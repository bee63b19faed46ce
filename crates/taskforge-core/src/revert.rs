//! Revert accounting for a completed task
//!
//! A task's handler may have created, updated, or deleted any number of
//! content entities, each announced through the artifact log
//! ([`crate::content_log::ContentLogEntry`]). Reverting a task does not
//! undo those effects — there is no content store wired in here to undo
//! them against — it tallies what the log says happened, grouped by
//! entity type, and marks the task as reverted so it cannot be accepted
//! or reverted again. Actually reversing the underlying entities is the
//! caller's job, informed by this tally.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::persistence::{StoreError, TaskStore};
use crate::task::{Task, TaskStatus};

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("task {id} is {status}, only a completed task can be reverted")]
    NotRevertable { id: uuid::Uuid, status: TaskStatus },
    #[error("task {id} was already accepted and cannot be reverted")]
    AlreadyAccepted { id: uuid::Uuid },
    #[error("task {id} was already reverted")]
    AlreadyReverted { id: uuid::Uuid },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-entity-type counts of artifact log entries for a reverted task.
///
/// Keys are the logged `entity_type`, pluralized by appending `s` (the log
/// records singular entity types like `cluster`; the summary reports how
/// many `clusters` were touched).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertSummary {
    pub task_id: uuid::Uuid,
    pub counts: HashMap<String, u32>,
}

fn pluralize(entity_type: &str) -> String {
    format!("{entity_type}s")
}

/// Tally the artifact log for `task` and stamp `reverted_at`.
///
/// `task` must already be `completed`, not yet accepted, and not yet
/// reverted; the caller is expected to have just fetched it.
pub async fn revert_task(
    store: &dyn TaskStore,
    task: &Task,
    now: DateTime<Utc>,
) -> Result<RevertSummary, RevertError> {
    if task.status != TaskStatus::Completed {
        return Err(RevertError::NotRevertable {
            id: task.id,
            status: task.status,
        });
    }
    if task.accepted_at.is_some() {
        return Err(RevertError::AlreadyAccepted { id: task.id });
    }
    if task.reverted_at.is_some() {
        return Err(RevertError::AlreadyReverted { id: task.id });
    }

    let entries = store.get_content_log_by_task(task.id).await?;
    let mut counts: HashMap<String, u32> = HashMap::new();
    for entry in &entries {
        *counts.entry(pluralize(&entry.entity_type)).or_insert(0) += 1;
    }

    let mut updated = task.clone();
    updated.reverted_at = Some(now);
    store.update_task(updated).await?;

    Ok(RevertSummary {
        task_id: task.id,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_log::{ContentAction, ContentLogEntry};
    use crate::persistence::InMemoryTaskStore;

    fn completed_task() -> Task {
        let mut task = Task::new("generate_clusters", serde_json::json!({}), None, None, Utc::now());
        task.status = TaskStatus::Completed;
        task
    }

    #[tokio::test]
    async fn tallies_mixed_entity_types_separately() {
        let store = InMemoryTaskStore::new();
        let task = completed_task();
        let id = task.id;
        store.create_task(task.clone()).await.unwrap();
        store
            .create_content_log(ContentLogEntry::new(id, "cluster", "c1", ContentAction::Created, None, Utc::now()))
            .await
            .unwrap();
        store
            .create_content_log(ContentLogEntry::new(id, "variant", "v1", ContentAction::Created, None, Utc::now()))
            .await
            .unwrap();
        store
            .create_content_log(ContentLogEntry::new(id, "variant", "v2", ContentAction::Created, None, Utc::now()))
            .await
            .unwrap();

        let summary = revert_task(&store, &task, Utc::now()).await.unwrap();
        assert_eq!(summary.counts.get("clusters"), Some(&1));
        assert_eq!(summary.counts.get("variants"), Some(&2));
    }

    #[tokio::test]
    async fn rejects_non_completed_task() {
        let store = InMemoryTaskStore::new();
        let mut task = completed_task();
        task.status = TaskStatus::Failed;
        let err = revert_task(&store, &task, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RevertError::NotRevertable { .. }));
    }

    #[tokio::test]
    async fn rejects_accepted_task() {
        let store = InMemoryTaskStore::new();
        let mut task = completed_task();
        task.accepted_at = Some(Utc::now());
        let err = revert_task(&store, &task, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RevertError::AlreadyAccepted { .. }));
    }

    #[tokio::test]
    async fn rejects_already_reverted_task() {
        let store = InMemoryTaskStore::new();
        let mut task = completed_task();
        task.reverted_at = Some(Utc::now());
        let err = revert_task(&store, &task, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RevertError::AlreadyReverted { .. }));
    }
}
