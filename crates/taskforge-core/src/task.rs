//! Task domain model
//!
//! A [`Task`] is a durable work item carried through its lifecycle by the
//! [`crate::runner::TaskRunner`]. The enum/field shapes here mirror the
//! store schema (`migrations/0001_tasks.sql`) one-to-one; `TaskStore`
//! implementations write and read exactly these fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Default retry budget for a newly created task.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Lifecycle status of a [`Task`].
///
/// Transitions are enforced by [`crate::runner::TaskRunner`] and the admin
/// operations in [`crate::admin`]; see SPEC_FULL.md §4.3 for the full graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again without an explicit admin
    /// action (retry resets a `Failed` task back to `Pending`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A queued unit of work.
///
/// `task_type` is a free string rather than an enum: the handler registry
/// is the source of truth for which types exist, and new handlers can be
/// registered without touching this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub user_context: Option<String>,

    pub created_at: DateTime<Utc>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub progress_current: i32,
    pub progress_total: i32,
    pub progress_message: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,

    pub accepted_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Construct a new `pending` task with defaults for every scheduling
    /// and progress field. Mirrors what `POST /tasks` hands the store.
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        user_context: Option<String>,
        delayed_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            payload,
            user_context,
            created_at: now,
            delayed_until,
            started_at: None,
            completed_at: None,
            progress_current: 0,
            progress_total: 0,
            progress_message: None,
            heartbeat_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            accepted_at: None,
            reverted_at: None,
        }
    }

    /// Is this task eligible to be dequeued right now?
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && match self.delayed_until {
                Some(delayed_until) => delayed_until <= now,
                None => true,
            }
    }
}

/// Filter shared by `list_tasks` and `count_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
}
