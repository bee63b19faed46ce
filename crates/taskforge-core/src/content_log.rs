//! Artifact log: the append-only record of side effects a task performed
//!
//! Handlers announce every durable side effect through the artifact
//! callback *before* the effect becomes visible, so the log is always
//! sufficient for a future revert executor to undo it (see SPEC_FULL.md
//! §4.4). This module models the log entry only; appending and reading
//! it back is a [`crate::persistence::TaskStore`] responsibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// What a logged artifact action did to the domain entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ContentAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ContentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown content action: {other}")),
        }
    }
}

/// One immutable entry in a task's artifact log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ContentLogEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: ContentAction,
    /// Snapshot sufficient to reverse an `Updated`/`Deleted` action. Always
    /// `None` for `Created` (there is nothing to restore to).
    pub previous_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ContentLogEntry {
    pub fn new(
        task_id: Uuid,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: ContentAction,
        previous_data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            previous_data,
            created_at: now,
        }
    }
}
