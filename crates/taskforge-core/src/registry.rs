//! Task handler registry
//!
//! Handlers are plain `async_trait` implementations registered by type
//! string at process start, rather than discovered via a decorator at
//! import time. The runner looks a handler up by `task.task_type` for
//! every dequeued task; an unregistered type is a handler-not-found
//! error, not a panic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::content_log::ContentAction;
use crate::task::Task;

/// Callback a handler uses to report incremental progress.
///
/// Implemented by the runner; handlers never touch the store directly.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn update_progress(&self, current: i32, total: i32, message: Option<String>);
}

/// Callback a handler uses to record a durable side effect before it
/// becomes externally visible, so a future revert can undo it.
#[async_trait]
pub trait ArtifactLogger: Send + Sync {
    async fn log_artifact(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: ContentAction,
        previous_data: Option<serde_json::Value>,
    );
}

/// Everything a handler needs to report progress and log artifacts for
/// the task it is currently executing.
pub struct TaskReporter {
    pub task_id: Uuid,
    progress: Arc<dyn ProgressReporter>,
    artifacts: Arc<dyn ArtifactLogger>,
}

impl TaskReporter {
    pub fn new(
        task_id: Uuid,
        progress: Arc<dyn ProgressReporter>,
        artifacts: Arc<dyn ArtifactLogger>,
    ) -> Self {
        Self {
            task_id,
            progress,
            artifacts,
        }
    }

    pub async fn update_progress(&self, current: i32, total: i32, message: Option<String>) {
        self.progress.update_progress(current, total, message).await;
    }

    pub async fn log_artifact(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: ContentAction,
        previous_data: Option<serde_json::Value>,
    ) {
        self.artifacts
            .log_artifact(entity_type, entity_id, action, previous_data)
            .await;
    }
}

/// Error raised by a handler's `run`. Carries an optional `kind` used by
/// the runner to decide whether a circuit-breaker rejection already
/// happened inside the handler (see [`HandlerError::circuit_open`]).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler's own circuit breaker rejected the call; the runner
    /// must not count this as a retryable failure (SPEC_FULL.md §5.3).
    #[error("circuit breaker '{name}' open, retry after {retry_after_secs:.1}s")]
    CircuitOpen { name: String, retry_after_secs: f64 },

    /// Any other failure; always counts toward the retry budget.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A typed unit of work a [`crate::runner::TaskRunner`] can dispatch to.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &Task, reporter: &TaskReporter) -> Result<(), HandlerError>;
}

/// Lookup table from `task_type` string to the handler that runs it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }
}
