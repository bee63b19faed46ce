//! # Durable Task Engine
//!
//! A crash-tolerant background task runner: a durable queue, a
//! single-worker poll loop with heartbeat-based stuck-task recovery,
//! exponential-backoff retries, per-dependency circuit breakers, and an
//! append-only artifact log that backs revert accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskRunner                             │
//! │   (poll loop + stuck-task reaper, dispatches to handlers)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskStore                              │
//! │      (PostgreSQL: tasks, content_log; in-memory for tests)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HandlerRegistry                          │
//! │        (task_type -> TaskHandler, looked up per dequeue)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use taskforge_core::prelude::*;
//! use std::sync::Arc;
//!
//! let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
//! let mut handlers = HandlerRegistry::new();
//! handlers.register("generate_clusters", Arc::new(GenerateClustersHandler::new(content)));
//! let runner = TaskRunner::new(store, Arc::new(handlers), Arc::new(SystemClock), RunnerConfig::default());
//! ```

pub mod admin;
pub mod clock;
pub mod content;
pub mod content_log;
pub mod handlers;
pub mod persistence;
pub mod registry;
pub mod reliability;
pub mod revert;
pub mod runner;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::admin::{self, AdminError};
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::content::{ContentError, ContentRepository, InMemoryContentRepository};
    pub use crate::content_log::{ContentAction, ContentLogEntry};
    pub use crate::handlers::{ExternalService, ExternalSyncHandler, GenerateClustersHandler};
    pub use crate::persistence::{InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStore};
    pub use crate::registry::{
        ArtifactLogger, HandlerError, HandlerRegistry, ProgressReporter, TaskHandler, TaskReporter,
    };
    pub use crate::reliability::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitCallError,
        CircuitOpenError, CircuitState, RetryPolicy,
    };
    pub use crate::revert::{self, RevertError, RevertSummary};
    pub use crate::runner::{RunnerConfig, RunnerError, TaskRunner};
    pub use crate::task::{Task, TaskFilter, TaskStatus};
}

// Re-export key types at crate root
pub use clock::{Clock, SystemClock};
pub use content::{ContentError, ContentRepository, InMemoryContentRepository};
pub use content_log::{ContentAction, ContentLogEntry};
pub use persistence::{InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStore};
pub use registry::{HandlerError, HandlerRegistry, TaskHandler, TaskReporter};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus, RetryPolicy,
};
pub use runner::{RunnerConfig, RunnerError, TaskRunner};
pub use task::{Task, TaskFilter, TaskStatus};
