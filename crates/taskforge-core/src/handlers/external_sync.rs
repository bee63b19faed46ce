//! `external_sync`: demonstrates circuit-breaker-guarded handler execution
//!
//! Wraps a call to an injectable [`ExternalService`] with a named circuit
//! breaker. When the breaker is open, the handler returns
//! [`HandlerError::CircuitOpen`] instead of a generic failure so the
//! runner reschedules the task without spending retry budget (SPEC_FULL.md
//! §5.3): a dependency outage is not the task's fault.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::registry::{HandlerError, TaskHandler, TaskReporter};
use crate::reliability::{CircuitBreakerRegistry, CircuitCallError};
use crate::task::Task;

#[derive(Debug, Deserialize)]
struct Payload {
    entity_id: String,
}

#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("external service unavailable: {0}")]
    Unavailable(String),
    #[error("external service rejected request: {0}")]
    Rejected(String),
}

/// Collaborator standing in for whatever remote dependency a real sync
/// handler would call. Swappable for tests.
#[async_trait]
pub trait ExternalService: Send + Sync {
    async fn sync(&self, entity_id: &str) -> Result<(), ExternalServiceError>;
}

pub struct ExternalSyncHandler {
    service: Arc<dyn ExternalService>,
    breakers: Arc<CircuitBreakerRegistry>,
    breaker_name: String,
}

impl ExternalSyncHandler {
    pub fn new(service: Arc<dyn ExternalService>, breakers: Arc<CircuitBreakerRegistry>, breaker_name: impl Into<String>) -> Self {
        Self {
            service,
            breakers,
            breaker_name: breaker_name.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for ExternalSyncHandler {
    async fn run(&self, task: &Task, _reporter: &TaskReporter) -> Result<(), HandlerError> {
        let payload: Payload =
            serde_json::from_value(task.payload.clone()).map_err(|e| HandlerError::Failed(e.into()))?;

        let breaker = self.breakers.get_or_create(&self.breaker_name, Default::default());
        let service = self.service.clone();
        let entity_id = payload.entity_id.clone();

        let result = breaker
            .call(
                move || {
                    let service = service.clone();
                    let entity_id = entity_id.clone();
                    async move { service.sync(&entity_id).await }
                },
                |err| match err {
                    ExternalServiceError::Rejected(_) => "validation",
                    ExternalServiceError::Unavailable(_) => "unavailable",
                },
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(CircuitCallError::Open(open)) => Err(HandlerError::CircuitOpen {
                name: open.name,
                retry_after_secs: open.retry_after_secs,
            }),
            Err(CircuitCallError::Inner(err)) => Err(HandlerError::Failed(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::content_log::ContentAction;
    use crate::reliability::CircuitBreakerConfig;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyService {
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl ExternalService for FlakyService {
        async fn sync(&self, _entity_id: &str) -> Result<(), ExternalServiceError> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ExternalServiceError::Unavailable("timeout".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct NoopProgress;
    #[async_trait]
    impl crate::registry::ProgressReporter for NoopProgress {
        async fn update_progress(&self, _current: i32, _total: i32, _message: Option<String>) {}
    }

    struct NoopArtifacts;
    #[async_trait]
    impl crate::registry::ArtifactLogger for NoopArtifacts {
        async fn log_artifact(
            &self,
            _entity_type: &str,
            _entity_id: &str,
            _action: ContentAction,
            _previous_data: Option<serde_json::Value>,
        ) {
        }
    }

    #[tokio::test]
    async fn opens_after_repeated_failures_and_rejects_without_retry_budget() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(Arc::new(SystemClock)));
        breakers.get_or_create("external_sync", CircuitBreakerConfig::default().with_failure_threshold(1));
        let service = Arc::new(FlakyService {
            failures_remaining: AtomicUsize::new(10),
        });
        let handler = ExternalSyncHandler::new(service, breakers, "external_sync");
        let task = Task::new("external_sync", serde_json::json!({"entity_id": "e1"}), None, None, Utc::now());
        let reporter = TaskReporter::new(task.id, Arc::new(NoopProgress), Arc::new(NoopArtifacts));

        let first = handler.run(&task, &reporter).await.unwrap_err();
        assert!(matches!(first, HandlerError::Failed(_)));

        let second = handler.run(&task, &reporter).await.unwrap_err();
        assert!(matches!(second, HandlerError::CircuitOpen { .. }));
    }
}
