//! Shared application state handed to every route module

use std::sync::Arc;

use taskforge_core::{CircuitBreakerRegistry, Clock, HandlerRegistry, TaskRunner, TaskStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub runner: Arc<TaskRunner>,
    pub clock: Arc<dyn Clock>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
