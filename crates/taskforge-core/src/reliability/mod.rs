//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - exponential backoff for transient handler failures
//! - [`CircuitBreaker`] / [`CircuitBreakerConfig`] - per-dependency circuit breaker
//! - [`CircuitBreakerRegistry`] - process-wide lookup of breakers by name

mod circuit_breaker;
mod circuit_registry;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPermit, CircuitBreakerStatus,
    CircuitCallError, CircuitOpenError, CircuitState,
};
pub use circuit_registry::CircuitBreakerRegistry;
pub use retry::RetryPolicy;
