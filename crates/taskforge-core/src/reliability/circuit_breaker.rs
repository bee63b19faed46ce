//! Circuit breaker: protects calls to fragile external dependencies
//!
//! When failures exceed `failure_threshold` the circuit opens and calls
//! fail fast without reaching the dependency; after `reset_timeout` it
//! probes with a handful of half-open calls before closing again.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  failure threshold  ┌─────────┐  reset timeout  ┌──────────┐
//! │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
//! └─────────┘                     └─────────┘                 └──────────┘
//!      ▲                                                            │
//!      │                                                            │
//!      │              success threshold                             │
//!      └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use taskforge_core::reliability::{CircuitBreaker, CircuitBreakerConfig};
//! use taskforge_core::clock::SystemClock;
//! use std::sync::Arc;
//!
//! let config = CircuitBreakerConfig::default()
//!     .with_failure_threshold(5)
//!     .with_reset_timeout(std::time::Duration::from_secs(60));
//! let breaker = CircuitBreaker::new("billing-api", config, Arc::new(SystemClock));
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::clock::Clock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if service recovered - limited calls allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures (while closed) required to open the circuit
    pub failure_threshold: u32,

    /// Number of consecutive successes (while half-open) required to close the circuit
    pub success_threshold: u32,

    /// Time the circuit stays open before probing again
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,

    /// Error kinds that propagate to the caller without counting as a
    /// breaker failure, e.g. caller-input validation errors that say
    /// nothing about the dependency's health.
    #[serde(default)]
    pub excluded_error_kinds: HashSet<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            excluded_error_kinds: HashSet::new(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold to close the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the reset timeout (time before probing again after opening)
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Add an error kind that never counts toward the failure threshold
    pub fn with_excluded_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.excluded_error_kinds.insert(kind.into());
        self
    }
}

/// Raised when a call is rejected because the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open, retry after {retry_after_secs:.1}s")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after_secs: f64,
}

/// Point-in-time snapshot of a breaker, for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub retry_after_seconds: Option<f64>,
    pub last_state_change: DateTime<Utc>,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

/// A single named circuit breaker.
///
/// State mutation is serialized behind one `parking_lot::Mutex`; breakers
/// are otherwise independent (see [`crate::reliability::CircuitBreakerRegistry`]
/// for process-wide lookup by name).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

/// A permit acquired for one protected call.
///
/// Resolve with [`CircuitBreakerPermit::success`] or
/// [`CircuitBreakerPermit::failure`] exactly once. Dropping it unresolved
/// leaves the breaker's counters untouched, as if the call never happened.
pub struct CircuitBreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> CircuitBreakerPermit<'a> {
    pub fn success(self) {
        self.breaker.record_success();
    }

    /// Record a failure. `kind` is checked against the breaker's
    /// `excluded_error_kinds`; excluded kinds are no-ops.
    pub fn failure(self, kind: &str) {
        if self.breaker.config.excluded_error_kinds.contains(kind) {
            return;
        }
        self.breaker.record_failure();
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitCallError<E> {
    #[error(transparent)]
    Open(CircuitOpenError),
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_state_change: now,
            }),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Try to acquire a permit for a protected call.
    ///
    /// Transitions `Open -> HalfOpen` first if `reset_timeout` has
    /// elapsed, so the caller observes the post-transition state.
    pub fn acquire(&self) -> Result<CircuitBreakerPermit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure_time {
                let elapsed = (now - last_failure).to_std().unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_state_change = now;
                    tracing::info!(breaker = %self.name, "circuit half-open: probing");
                }
            }
        }

        if inner.state == CircuitState::Open {
            let retry_after_secs = inner
                .last_failure_time
                .map(|last_failure| {
                    let elapsed = (now - last_failure).num_milliseconds().max(0) as f64 / 1000.0;
                    (self.config.reset_timeout.as_secs_f64() - elapsed).max(0.0)
                })
                .unwrap_or(0.0);
            return Err(CircuitOpenError {
                name: self.name.clone(),
                retry_after_secs,
            });
        }

        drop(inner);
        Ok(CircuitBreakerPermit { breaker: self })
    }

    /// Run `f` through the breaker: acquire a permit, call, record outcome.
    ///
    /// `classify_err` maps the call's error to an excluded-kind string so
    /// callers don't need to manage a permit by hand for the common case.
    pub async fn call<F, Fut, T, E>(
        &self,
        f: F,
        classify_err: impl FnOnce(&E) -> &'static str,
    ) -> Result<T, CircuitCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().map_err(CircuitCallError::Open)?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                let kind = classify_err(&err);
                permit.failure(kind);
                Err(CircuitCallError::Inner(err))
            }
        }
    }

    fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_state_change = now;
                    tracing::info!(breaker = %self.name, "circuit closed after successful probes");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_state_change = now;
                tracing::warn!(breaker = %self.name, "circuit reopened: failure during half-open probe");
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_state_change = now;
                    tracing::warn!(
                        breaker = %self.name,
                        failure_threshold = self.config.failure_threshold,
                        "circuit opened: failure threshold reached"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Administrative reset back to `Closed` with zeroed counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        inner.last_state_change = now;
        tracing::info!(breaker = %self.name, "circuit manually reset");
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let retry_after_seconds = if inner.state == CircuitState::Open {
            inner.last_failure_time.map(|last_failure| {
                let elapsed = (now - last_failure).num_milliseconds().max(0) as f64 / 1000.0;
                (self.config.reset_timeout.as_secs_f64() - elapsed).max(0.0)
            })
        } else {
            None
        };
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            retry_after_seconds,
            last_state_change: inner.last_state_change,
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn breaker(config: CircuitBreakerConfig) -> (Arc<FixedClock>, CircuitBreaker) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let breaker = CircuitBreaker::new("external", config, clock.clone());
        (clock, breaker)
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(10)
            .with_success_threshold(3)
            .with_reset_timeout(Duration::from_secs(60));

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn test_serialization() {
        let config = CircuitBreakerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CircuitBreakerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let (_clock, cb) = breaker(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..2 {
            cb.acquire().unwrap().failure("timeout");
        }
        assert_eq!(cb.status().state, CircuitState::Closed);
        cb.acquire().unwrap().failure("timeout");
        assert_eq!(cb.status().state, CircuitState::Open);
    }

    #[test]
    fn open_rejects_calls_with_retry_after() {
        let (_clock, cb) = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        cb.acquire().unwrap().failure("timeout");
        let err = cb.acquire().unwrap_err();
        assert_eq!(err.name, "external");
        assert!(err.retry_after_secs > 0.0);
    }

    #[test]
    fn transitions_to_half_open_after_timeout_then_closes() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(2)
                .with_reset_timeout(Duration::from_secs(30)),
        );
        cb.acquire().unwrap().failure("timeout");
        assert_eq!(cb.status().state, CircuitState::Open);

        clock.advance(chrono::Duration::seconds(31));
        let permit = cb.acquire().expect("should probe after timeout");
        assert_eq!(cb.status().state, CircuitState::HalfOpen);
        permit.success();
        assert_eq!(cb.status().state, CircuitState::HalfOpen);

        cb.acquire().unwrap().success();
        assert_eq!(cb.status().state, CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 0);
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(10)),
        );
        cb.acquire().unwrap().failure("timeout");
        clock.advance(chrono::Duration::seconds(11));
        cb.acquire().unwrap().failure("timeout");
        assert_eq!(cb.status().state, CircuitState::Open);
    }

    #[test]
    fn excluded_error_kind_does_not_count_as_failure() {
        let (_clock, cb) = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_excluded_error_kind("validation"),
        );
        cb.acquire().unwrap().failure("validation");
        assert_eq!(cb.status().state, CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 0);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let (_clock, cb) = breaker(CircuitBreakerConfig::default().with_failure_threshold(5));
        cb.acquire().unwrap().failure("timeout");
        cb.acquire().unwrap().failure("timeout");
        cb.acquire().unwrap().success();
        assert_eq!(cb.status().failure_count, 0);
    }

    #[test]
    fn manual_reset_restores_closed() {
        let (_clock, cb) = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        cb.acquire().unwrap().failure("timeout");
        assert_eq!(cb.status().state, CircuitState::Open);
        cb.reset();
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }
}
