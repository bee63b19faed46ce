//! Process-wide lookup of circuit breakers by name
//!
//! Handlers acquire breakers by name rather than holding their own
//! references, so the admin surface (`GET /circuit-breakers`,
//! `POST /circuit-breakers/{name}/reset`) can reach every breaker a
//! handler created without each handler exposing its internals.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::reliability::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus};

/// Registry of named circuit breakers shared across a process.
///
/// Breakers are created lazily on first lookup via
/// [`CircuitBreakerRegistry::get_or_create`] and then reused; there is no
/// way to remove one, mirroring the lifetime of a handler registration.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Fetch the breaker registered under `name`, creating it with
    /// `config` if this is the first call for that name. Later calls
    /// with a different `config` do not reconfigure an existing breaker.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config, self.clock.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Status of every registered breaker, for the admin surface.
    pub fn all_status(&self) -> Vec<CircuitBreakerStatus> {
        self.breakers.read().values().map(|b| b.status()).collect()
    }

    /// Reset a named breaker. Returns `false` if no breaker with that
    /// name has ever been created.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.read().get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
