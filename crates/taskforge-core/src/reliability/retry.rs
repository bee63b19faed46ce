//! Retry policy: exponential backoff for transient handler failures
//!
//! Deliberately no jitter. A single worker has no peer fleet to stagger
//! against, so jittering the delay would only make tests harder to
//! assert on without buying anything.
//!
//! # Example
//!
//! ```
//! use taskforge_core::reliability::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(300));
//!
//! // First retry after 10s, second after 20s, third after 40s, capped at 300s.
//! assert_eq!(policy.delay_for_retry(1), Duration::from_secs(10));
//! assert_eq!(policy.delay_for_retry(2), Duration::from_secs(20));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff policy with a floor and a cap, no jitter.
///
/// `delay_for_retry(k)` gives the delay before the k-th retry:
/// `min(max_delay, base_delay * 2^(k-1))`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    /// Delay before the `retry_count`-th retry (1-based: the first retry
    /// is `retry_count == 1`).
    pub fn delay_for_retry(&self, retry_count: i32) -> Duration {
        let retry_count = retry_count.max(1);
        let base = self.base_delay.as_secs_f64() * 2f64.powi(retry_count - 1);
        let capped = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
