//! Reconnect backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted growth factor
pub const MAX_MULTIPLIER: f64 = 10.0;

/// Exponential backoff schedule for reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound on any delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between attempts, at most [`MAX_MULTIPLIER`]
    pub multiplier: f64,
    /// Give up after this many attempts; `None` retries until cancelled
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Start a fresh schedule
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            next: self.initial_delay,
        }
    }
}

/// Iterator over the delays of one reconnect run
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    next: Duration,
}

impl Backoff {
    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }
        self.attempt += 1;
        let delay = self.next.min(self.policy.max_delay);
        let factor = self.policy.multiplier;
        if factor.is_finite() && factor > 1.0 {
            // Overflow saturates at the cap.
            self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * factor)
                .map_or(self.policy.max_delay, |d| d.min(self.policy.max_delay));
        }
        Some(delay)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
