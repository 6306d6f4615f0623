//! Retry policy with jittered exponential backoff.

use super::errors::QueryError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy applied by the request executor.
///
/// The delay before retry `n` (1-based) is `base_delay_ms * 2^n`, capped at `max_delay_ms`,
/// then spread by `jitter_factor` around the capped value to avoid synchronized retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3, 0 disables retrying)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds (default: 100)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default: 2000)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor in `[0.0, 1.0]` (default: 0.25)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Also treat HTTP 5xx and 429 as transient (default: false)
    #[serde(default = "default_retry_http_5xx")]
    pub retry_http_5xx: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_jitter_factor() -> f64 {
    0.25
}

fn default_retry_http_5xx() -> bool {
    false
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            retry_http_5xx: default_retry_http_5xx(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries. Used for mutations unless an endpoint opts in.
    #[must_use]
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Returns `true` if `error` seen on zero-based `attempt` deserves another attempt.
    #[must_use]
    pub fn should_retry(&self, error: &QueryError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient(self.retry_http_5xx)
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_delay = self.base_delay_ms.saturating_mul(1u64 << retry.min(10));
        let capped_delay = base_delay.min(self.max_delay_ms);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let jitter_range = (capped_delay as f64 * self.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter_offset =
            if jitter_range > 0 { rand::rng().random_range(0..jitter_range) } else { 0 };

        Duration::from_millis(capped_delay.saturating_sub(jitter_range / 2) + jitter_offset)
    }

    /// Checks internal consistency of the policy.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!("retry.jitter_factor must be within [0, 1], got {}", self.jitter_factor));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        Ok(())
    }
}
