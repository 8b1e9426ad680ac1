//! Retry budget and backoff schedule for agent calls.
//!
//! ```rust,ignore
//! use saloon_coordination::negotiation::{BackoffSchedule, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, BackoffSchedule::fixed(vec![250, 1000]));
//! assert_eq!(policy.backoff_ms(1), 250);
//! assert_eq!(policy.backoff_ms(3), 1000);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between retries of a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSchedule {
    /// `initial_ms * multiplier^(retry - 1)`, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
    /// Explicit delays; the last entry repeats once the list runs out.
    Fixed { delays_ms: Vec<u64> },
}

impl BackoffSchedule {
    pub fn fixed(delays_ms: Vec<u64>) -> Self {
        Self::Fixed { delays_ms }
    }
}

impl Default for BackoffSchedule {
    /// 500ms initial, 2x multiplier, 5s max.
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 500,
            multiplier: 2.0,
            max_ms: 5_000,
        }
    }
}

/// How many times a transient failure is retried and how long to wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first call (0 = single attempt).
    pub max_provider_retries: u32,
    #[serde(default)]
    pub backoff: BackoffSchedule,
}

impl RetryPolicy {
    pub fn new(max_provider_retries: u32, backoff: BackoffSchedule) -> Self {
        Self {
            max_provider_retries,
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, BackoffSchedule::fixed(Vec::new()))
    }

    /// Delay before retry number `retry` (1-indexed). Retry 0 is the first call.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        if retry == 0 {
            return 0;
        }
        match &self.backoff {
            BackoffSchedule::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let delay = *initial_ms as f64 * multiplier.powi(retry as i32 - 1);
                (delay as u64).min(*max_ms)
            }
            BackoffSchedule::Fixed { delays_ms } => {
                let idx = (retry as usize - 1).min(delays_ms.len().saturating_sub(1));
                delays_ms.get(idx).copied().unwrap_or(0)
            }
        }
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_provider_retries
    }

    /// Delay before `retry`, stretched to the provider's `retry_after` hint when
    /// that is longer.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let scheduled = Duration::from_millis(self.backoff_ms(retry));
        match retry_after {
            Some(hint) if hint > scheduled => hint,
            _ => scheduled,
        }
    }

    /// Total attempts a call can make (first call plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_provider_retries + 1
    }
}

impl Default for RetryPolicy {
    /// 3 retries on the default exponential schedule.
    fn default() -> Self {
        Self::new(3, BackoffSchedule::default())
    }
}
