//! Fixed-delay retry policy.
//!
//! Each subscriber gets a small, bounded number of attempts per event with
//! a constant pause between them. Attempts for one subscriber are strictly
//! sequential so a struggling endpoint is never hammered.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy for subscriber deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including the first).
    pub max_attempts: u32,

    /// Constant delay between consecutive attempts.
    pub delay: Duration,

    /// Whether 4xx responses are retried like 5xx responses.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(2), retry_client_errors: true }
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make another attempt after waiting `delay`.
    Retry {
        /// Pause before the next attempt
        delay: Duration,
    },
    /// Abandon the delivery for this event.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy with the given attempt cap and fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay, ..Self::default() }
    }

    /// Returns whether another attempt may follow attempt `attempt_number`.
    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }

    /// Returns the pause before attempt `attempt_number` (1-based).
    ///
    /// The first attempt goes out immediately.
    pub fn delay_before(&self, attempt_number: u32) -> Duration {
        if attempt_number <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Decides what happens after attempt `attempt_number` failed with `error`.
    pub fn decide(&self, attempt_number: u32, error: &DeliveryError) -> RetryDecision {
        if !self.should_retry(attempt_number) {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        let retryable = match error {
            DeliveryError::ClientError { .. } => self.retry_client_errors,
            other => other.is_retryable(),
        };

        if !retryable {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        RetryDecision::Retry { delay: self.delay_before(attempt_number + 1) }
    }
}
