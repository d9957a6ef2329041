//! Retry policy for page fetches.
//!
//! Two policies exist. `Unbounded` reproduces the long-standing behaviour of
//! the bot: a failed page is logged and the identical request is issued
//! again straight away, forever, until it succeeds or the run is cancelled.
//! `Bounded` waits with exponential backoff and jitter between attempts and
//! gives up after `max_attempts` failures or on an error that cannot succeed
//! by retrying (bad key, forbidden).

use crate::{CoreError, ErrorExt};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of failed attempts per page, 0 retries forever
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::tumblr()
    }
}

impl RetryConfig {
    pub fn tumblr() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        if self.max_attempts == 0 {
            RetryPolicy::Unbounded
        } else {
            RetryPolicy::Bounded(self.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Retry the same request immediately, without limit
    Unbounded,
    /// Back off between attempts and stop after `max_attempts` failures
    Bounded(RetryConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryNow,
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do after `failures` consecutive failures of one page.
    pub fn decide(&self, failures: u32, error: &CoreError) -> RetryDecision {
        match self {
            RetryPolicy::Unbounded => RetryDecision::RetryNow,
            RetryPolicy::Bounded(config) => {
                if !error.is_retryable() || failures >= config.max_attempts {
                    return RetryDecision::GiveUp;
                }

                let max_delay = Duration::from_millis(config.max_delay_ms);
                let delay = match error.retry_after() {
                    Some(hint) => hint.min(max_delay),
                    None => calculate_delay(failures.saturating_sub(1), config),
                };
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        Duration::from_millis(config.base_delay_ms)
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    // Add jitter to prevent thundering herd
    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}
