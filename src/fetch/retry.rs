//! Retry eligibility and backoff computation

use crate::config::{BackoffMode, EngineSettings};
use crate::fetch::result::FetchError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Immutable retry configuration for one engine
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub mode: BackoffMode,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub retry_statuses: BTreeSet<u16>,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            mode: BackoffMode::None,
            base_delay: Duration::ZERO,
            max_delay: None,
            retry_statuses: BTreeSet::new(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            mode: settings.backoff,
            base_delay: Duration::from_millis(settings.backoff_base_ms),
            max_delay: settings.backoff_max_ms.map(Duration::from_millis),
            retry_statuses: settings.retry_statuses.iter().copied().collect(),
        }
    }

    /// Total attempts allowed, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    pub fn should_retry_error(&self, error: &FetchError) -> bool {
        error.retryable
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay before the attempt following attempt number `attempt` (1-based)
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let delay = match self.mode {
            BackoffMode::None => Duration::ZERO,
            BackoffMode::Fixed => self.base_delay,
            BackoffMode::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(Duration::MAX)
            }
        };

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}
