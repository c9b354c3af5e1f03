//! Typed options for the feedback sink and edit retries.

use std::time::Duration;

use log::Level;

use crate::error::ConfigError;

/// Options of a [`crate::feedback::Reporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackConfig {
    /// Number of messages buffered before they are written out.
    pub buffer_capacity: usize,
    /// A `RowProcessed` event is reported every this many rows.
    pub progress_interval: u64,
    /// Least severe level that is reported.
    pub min_level: Level,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            progress_interval: 1000,
            min_level: Level::Info,
        }
    }
}

impl FeedbackConfig {
    /// Checks the option values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for a zero buffer capacity or
    /// progress interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidOption {
                option: "buffer_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidOption {
                option: "progress_interval".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// How often and how patiently to retry beginning a contended edit.
///
/// Only [`crate::error::EditError::WorkspaceLockConflict`] is retried; every
/// other failure is returned at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the wait after each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never waits.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Checks the option values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for zero attempts or a
    /// multiplier below 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidOption {
                option: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidOption {
                option: "multiplier".to_string(),
                message: format!("must be a finite number >= 1, got {}", self.multiplier),
            });
        }
        Ok(())
    }

    /// Wait before attempt `attempt` (1-based; the first attempt never waits).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        self.initial_backoff
            .mul_f64(self.multiplier.powi(exponent).min(1e6))
    }
}
