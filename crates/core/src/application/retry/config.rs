// Retry configuration (immutable, process-wide)

use crate::error::{AppError, Result};
use crate::port::codes;
use std::collections::HashSet;
use std::time::Duration;

/// Default retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default first backoff delay (1s)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default backoff cap (60s)
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

/// Default backoff growth factor
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Retry configuration
///
/// Built once at startup and shared read-only. Use [`RetryConfig::validate`]
/// (called by `RetryPolicy::new`) before use.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_codes: HashSet<String>,
    pub permanent_codes: HashSet<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retryable_codes: [
                codes::TIMEOUT,
                codes::CONNECTION_ERROR,
                codes::RATE_LIMIT,
                codes::SERVICE_UNAVAILABLE,
                codes::TEMPORARY_ERROR,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            permanent_codes: [
                codes::INVALID_TAX_ID,
                codes::INVALID_INVOICE,
                codes::DUPLICATE_INVOICE,
                codes::AUTH_ERROR,
                codes::VALIDATION_ERROR,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Add a code to the retryable set
    pub fn with_retryable_code(mut self, code: impl Into<String>) -> Self {
        self.retryable_codes.insert(code.into());
        self
    }

    /// Add a code to the permanent set
    pub fn with_permanent_code(mut self, code: impl Into<String>) -> Self {
        self.permanent_codes.insert(code.into());
        self
    }

    /// Check the configuration invariants
    ///
    /// - backoff_multiplier is finite and > 1
    /// - base_delay <= max_delay
    /// - retryable_codes and permanent_codes are disjoint
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(AppError::Config(format!(
                "backoff_multiplier must be > 1 (got {})",
                self.backoff_multiplier
            )));
        }

        if self.base_delay > self.max_delay {
            return Err(AppError::Config(format!(
                "base_delay ({}ms) exceeds max_delay ({}ms)",
                self.base_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }

        let mut overlap: Vec<&str> = self
            .retryable_codes
            .intersection(&self.permanent_codes)
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            overlap.sort_unstable();
            return Err(AppError::Config(format!(
                "codes classified as both retryable and permanent: {}",
                overlap.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlapping_code_sets_are_rejected() {
        let config = RetryConfig::default().with_permanent_code(codes::TIMEOUT);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TIMEOUT"));
    }

    #[test]
    fn test_multiplier_must_grow() {
        assert!(RetryConfig::default()
            .with_backoff_multiplier(1.0)
            .validate()
            .is_err());
        assert!(RetryConfig::default()
            .with_backoff_multiplier(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_base_delay_above_cap_is_rejected() {
        let config = RetryConfig::default()
            .with_delays(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }
}
