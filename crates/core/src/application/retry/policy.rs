// Retry policy: backoff delays and error classification
use crate::application::retry::RetryConfig;
use crate::error::Result;
use crate::port::TimeProvider;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Jitter band applied around the capped delay (±10%)
const JITTER_RATIO: f64 = 0.1;

/// Classification of a failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve on its own; retry with backoff
    Retryable,
    /// Will fail identically again; surface immediately
    Permanent,
}

/// Retry policy
///
/// Pure decisions shared by the in-process executor and the queue processor:
/// - how long to wait before attempt N+1
/// - whether a failure code is worth another attempt
pub struct RetryPolicy {
    config: RetryConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `config` - Retry configuration (validated here)
    /// * `time_provider` - Time provider for `next_retry_at`
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(RetryConfig::default(), Arc::new(SystemTimeProvider))?;
    /// ```
    pub fn new(config: RetryConfig, time_provider: Arc<dyn TimeProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            time_provider,
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Un-jittered delay before the attempt following `attempt`
    ///
    /// `min(base_delay * multiplier^attempt, max_delay)`, non-decreasing in `attempt`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.config.max_delay.as_secs_f64() * 1000.0;
        if base_ms == 0.0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        // powi overflows to +inf for large attempts, which lands on the cap
        let raw_ms = base_ms * self.config.backoff_multiplier.powi(exponent);
        if raw_ms >= max_ms {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(raw_ms / 1000.0)
    }

    /// Backoff delay with ±10% jitter
    ///
    /// Jitter spreads retries of invoices that failed together (e.g. during an
    /// API outage) so they do not hit the API again in lockstep.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped_ms = self.base_delay_for(attempt).as_secs_f64() * 1000.0;
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        let delay_ms = (capped_ms * jitter_factor).max(0.0);

        debug!(
            attempt = attempt,
            capped_ms = capped_ms,
            delay_ms = delay_ms,
            "Calculated backoff delay"
        );

        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Epoch ms at which attempt `attempt` becomes due
    pub fn next_retry_at(&self, attempt: u32) -> i64 {
        let delay_ms = i64::try_from(self.calculate_delay(attempt).as_millis()).unwrap_or(i64::MAX);
        self.time_provider.now_millis().saturating_add(delay_ms)
    }

    /// Classify a failure code
    ///
    /// Unknown codes are Permanent (fail-closed): an unanticipated failure
    /// must not be retried indefinitely.
    pub fn classify(&self, code: &str) -> ErrorClass {
        if self.config.permanent_codes.contains(code) {
            ErrorClass::Permanent
        } else if self.config.retryable_codes.contains(code) {
            ErrorClass::Retryable
        } else {
            ErrorClass::Permanent
        }
    }
}
