// Retry executor: bounded retry-with-backoff around one async operation
use crate::application::retry::{ErrorClass, RetryPolicy};
use crate::port::CodedError;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Ephemeral state of one in-flight operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Zero-based index of the current attempt
    pub attempt: u32,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
}

/// Terminal failure of `execute_with_retry`
///
/// Once returned, the executor never asks the caller to keep retrying
/// in-process; `class` tells the caller whether handing the work to the
/// durable queue makes sense.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub class: ErrorClass,
    /// Total invocations of the operation
    pub attempts: u32,
    /// True when the retry budget ran out on a retryable failure
    pub exhausted: bool,
    pub state: RetryState,
}

impl<E: CodedError> RetryFailure<E> {
    pub fn code(&self) -> &str {
        self.error.code()
    }

    /// Classification of the last error, regardless of the remaining budget
    pub fn class_is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }

    /// Whether another attempt could still succeed in-process.
    /// False once the budget is exhausted, even for a retryable class.
    pub fn should_retry(&self) -> bool {
        !self.exhausted && self.class_is_retryable()
    }
}

/// Result of `execute_with_retry`
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Failed(RetryFailure<E>),
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    /// Total invocations of the operation
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } => *attempts,
            RetryOutcome::Failed(failure) => failure.attempts,
        }
    }
}

/// Runs an operation until it succeeds, fails permanently, or spends
/// `max_retries` retries (so at most `max_retries + 1` invocations)
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
}

impl RetryExecutor {
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self { policy }
    }

    /// Execute without a retry hook
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CodedError,
    {
        self.execute_with_retry(operation, |_, _| {}).await
    }

    /// Execute `operation` with bounded retry-with-backoff
    ///
    /// `on_retry(next_attempt, &error)` runs before each backoff sleep, with
    /// `next_attempt` being the 1-based retry number.
    ///
    /// Guarantees:
    /// - first failure Permanent: exactly 1 invocation
    /// - every failure Retryable: exactly `max_retries + 1` invocations
    ///
    /// The backoff sleep only suspends the calling task.
    pub async fn execute_with_retry<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CodedError,
        R: FnMut(u32, &E),
    {
        let max_retries = self.policy.config().max_retries;
        let mut state = RetryState::default();

        loop {
            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: state.attempt + 1,
                    };
                }
                Err(error) => error,
            };

            let class = self.policy.classify(error.code());
            state.last_error = Some(error.to_string());
            state.last_error_code = Some(error.code().to_string());
            state.next_retry_at = None;

            if class == ErrorClass::Permanent {
                warn!(
                    attempt = state.attempt,
                    code = %error.code(),
                    error = %error,
                    "Permanent failure, not retrying"
                );
                return RetryOutcome::Failed(RetryFailure {
                    error,
                    class,
                    attempts: state.attempt + 1,
                    exhausted: false,
                    state,
                });
            }

            if state.attempt >= max_retries {
                error!(
                    attempts = state.attempt + 1,
                    max_retries = max_retries,
                    code = %error.code(),
                    error = %error,
                    "Retry budget exhausted"
                );
                return RetryOutcome::Failed(RetryFailure {
                    error,
                    class,
                    attempts: state.attempt + 1,
                    exhausted: true,
                    state,
                });
            }

            let delay = self.policy.calculate_delay(state.attempt);
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            state.next_retry_at = Some(self.policy.now_millis().saturating_add(delay_ms));

            on_retry(state.attempt + 1, &error);

            info!(
                attempt = state.attempt,
                code = %error.code(),
                delay_ms = delay_ms,
                "Transient failure, retrying after backoff"
            );

            sleep(delay).await;
            state.attempt += 1;
        }
    }
}
