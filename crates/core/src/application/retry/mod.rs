// Retry logic: backoff, error classification and bounded re-execution

pub mod config;
pub mod executor;
pub mod policy;

// Re-exports
pub use config::RetryConfig;
pub use executor::{RetryExecutor, RetryFailure, RetryOutcome, RetryState};
pub use policy::{ErrorClass, RetryPolicy};
