// Application Layer - Use Cases and Business Logic

pub mod processor;
pub mod recovery;
pub mod retry;
pub mod submission;

// Re-exports
pub use processor::{shutdown_channel, PassReport, QueueProcessor, ShutdownSender, ShutdownToken};
pub use recovery::ClaimRecoveryService;
pub use retry::{
    ErrorClass, RetryConfig, RetryExecutor, RetryFailure, RetryOutcome, RetryPolicy, RetryState,
};
pub use submission::{InvoiceSubmissionService, SubmissionOutcome};
