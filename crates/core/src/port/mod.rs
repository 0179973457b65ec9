// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod queue_store;
pub mod record_store;
pub mod submitter;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use queue_store::{QueueItemPatch, QueueStats, QueueStore};
pub use record_store::RecordStore;
pub use submitter::{codes, CodedError, SubmissionError, SubmissionReceipt, Submitter};
pub use time_provider::TimeProvider;
