// Domain Layer - Queue items, invoice records and their state rules

pub mod error;
pub mod invoice;
pub mod queue_item;

// Re-exports
pub use error::DomainError;
pub use invoice::{InvoiceId, InvoiceRecord, InvoiceStatus, TenantId};
pub use queue_item::{Priority, QueueItem, QueueItemId, QueueItemState, QueueOutcome};
