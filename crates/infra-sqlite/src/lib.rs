// Dispatch Infrastructure - SQLite Adapter
// Implements: QueueStore (atomic claim), RecordStore

mod connection;
mod error;
mod migration;
mod queue_store;
mod record_store;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use queue_store::SqliteQueueStore;
pub use record_store::SqliteRecordStore;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
