// Dispatch Infrastructure - HTTP Adapter
// Implements: Submitter (invoicing API over JSON/HTTPS)

mod mapping;
mod submitter;

pub use submitter::{HttpSubmitter, HttpSubmitterConfig};
