// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid queue item state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Retry budget exhausted for queue item {id}: {attempts}/{max_attempts}")]
    AttemptsExhausted {
        id: String,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("Unknown invoice status: {0}")]
    UnknownStatus(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
