// Submitter Port
// Abstraction over the external invoicing API client

use crate::domain::InvoiceRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes produced at the Submitter boundary
pub mod codes {
    // Transport signals
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CONNECTION_ERROR: &str = "CONNECTION_ERROR";
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const TEMPORARY_ERROR: &str = "TEMPORARY_ERROR";

    // Structured API refusals
    pub const INVALID_TAX_ID: &str = "INVALID_TAX_ID";
    pub const INVALID_INVOICE: &str = "INVALID_INVOICE";
    pub const DUPLICATE_INVOICE: &str = "DUPLICATE_INVOICE";
    pub const AUTH_ERROR: &str = "AUTH_ERROR";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
}

/// An error that carries a classification code
///
/// RetryPolicy classifies by code only and never inspects the error's shape.
pub trait CodedError: std::fmt::Display {
    fn code(&self) -> &str;
}

/// Accepted submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub transaction_id: Option<String>,
    /// Status string reported by the invoicing API
    pub status: Option<String>,
}

/// Failed submission, tagged at the boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The API answered with a structured error code
    #[error("Rejected [{code}]: {message}")]
    Rejected { code: String, message: String },

    #[error("Unknown submission failure: {0}")]
    Unknown(String),
}

impl SubmissionError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        SubmissionError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Human-readable message without the code prefix
    pub fn message(&self) -> &str {
        match self {
            SubmissionError::Timeout(msg)
            | SubmissionError::Connection(msg)
            | SubmissionError::RateLimited(msg)
            | SubmissionError::ServiceUnavailable(msg)
            | SubmissionError::Unknown(msg) => msg,
            SubmissionError::Rejected { message, .. } => message,
        }
    }
}

impl CodedError for SubmissionError {
    fn code(&self) -> &str {
        match self {
            SubmissionError::Timeout(_) => codes::TIMEOUT,
            SubmissionError::Connection(_) => codes::CONNECTION_ERROR,
            SubmissionError::RateLimited(_) => codes::RATE_LIMIT,
            SubmissionError::ServiceUnavailable(_) => codes::SERVICE_UNAVAILABLE,
            SubmissionError::Rejected { code, .. } => code,
            SubmissionError::Unknown(_) => codes::UNKNOWN_ERROR,
        }
    }
}

/// Invoicing API client
///
/// Implementations:
/// - HttpSubmitter (infra-http): JSON over HTTPS
/// - mocks::MockSubmitter: scripted results for tests
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit one invoice, synchronously from the caller's point of view
    ///
    /// # Errors
    /// Every failure must be a [`SubmissionError`] so it can be classified.
    async fn submit(&self, invoice: &InvoiceRecord) -> Result<SubmissionReceipt, SubmissionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Scripted submitter
    ///
    /// Pops one scripted result per call; once the script is empty, every call
    /// returns the fallback.
    pub struct MockSubmitter {
        script: Arc<Mutex<VecDeque<Result<SubmissionReceipt, SubmissionError>>>>,
        fallback: Result<SubmissionReceipt, SubmissionError>,
        delay: Option<Duration>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockSubmitter {
        pub fn new(fallback: Result<SubmissionReceipt, SubmissionError>) -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback,
                delay: None,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(Ok(SubmissionReceipt {
                transaction_id: Some("tx-mock".to_string()),
                status: Some("ACCEPTED".to_string()),
            }))
        }

        pub fn new_fail(error: SubmissionError) -> Self {
            Self::new(Err(error))
        }

        /// Results returned (in order) before falling back
        pub fn with_script(
            self,
            results: impl IntoIterator<Item = Result<SubmissionReceipt, SubmissionError>>,
        ) -> Self {
            self.script.lock().unwrap().extend(results);
            self
        }

        /// Simulate a slow API
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Invoice IDs in submission order
        pub fn submitted_invoices(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Submitter for MockSubmitter {
        async fn submit(
            &self,
            invoice: &InvoiceRecord,
        ) -> Result<SubmissionReceipt, SubmissionError> {
            self.calls.lock().unwrap().push(invoice.id.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.fallback.clone())
        }
    }
}
