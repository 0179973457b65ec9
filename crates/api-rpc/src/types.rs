//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};

/// invoice.submit.v1 - Submit an invoice now
#[derive(Debug, Deserialize)]
pub struct SubmitInvoiceRequest {
    pub invoice_id: String,
    /// Queue priority if the submission has to be deferred
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitInvoiceResponse {
    pub invoice_id: String,
    /// SUBMITTED, REJECTED, QUEUED, ALREADY_QUEUED, ALREADY_SUBMITTED, ESCALATED, IN_FLIGHT
    pub outcome: String,
    /// Invoice status after the call
    pub status: String,
    /// API calls made by this request
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// queue.process.v1 - Run a queue pass now
#[derive(Debug, Default, Deserialize)]
pub struct ProcessQueueRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessQueueResponse {
    /// False when a pass was already running (the trigger was a no-op)
    pub ran: bool,
    pub claimed: usize,
    pub succeeded: usize,
    pub rearmed: usize,
    pub failed: usize,
    pub orphaned: usize,
    pub settled: usize,
    pub skipped: usize,
}

/// queue.stats.v1 - Queue statistics
#[derive(Debug, Default, Deserialize)]
pub struct QueueStatsRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub next_scheduled_at: Option<i64>,
    pub uptime_seconds: i64,
}
