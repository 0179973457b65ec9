//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    ProcessQueueRequest, ProcessQueueResponse, QueueStatsRequest, QueueStatsResponse,
    SubmitInvoiceRequest, SubmitInvoiceResponse,
};
use dispatch_core::application::{InvoiceSubmissionService, QueueProcessor, SubmissionOutcome};
use dispatch_core::error::AppError;
use dispatch_core::port::QueueStore;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Upper bound for an invoice id accepted over RPC
const MAX_INVOICE_ID_LEN: usize = 128;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    submission: Arc<InvoiceSubmissionService>,
    processor: Arc<QueueProcessor>,
    queue_store: Arc<dyn QueueStore>,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        submission: Arc<InvoiceSubmissionService>,
        processor: Arc<QueueProcessor>,
        queue_store: Arc<dyn QueueStore>,
    ) -> Self {
        Self {
            submission,
            processor,
            queue_store,
            start_time: Instant::now(),
        }
    }

    /// invoice.submit.v1
    pub async fn submit_invoice(
        &self,
        params: SubmitInvoiceRequest,
    ) -> Result<SubmitInvoiceResponse, ErrorObjectOwned> {
        let invoice_id = params.invoice_id.trim().to_string();
        if invoice_id.is_empty() || invoice_id.len() > MAX_INVOICE_ID_LEN {
            return Err(to_rpc_error(AppError::Validation(format!(
                "invoice_id must be 1..={} characters",
                MAX_INVOICE_ID_LEN
            ))));
        }

        let outcome = self
            .submission
            .submit(&invoice_id, params.priority)
            .await
            .map_err(to_rpc_error)?;

        let (transaction_id, error_code) = match &outcome {
            SubmissionOutcome::Submitted { transaction_id, .. }
            | SubmissionOutcome::AlreadySubmitted { transaction_id } => {
                (transaction_id.clone(), None)
            }
            SubmissionOutcome::Rejected { code, .. } | SubmissionOutcome::Escalated { code, .. } => {
                (None, Some(code.clone()))
            }
            SubmissionOutcome::Queued { .. }
            | SubmissionOutcome::AlreadyQueued { .. }
            | SubmissionOutcome::InFlight { .. } => (None, None),
        };

        Ok(SubmitInvoiceResponse {
            invoice_id,
            outcome: outcome.name().to_string(),
            status: outcome.status().to_string(),
            attempts: outcome.attempts(),
            queue_item_id: outcome.queue_item_id().map(str::to_string),
            transaction_id,
            error_code,
        })
    }

    /// queue.process.v1
    pub async fn process_queue(
        &self,
        _params: ProcessQueueRequest,
    ) -> Result<ProcessQueueResponse, ErrorObjectOwned> {
        let report = self.processor.process_now().await.map_err(to_rpc_error)?;

        let Some(report) = report else {
            info!("Manual queue pass skipped: a pass is already running");
            return Ok(ProcessQueueResponse::default());
        };

        Ok(ProcessQueueResponse {
            ran: true,
            claimed: report.claimed,
            succeeded: report.succeeded,
            rearmed: report.rearmed,
            failed: report.failed,
            orphaned: report.orphaned,
            settled: report.settled,
            skipped: report.skipped,
        })
    }

    /// queue.stats.v1
    pub async fn queue_stats(
        &self,
        params: QueueStatsRequest,
    ) -> Result<QueueStatsResponse, ErrorObjectOwned> {
        let tenant_id = params.tenant_id.filter(|t| !t.is_empty());
        let stats = self
            .queue_store
            .get_stats(tenant_id.as_deref())
            .await
            .map_err(to_rpc_error)?;

        Ok(QueueStatsResponse {
            tenant_id,
            total: stats.total,
            pending: stats.pending,
            processing: stats.processing,
            succeeded: stats.succeeded,
            failed: stats.failed,
            next_scheduled_at: stats.next_scheduled_at,
            uptime_seconds: i64::try_from(self.start_time.elapsed().as_secs()).unwrap_or(i64::MAX),
        })
    }
}
