// Immediate Submission Use Case
//
// Submit now with in-process retries; hand retryable failures to the durable queue.

use crate::application::retry::{RetryExecutor, RetryFailure, RetryOutcome, RetryPolicy};
use crate::domain::{InvoiceId, InvoiceRecord, InvoiceStatus, Priority, QueueItem, QueueItemId};
use crate::error::{AppError, Result};
use crate::port::{
    CodedError, IdProvider, QueueStore, RecordStore, SubmissionError, Submitter, TimeProvider,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Result of one `submit` call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionOutcome {
    /// Accepted by the invoicing API
    Submitted {
        transaction_id: Option<String>,
        attempts: u32,
    },
    /// Refused permanently
    Rejected {
        code: String,
        message: String,
        attempts: u32,
    },
    /// Retries exhausted in-process, handed to the durable queue
    Queued {
        queue_item_id: QueueItemId,
        scheduled_at: i64,
        attempts: u32,
    },
    /// A live queue item already owns this invoice; the API was not called
    AlreadyQueued { queue_item_id: Option<QueueItemId> },
    /// Invoice was accepted earlier; the API was not called
    AlreadySubmitted { transaction_id: Option<String> },
    /// Retryable failure with no queue budget (`max_retries == 0`)
    Escalated { code: String, attempts: u32 },
    /// Another call in this process is submitting the invoice; the API was not called
    InFlight { status: InvoiceStatus },
}

impl SubmissionOutcome {
    /// Invoice status after this outcome
    pub fn status(&self) -> InvoiceStatus {
        match self {
            SubmissionOutcome::Submitted { .. } | SubmissionOutcome::AlreadySubmitted { .. } => {
                InvoiceStatus::Submitted
            }
            SubmissionOutcome::Rejected { .. } => InvoiceStatus::Rejected,
            SubmissionOutcome::Queued { .. } | SubmissionOutcome::AlreadyQueued { .. } => {
                InvoiceStatus::Queued
            }
            SubmissionOutcome::Escalated { .. } => InvoiceStatus::ManualIntervention,
            SubmissionOutcome::InFlight { status } => *status,
        }
    }

    /// API calls made by this `submit` call
    pub fn attempts(&self) -> u32 {
        match self {
            SubmissionOutcome::Submitted { attempts, .. }
            | SubmissionOutcome::Rejected { attempts, .. }
            | SubmissionOutcome::Queued { attempts, .. }
            | SubmissionOutcome::Escalated { attempts, .. } => *attempts,
            SubmissionOutcome::AlreadyQueued { .. }
            | SubmissionOutcome::AlreadySubmitted { .. }
            | SubmissionOutcome::InFlight { .. } => 0,
        }
    }

    pub fn queue_item_id(&self) -> Option<&str> {
        match self {
            SubmissionOutcome::Queued { queue_item_id, .. } => Some(queue_item_id),
            SubmissionOutcome::AlreadyQueued { queue_item_id } => queue_item_id.as_deref(),
            _ => None,
        }
    }

    /// Wire name (`SUBMITTED`, `QUEUED`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionOutcome::Submitted { .. } => "SUBMITTED",
            SubmissionOutcome::Rejected { .. } => "REJECTED",
            SubmissionOutcome::Queued { .. } => "QUEUED",
            SubmissionOutcome::AlreadyQueued { .. } => "ALREADY_QUEUED",
            SubmissionOutcome::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
            SubmissionOutcome::Escalated { .. } => "ESCALATED",
            SubmissionOutcome::InFlight { .. } => "IN_FLIGHT",
        }
    }
}

/// Marks one invoice as being submitted by this process; dropping it clears the mark
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<InvoiceId>>,
    invoice_id: InvoiceId,
}

impl<'a> InFlightGuard<'a> {
    /// None if the invoice is already marked
    fn try_acquire(in_flight: &'a Mutex<HashSet<InvoiceId>>, invoice_id: &InvoiceId) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(invoice_id.clone());
        inserted.then(|| Self {
            in_flight,
            invoice_id: invoice_id.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.invoice_id);
    }
}

/// Invoice submission service
///
/// Front door of the pipeline. Never submits an invoice that already has a
/// live queue item: the queue owns it until it is removed.
///
/// Concurrent calls for the same invoice are serialized per process: the
/// first one submits, the others return [`SubmissionOutcome::InFlight`].
/// Across processes the API's `Idempotency-Key` (the invoice id) is what
/// keeps a duplicate call from creating a second invoice.
pub struct InvoiceSubmissionService {
    record_store: Arc<dyn RecordStore>,
    queue_store: Arc<dyn QueueStore>,
    submitter: Arc<dyn Submitter>,
    policy: Arc<RetryPolicy>,
    executor: RetryExecutor,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    in_flight: Mutex<HashSet<InvoiceId>>,
}

impl InvoiceSubmissionService {
    pub fn new(
        record_store: Arc<dyn RecordStore>,
        queue_store: Arc<dyn QueueStore>,
        submitter: Arc<dyn Submitter>,
        policy: Arc<RetryPolicy>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            record_store,
            queue_store,
            submitter,
            executor: RetryExecutor::new(policy.clone()),
            policy,
            id_provider,
            time_provider,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Submit an invoice now
    ///
    /// # Arguments
    /// * `invoice_id` - Invoice to submit
    /// * `priority` - Queue priority used if the submission has to be deferred
    ///
    /// # Errors
    /// - `AppError::NotFound` if the invoice does not exist
    /// - store faults; API failures are reported through [`SubmissionOutcome`]
    pub async fn submit(
        &self,
        invoice_id: &InvoiceId,
        priority: Priority,
    ) -> Result<SubmissionOutcome> {
        let guard = InFlightGuard::try_acquire(&self.in_flight, invoice_id);

        let invoice = self
            .record_store
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", invoice_id)))?;

        let Some(_guard) = guard else {
            info!(invoice_id = %invoice.id, "Invoice submission already in flight, skipping");
            return Ok(SubmissionOutcome::InFlight {
                status: invoice.status,
            });
        };

        if invoice.status == InvoiceStatus::Submitted {
            info!(invoice_id = %invoice.id, "Invoice already submitted, skipping");
            return Ok(SubmissionOutcome::AlreadySubmitted {
                transaction_id: invoice.transaction_id,
            });
        }

        if let Some(item) = self.queue_store.find_by_invoice_id(invoice_id).await? {
            info!(
                invoice_id = %invoice.id,
                queue_item_id = %item.id,
                "Invoice already queued, leaving it to the queue processor"
            );
            return Ok(SubmissionOutcome::AlreadyQueued {
                queue_item_id: Some(item.id),
            });
        }

        info!(invoice_id = %invoice.id, tenant_id = %invoice.tenant_id, "Submitting invoice");

        let outcome = self
            .executor
            .execute_with_retry(
                || self.submitter.submit(&invoice),
                |attempt, err: &SubmissionError| {
                    debug!(
                        invoice_id = %invoice.id,
                        retry = attempt,
                        code = %err.code(),
                        "Scheduling in-process retry"
                    );
                },
            )
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                self.record_store
                    .update_status(
                        &invoice.id,
                        InvoiceStatus::Submitted,
                        json!({
                            "transaction_id": value.transaction_id,
                            "api_status": value.status,
                            "attempts": attempts,
                            "via": "immediate",
                        }),
                    )
                    .await?;
                info!(
                    invoice_id = %invoice.id,
                    attempts = attempts,
                    transaction_id = ?value.transaction_id,
                    "Invoice submitted"
                );
                Ok(SubmissionOutcome::Submitted {
                    transaction_id: value.transaction_id,
                    attempts,
                })
            }
            RetryOutcome::Failed(failure) if !failure.class_is_retryable() => {
                self.reject(&invoice, failure).await
            }
            RetryOutcome::Failed(failure) => {
                if self.policy.config().max_retries == 0 {
                    self.escalate(&invoice, failure).await
                } else {
                    self.enqueue(&invoice, priority, &failure).await
                }
            }
        }
    }

    async fn reject(
        &self,
        invoice: &InvoiceRecord,
        failure: RetryFailure<SubmissionError>,
    ) -> Result<SubmissionOutcome> {
        warn!(
            invoice_id = %invoice.id,
            code = %failure.code(),
            error = %failure.error,
            "Invoice rejected"
        );
        self.record_store
            .update_status(
                &invoice.id,
                InvoiceStatus::Rejected,
                json!({
                    "code": failure.code(),
                    "message": failure.error.message(),
                    "attempts": failure.attempts,
                }),
            )
            .await?;
        Ok(SubmissionOutcome::Rejected {
            code: failure.code().to_string(),
            message: failure.error.message().to_string(),
            attempts: failure.attempts,
        })
    }

    async fn escalate(
        &self,
        invoice: &InvoiceRecord,
        failure: RetryFailure<SubmissionError>,
    ) -> Result<SubmissionOutcome> {
        error!(
            invoice_id = %invoice.id,
            code = %failure.code(),
            error = %failure.error,
            "Retryable failure with no retry budget, escalating to manual intervention"
        );
        self.record_store
            .update_status(
                &invoice.id,
                InvoiceStatus::ManualIntervention,
                json!({
                    "code": failure.code(),
                    "message": failure.error.message(),
                    "attempts": failure.attempts,
                    "reason": "retry budget exhausted",
                }),
            )
            .await?;
        Ok(SubmissionOutcome::Escalated {
            code: failure.code().to_string(),
            attempts: failure.attempts,
        })
    }

    /// Hand a retryable failure to the durable queue
    ///
    /// The invoice is marked QUEUED before the item exists, so a pass that
    /// picks the item up immediately can only move the status forward.
    async fn enqueue(
        &self,
        invoice: &InvoiceRecord,
        priority: Priority,
        failure: &RetryFailure<SubmissionError>,
    ) -> Result<SubmissionOutcome> {
        if let Some(existing) = self.queue_store.find_by_invoice_id(&invoice.id).await? {
            return Ok(SubmissionOutcome::AlreadyQueued {
                queue_item_id: Some(existing.id),
            });
        }

        let now = self.time_provider.now_millis();
        let scheduled_at = self.policy.next_retry_at(0);
        let mut item = QueueItem::new(
            self.id_provider.generate_id(),
            invoice.tenant_id.clone(),
            invoice.id.clone(),
            priority,
            scheduled_at,
            self.policy.config().max_retries,
            now,
        );
        item.last_error = Some(failure.error.message().to_string());
        item.last_error_code = Some(failure.code().to_string());

        self.record_store
            .update_status(
                &invoice.id,
                InvoiceStatus::Queued,
                json!({
                    "code": failure.code(),
                    "message": failure.error.message(),
                    "attempts": failure.attempts,
                    "queue_item_id": item.id,
                    "scheduled_at": scheduled_at,
                }),
            )
            .await?;

        match self.queue_store.create(&item).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => {
                // Lost the race against a concurrent enqueue of the same invoice
                let existing = self.queue_store.find_by_invoice_id(&invoice.id).await?;
                return Ok(SubmissionOutcome::AlreadyQueued {
                    queue_item_id: existing.map(|i| i.id),
                });
            }
            Err(e) => return Err(e),
        }

        info!(
            invoice_id = %invoice.id,
            queue_item_id = %item.id,
            priority = priority,
            scheduled_at = scheduled_at,
            code = %failure.code(),
            "Invoice queued for deferred submission"
        );

        Ok(SubmissionOutcome::Queued {
            queue_item_id: item.id,
            scheduled_at,
            attempts: failure.attempts,
        })
    }
}
