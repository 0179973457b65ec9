// Queue Processor - periodic, single-flight drain of due submission retries

pub mod constants;
mod guard;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::retry::{ErrorClass, RetryPolicy};
use crate::domain::{InvoiceRecord, InvoiceStatus, QueueItem, QueueOutcome};
use crate::error::Result;
use crate::port::{
    CodedError, QueueItemPatch, QueueStore, RecordStore, SubmissionError, Submitter,
    TimeProvider,
};
use constants::DEFAULT_BATCH_SIZE;
use guard::PassGuard;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Due items returned by the store
    pub fetched: usize,
    /// Items this pass won the claim for
    pub claimed: usize,
    pub succeeded: usize,
    pub rearmed: usize,
    /// Removed-Terminal (budget exhausted or permanent rejection)
    pub failed: usize,
    /// Invoice missing, item deleted
    pub orphaned: usize,
    /// Invoice already settled, item deleted without resubmitting
    pub settled: usize,
    /// Claim lost to another instance
    pub skipped: usize,
}

/// What happened to one item
enum ItemResult {
    Succeeded,
    Rearmed,
    Failed,
    Orphaned,
    Settled,
    Skipped,
}

/// Queue processor
///
/// Drains due queue items one at a time (no intra-pass fan-out, to bound the
/// load on the invoicing API). At most one pass runs per process; an
/// overlapping trigger is skipped, not queued.
pub struct QueueProcessor {
    queue_store: Arc<dyn QueueStore>,
    record_store: Arc<dyn RecordStore>,
    submitter: Arc<dyn Submitter>,
    policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    batch_size: usize,
    running: AtomicBool,
}

impl QueueProcessor {
    pub fn new(
        queue_store: Arc<dyn QueueStore>,
        record_store: Arc<dyn RecordStore>,
        submitter: Arc<dyn Submitter>,
        policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            queue_store,
            record_store,
            submitter,
            policy,
            time_provider,
            batch_size: DEFAULT_BATCH_SIZE,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// True while a pass holds the single-flight flag
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ticker loop with graceful shutdown support
    ///
    /// The first pass runs immediately. Shutdown is observed between passes;
    /// an in-flight submission is never cancelled.
    pub async fn run(&self, every: Duration, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = every.as_secs(),
            batch_size = self.batch_size,
            "Queue processor started"
        );

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => {
                    info!("Queue processor interrupted while idle");
                    break;
                }
            }
            if shutdown.is_shutdown() {
                break;
            }

            match self.tick().await {
                Ok(Some(report)) if report.fetched > 0 => {
                    info!(
                        claimed = report.claimed,
                        succeeded = report.succeeded,
                        rearmed = report.rearmed,
                        failed = report.failed,
                        orphaned = report.orphaned,
                        "Queue pass completed"
                    );
                }
                Ok(Some(_)) => debug!("Queue pass found no due items"),
                Ok(None) => debug!("Queue pass skipped: previous pass still running"),
                Err(_) => {} // logged by tick()
            }
        }

        info!("Queue processor stopped");
    }

    /// Manual "process now" trigger (same single-flight guard as the ticker)
    pub async fn process_now(&self) -> Result<Option<PassReport>> {
        info!("Manual queue pass requested");
        self.tick().await
    }

    /// Run one pass
    ///
    /// # Returns
    /// - `Ok(None)` if another pass is running (no-op)
    /// - `Ok(Some(report))` when the pass ran
    ///
    /// # Errors
    /// Only store/IO faults; submission failures are applied to the items.
    pub async fn tick(&self) -> Result<Option<PassReport>> {
        let Some(_guard) = PassGuard::try_acquire(&self.running) else {
            debug!("Queue pass already running, skipping trigger");
            return Ok(None);
        };

        match self.drain_batch().await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                error!(error = %e, "Queue pass aborted by store failure");
                Err(e)
            }
        }
    }

    async fn drain_batch(&self) -> Result<PassReport> {
        let now = self.time_provider.now_millis();
        let items = self.queue_store.find_due_items(now, self.batch_size).await?;

        let mut report = PassReport {
            fetched: items.len(),
            ..Default::default()
        };

        // One submission in flight at a time
        for item in items {
            match self.process_item(item).await? {
                ItemResult::Succeeded => report.succeeded += 1,
                ItemResult::Rearmed => report.rearmed += 1,
                ItemResult::Failed => report.failed += 1,
                ItemResult::Orphaned => report.orphaned += 1,
                ItemResult::Settled => report.settled += 1,
                ItemResult::Skipped => {
                    report.skipped += 1;
                    continue;
                }
            }
            report.claimed += 1;
        }

        Ok(report)
    }

    async fn process_item(&self, mut item: QueueItem) -> Result<ItemResult> {
        let now = self.time_provider.now_millis();

        if !self.queue_store.claim(&item.id, now).await? {
            debug!(queue_item_id = %item.id, "Claim lost, item handled elsewhere");
            return Ok(ItemResult::Skipped);
        }
        item.claim(now)?;

        match self.process_claimed(&mut item).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Best effort: hand the item back so the next pass can retry it
                if let Err(release_err) = self
                    .queue_store
                    .update(&item.id, &QueueItemPatch::released())
                    .await
                {
                    warn!(
                        queue_item_id = %item.id,
                        error = %release_err,
                        "Failed to release claim, stale-claim recovery will reclaim it"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process_claimed(&self, item: &mut QueueItem) -> Result<ItemResult> {
        let invoice = match self.record_store.find_by_id(&item.invoice_id).await? {
            Some(invoice) => invoice,
            None => {
                warn!(
                    queue_item_id = %item.id,
                    invoice_id = %item.invoice_id,
                    "Invoice not found, removing orphaned queue item"
                );
                self.remove(item, QueueOutcome::Orphaned).await?;
                return Ok(ItemResult::Orphaned);
            }
        };

        if invoice.status.is_settled() {
            warn!(
                queue_item_id = %item.id,
                invoice_id = %invoice.id,
                status = %invoice.status,
                "Invoice already settled, removing queue item without resubmitting"
            );
            self.queue_store.delete(&item.id).await?;
            return Ok(ItemResult::Settled);
        }

        info!(
            queue_item_id = %item.id,
            invoice_id = %invoice.id,
            tenant_id = %item.tenant_id,
            attempt = item.attempts + 1,
            max_attempts = item.max_attempts,
            "Resubmitting queued invoice"
        );

        match self.submitter.submit(&invoice).await {
            Ok(receipt) => {
                self.record_store
                    .update_status(
                        &invoice.id,
                        InvoiceStatus::Submitted,
                        json!({
                            "transaction_id": receipt.transaction_id,
                            "api_status": receipt.status,
                            "attempts": item.attempts + 1,
                            "via": "queue",
                        }),
                    )
                    .await?;
                self.remove(item, QueueOutcome::Succeeded).await?;

                info!(
                    queue_item_id = %item.id,
                    invoice_id = %invoice.id,
                    transaction_id = ?receipt.transaction_id,
                    "Queued invoice submitted"
                );
                Ok(ItemResult::Succeeded)
            }
            Err(err) => self.handle_failure(item, &invoice, err).await,
        }
    }

    /// Apply the failure transitions of the queue item state machine
    async fn handle_failure(
        &self,
        item: &mut QueueItem,
        invoice: &InvoiceRecord,
        err: SubmissionError,
    ) -> Result<ItemResult> {
        let code = err.code().to_string();
        let class = self.policy.classify(&code);

        if class == ErrorClass::Permanent {
            warn!(
                queue_item_id = %item.id,
                invoice_id = %invoice.id,
                code = %code,
                error = %err,
                "Queued invoice rejected permanently"
            );
            self.record_store
                .update_status(
                    &invoice.id,
                    InvoiceStatus::Rejected,
                    json!({
                        "code": code,
                        "message": err.message(),
                        "attempts": item.attempts + 1,
                    }),
                )
                .await?;
            self.remove(item, QueueOutcome::Failed).await?;
            return Ok(ItemResult::Failed);
        }

        if item.is_final_attempt() {
            error!(
                queue_item_id = %item.id,
                invoice_id = %invoice.id,
                tenant_id = %item.tenant_id,
                attempts = item.attempts + 1,
                max_attempts = item.max_attempts,
                code = %code,
                error = %err,
                "Retry budget exhausted, escalating to manual intervention"
            );
            self.record_store
                .update_status(
                    &invoice.id,
                    InvoiceStatus::ManualIntervention,
                    json!({
                        "code": code,
                        "message": err.message(),
                        "attempts": item.attempts + 1,
                        "reason": "retry budget exhausted",
                    }),
                )
                .await?;
            self.remove(item, QueueOutcome::Failed).await?;
            return Ok(ItemResult::Failed);
        }

        let next_attempt = item.attempts + 1;
        let scheduled_at = self.policy.next_retry_at(next_attempt);
        item.rearm(scheduled_at, code.as_str(), err.message())?;
        self.queue_store
            .update(&item.id, &QueueItemPatch::rearmed(item))
            .await?;

        info!(
            queue_item_id = %item.id,
            invoice_id = %invoice.id,
            attempts = item.attempts,
            max_attempts = item.max_attempts,
            scheduled_at = scheduled_at,
            code = %code,
            "Queued invoice re-armed"
        );
        Ok(ItemResult::Rearmed)
    }

    async fn remove(&self, item: &QueueItem, outcome: QueueOutcome) -> Result<()> {
        let now = self.time_provider.now_millis();
        self.queue_store.record_outcome(item, outcome, now).await?;
        self.queue_store.delete(&item.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::retry::RetryConfig;
    use crate::domain::InvoiceRecord;
    use crate::port::queue_store::mocks::InMemoryQueueStore;
    use crate::port::record_store::mocks::InMemoryRecordStore;
    use crate::port::submitter::mocks::MockSubmitter;
    use crate::port::time_provider::mocks::ManualClock;
    use crate::port::SubmissionReceipt;

    const NOW: i64 = 10_000_000;

    struct Fixture {
        queue: Arc<InMemoryQueueStore>,
        records: Arc<InMemoryRecordStore>,
        submitter: Arc<MockSubmitter>,
        clock: Arc<ManualClock>,
        processor: Arc<QueueProcessor>,
    }

    fn fixture(submitter: MockSubmitter, invoices: &[&str]) -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW));
        let config = RetryConfig::default()
            .with_delays(Duration::from_millis(1000), Duration::from_millis(60_000));
        let policy = Arc::new(RetryPolicy::new(config, clock.clone()).unwrap());

        let mut records = InMemoryRecordStore::new();
        for id in invoices {
            let mut invoice = InvoiceRecord::new(*id, "tenant-a", json!({"n": id}), 0);
            invoice.status = InvoiceStatus::Queued;
            records = records.with_invoice(invoice);
        }

        let queue = Arc::new(InMemoryQueueStore::new());
        let records = Arc::new(records);
        let submitter = Arc::new(submitter);
        let processor = Arc::new(QueueProcessor::new(
            queue.clone(),
            records.clone(),
            submitter.clone(),
            policy,
            clock.clone(),
        ));

        Fixture {
            queue,
            records,
            submitter,
            clock,
            processor,
        }
    }

    async fn enqueue(f: &Fixture, invoice_id: &str, priority: i32, scheduled_at: i64, attempts: u32) {
        let mut item = QueueItem::new(
            format!("q-{}", invoice_id),
            "tenant-a",
            invoice_id,
            priority,
            scheduled_at,
            5,
            0,
        );
        item.attempts = attempts;
        f.queue.create(&item).await.unwrap();
    }

    #[tokio::test]
    async fn test_success_removes_item_and_marks_submitted() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.succeeded, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.records.status_of("inv-1"), Some(InvoiceStatus::Submitted));
        assert_eq!(f.queue.outcomes(), vec![("inv-1".to_string(), QueueOutcome::Succeeded)]);
    }

    #[tokio::test]
    async fn test_transient_failure_rearms_item() {
        let f = fixture(
            MockSubmitter::new_fail(SubmissionError::Timeout("slow".into())),
            &["inv-1"],
        );
        enqueue(&f, "inv-1", 0, NOW, 1).await;

        let report = f.processor.tick().await.unwrap().unwrap();
        assert_eq!(report.rearmed, 1);

        let item = f.queue.find_by_invoice_id(&"inv-1".to_string()).await.unwrap().unwrap();
        assert_eq!(item.attempts, 2);
        assert!(!item.is_processing);
        assert_eq!(item.last_error_code.as_deref(), Some("TIMEOUT"));
        // delay(2) = 4000ms ± 10%
        assert!((NOW + 3600..=NOW + 4400).contains(&item.scheduled_at));
        assert_eq!(f.records.status_of("inv-1"), Some(InvoiceStatus::Queued));
    }

    #[tokio::test]
    async fn test_final_attempt_escalates_to_manual_intervention() {
        let f = fixture(
            MockSubmitter::new_fail(SubmissionError::ServiceUnavailable("503".into())),
            &["inv-1"],
        );
        enqueue(&f, "inv-1", 0, NOW, 4).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.failed, 1);
        assert!(f.queue.is_empty());
        assert_eq!(
            f.records.status_of("inv-1"),
            Some(InvoiceStatus::ManualIntervention)
        );
        assert_eq!(f.queue.outcomes(), vec![("inv-1".to_string(), QueueOutcome::Failed)]);
    }

    #[tokio::test]
    async fn test_item_failing_every_attempt_ends_in_manual_intervention() {
        let f = fixture(
            MockSubmitter::new_fail(SubmissionError::Connection("refused".into())),
            &["inv-1"],
        );
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        for _ in 0..5 {
            f.clock.advance(120_000);
            f.processor.tick().await.unwrap().unwrap();
        }

        assert_eq!(f.submitter.call_count(), 5);
        assert!(f.queue.is_empty());
        assert_eq!(
            f.records.status_of("inv-1"),
            Some(InvoiceStatus::ManualIntervention)
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_rejects_without_rearming() {
        let f = fixture(
            MockSubmitter::new_fail(SubmissionError::rejected("INVALID_TAX_ID", "bad tax id")),
            &["inv-1"],
        );
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.failed, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.records.status_of("inv-1"), Some(InvoiceStatus::Rejected));
    }

    #[tokio::test]
    async fn test_orphaned_item_is_deleted() {
        let f = fixture(MockSubmitter::new_success(), &[]);
        enqueue(&f, "inv-gone", 0, NOW, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.orphaned, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.submitter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_settled_invoice_is_not_resubmitted() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        f.records
            .update_status(&"inv-1".to_string(), InvoiceStatus::Submitted, json!({}))
            .await
            .unwrap();
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.settled, 1);
        assert_eq!(f.submitter.call_count(), 0);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_items_not_yet_due_are_left_alone() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW + 1, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(f.submitter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pass_order_is_priority_then_schedule() {
        let f = fixture(MockSubmitter::new_success(), &["low", "high", "early", "late"]);
        enqueue(&f, "low", 0, NOW - 10_000, 0).await;
        enqueue(&f, "late", 5, NOW - 100, 0).await;
        enqueue(&f, "high", 9, NOW, 0).await;
        enqueue(&f, "early", 5, NOW - 5_000, 0).await;

        f.processor.tick().await.unwrap().unwrap();

        assert_eq!(
            f.submitter.submitted_invoices(),
            vec!["high", "early", "late", "low"]
        );
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_pass() {
        let ids: Vec<String> = (0..15).map(|i| format!("inv-{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let f = fixture(MockSubmitter::new_success(), &refs);
        for id in &refs {
            enqueue(&f, id, 0, NOW, 0).await;
        }

        let first = f.processor.tick().await.unwrap().unwrap();
        assert_eq!(first.succeeded, 10);
        assert_eq!(f.queue.len(), 5);

        let second = f.processor.tick().await.unwrap().unwrap();
        assert_eq!(second.succeeded, 5);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let submitter = MockSubmitter::new_success().with_script([
            Err(SubmissionError::rejected("INVALID_INVOICE", "missing line items")),
            Err(SubmissionError::Timeout("slow".into())),
            Ok(SubmissionReceipt::default()),
        ]);
        let f = fixture(submitter, &["a", "b", "c"]);
        enqueue(&f, "a", 3, NOW, 0).await;
        enqueue(&f, "b", 2, NOW, 0).await;
        enqueue(&f, "c", 1, NOW, 0).await;

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.claimed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rearmed, 1);
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_lost_claim_skips_item() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW, 0).await;
        f.queue.set_lose_claims(true);

        let report = f.processor.tick().await.unwrap().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.claimed, 0);
        assert_eq!(f.submitter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_pass_and_releases_guard() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        f.queue.set_fail_reads(true);
        assert!(f.processor.tick().await.is_err());
        assert!(!f.processor.is_running());

        f.queue.set_fail_reads(false);
        let report = f.processor.tick().await.unwrap();
        assert_eq!(report.map(|r| r.succeeded), Some(1));
    }

    #[tokio::test]
    async fn test_status_write_failure_releases_claim_without_spending_attempt() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        f.records.set_fail_updates(true);
        assert!(f.processor.tick().await.is_err());
        assert!(!f.processor.is_running());

        let item = f
            .queue
            .find_by_id(&"q-inv-1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(!item.is_processing);
        assert_eq!(item.claimed_at, None);
        assert_eq!(item.attempts, 0);
        assert_eq!(f.queue.claim_calls(), 1);

        f.records.set_fail_updates(false);
        let report = f.processor.tick().await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.records.status_of("inv-1"), Some(InvoiceStatus::Submitted));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_a_no_op() {
        let f = fixture(
            MockSubmitter::new_success().with_delay(Duration::from_millis(200)),
            &["inv-1"],
        );
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        let first = {
            let processor = f.processor.clone();
            tokio::spawn(async move { processor.tick().await })
        };
        // Let the first pass claim the item and block inside the submitter
        while f.submitter.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = f.processor.tick().await.unwrap();
        assert!(second.is_none(), "overlapping tick must be skipped");

        let first = first.await.unwrap().unwrap().unwrap();
        assert_eq!(first.succeeded, 1);
        assert_eq!(f.submitter.call_count(), 1);
        assert_eq!(f.queue.claim_calls(), 1);

        let stats = f.queue.get_stats(None).await.unwrap();
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(MockSubmitter::new_success(), &["inv-1"]);
        enqueue(&f, "inv-1", 0, NOW, 0).await;

        let (tx, token) = shutdown_channel();
        let handle = {
            let processor = f.processor.clone();
            tokio::spawn(async move { processor.run(Duration::from_millis(10), token).await })
        };

        while f.submitter.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.shutdown();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("processor should stop")
            .unwrap();
        assert_eq!(f.records.status_of("inv-1"), Some(InvoiceStatus::Submitted));
    }
}
