// Queue Store Port (Interface)

use crate::domain::{InvoiceId, QueueItem, QueueItemId, QueueOutcome};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Partial update of a queue item (`None` = leave unchanged)
///
/// Setting `is_processing` to `Some(false)` also clears `claimed_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueItemPatch {
    pub scheduled_at: Option<i64>,
    pub attempts: Option<u32>,
    pub is_processing: Option<bool>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
}

impl QueueItemPatch {
    /// Patch persisting a re-armed item
    pub fn rearmed(item: &QueueItem) -> Self {
        Self {
            scheduled_at: Some(item.scheduled_at),
            attempts: Some(item.attempts),
            is_processing: Some(false),
            last_error: item.last_error.clone(),
            last_error_code: item.last_error_code.clone(),
        }
    }

    /// Patch dropping a claim without spending an attempt
    pub fn released() -> Self {
        Self {
            is_processing: Some(false),
            ..Default::default()
        }
    }
}

/// Queue statistics (optionally scoped to one tenant)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Live items (pending + processing)
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    /// Removed after a successful resubmission
    pub succeeded: i64,
    /// Removed after a terminal failure
    pub failed: i64,
    /// Earliest scheduled_at among pending items
    pub next_scheduled_at: Option<i64>,
}

/// Durable persistence of queue items
///
/// Multi-instance deployments rely on `claim` being an atomic conditional
/// update: two processes must never both win the claim for the same item.
/// The in-process single-flight guard of the processor does not cover that.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pending items with scheduled_at <= now, ordered by priority DESC, scheduled_at ASC
    async fn find_due_items(&self, now_millis: i64, limit: usize) -> Result<Vec<QueueItem>>;

    /// Atomically mark a pending item as processing
    ///
    /// Returns false when the item is gone or already claimed elsewhere.
    async fn claim(&self, id: &QueueItemId, now_millis: i64) -> Result<bool>;

    /// Find item by ID
    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// Find the live item of an invoice (at most one exists)
    async fn find_by_invoice_id(&self, invoice_id: &InvoiceId) -> Result<Option<QueueItem>>;

    /// Insert a new item
    ///
    /// # Errors
    /// `AppError::Conflict` if the invoice already has a live item.
    async fn create(&self, item: &QueueItem) -> Result<()>;

    /// Apply a partial update
    ///
    /// # Errors
    /// `AppError::NotFound` if the item does not exist.
    async fn update(&self, id: &QueueItemId, patch: &QueueItemPatch) -> Result<()>;

    /// Remove an item (no-op if already gone)
    async fn delete(&self, id: &QueueItemId) -> Result<()>;

    /// Append a removal to the outcome log (feeds succeeded/failed stats)
    async fn record_outcome(
        &self,
        item: &QueueItem,
        outcome: QueueOutcome,
        at_millis: i64,
    ) -> Result<()>;

    /// Release claims older than `claimed_before` (crash recovery)
    ///
    /// # Returns
    /// Number of items released
    async fn release_stale_claims(&self, claimed_before: i64) -> Result<u64>;

    /// Queue statistics, all tenants when `tenant_id` is None
    async fn get_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory queue store
    #[derive(Default)]
    pub struct InMemoryQueueStore {
        items: Mutex<HashMap<QueueItemId, QueueItem>>,
        outcomes: Mutex<Vec<(QueueItem, QueueOutcome)>>,
        fail_reads: AtomicBool,
        lose_claims: AtomicBool,
        claim_calls: AtomicUsize,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `find_due_items` fail with a database error
        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        /// Make every claim lose, as if another instance got there first
        pub fn set_lose_claims(&self, lose: bool) {
            self.lose_claims.store(lose, Ordering::SeqCst);
        }

        pub fn claim_calls(&self) -> usize {
            self.claim_calls.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.items.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn outcomes(&self) -> Vec<(String, QueueOutcome)> {
            self.outcomes
                .lock()
                .unwrap()
                .iter()
                .map(|(item, outcome)| (item.invoice_id.clone(), *outcome))
                .collect()
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn find_due_items(&self, now_millis: i64, limit: usize) -> Result<Vec<QueueItem>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(AppError::Database("simulated read failure".to_string()));
            }

            let items = self.items.lock().unwrap();
            let mut due: Vec<QueueItem> = items
                .values()
                .filter(|item| item.is_due(now_millis))
                .cloned()
                .collect();
            due.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.id.cmp(&b.id))
            });
            due.truncate(limit);
            Ok(due)
        }

        async fn claim(&self, id: &QueueItemId, now_millis: i64) -> Result<bool> {
            self.claim_calls.fetch_add(1, Ordering::SeqCst);
            if self.lose_claims.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let mut items = self.items.lock().unwrap();
            match items.get_mut(id) {
                Some(item) if !item.is_processing => {
                    item.is_processing = true;
                    item.claimed_at = Some(now_millis);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
            Ok(self.items.lock().unwrap().get(id).cloned())
        }

        async fn find_by_invoice_id(&self, invoice_id: &InvoiceId) -> Result<Option<QueueItem>> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .values()
                .find(|item| &item.invoice_id == invoice_id)
                .cloned())
        }

        async fn create(&self, item: &QueueItem) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            if items.values().any(|i| i.invoice_id == item.invoice_id) {
                return Err(AppError::Conflict(format!(
                    "Invoice {} already queued",
                    item.invoice_id
                )));
            }
            items.insert(item.id.clone(), item.clone());
            Ok(())
        }

        async fn update(&self, id: &QueueItemId, patch: &QueueItemPatch) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            let item = items
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Queue item {} not found", id)))?;

            if let Some(scheduled_at) = patch.scheduled_at {
                item.scheduled_at = scheduled_at;
            }
            if let Some(attempts) = patch.attempts {
                item.attempts = attempts;
            }
            if let Some(is_processing) = patch.is_processing {
                item.is_processing = is_processing;
                if !is_processing {
                    item.claimed_at = None;
                }
            }
            if let Some(last_error) = &patch.last_error {
                item.last_error = Some(last_error.clone());
            }
            if let Some(code) = &patch.last_error_code {
                item.last_error_code = Some(code.clone());
            }
            Ok(())
        }

        async fn delete(&self, id: &QueueItemId) -> Result<()> {
            self.items.lock().unwrap().remove(id);
            Ok(())
        }

        async fn record_outcome(
            &self,
            item: &QueueItem,
            outcome: QueueOutcome,
            _at_millis: i64,
        ) -> Result<()> {
            self.outcomes.lock().unwrap().push((item.clone(), outcome));
            Ok(())
        }

        async fn release_stale_claims(&self, claimed_before: i64) -> Result<u64> {
            let mut released = 0;
            for item in self.items.lock().unwrap().values_mut() {
                if item.is_processing && item.claimed_at.map_or(true, |t| t < claimed_before) {
                    item.release();
                    released += 1;
                }
            }
            Ok(released)
        }

        async fn get_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats> {
            let in_scope = |t: &str| tenant_id.map_or(true, |wanted| wanted == t);

            let mut stats = QueueStats::default();
            for item in self.items.lock().unwrap().values() {
                if !in_scope(&item.tenant_id) {
                    continue;
                }
                stats.total += 1;
                if item.is_processing {
                    stats.processing += 1;
                } else {
                    stats.pending += 1;
                    stats.next_scheduled_at = Some(
                        stats
                            .next_scheduled_at
                            .map_or(item.scheduled_at, |t| t.min(item.scheduled_at)),
                    );
                }
            }
            for (item, outcome) in self.outcomes.lock().unwrap().iter() {
                if !in_scope(&item.tenant_id) {
                    continue;
                }
                match outcome {
                    QueueOutcome::Succeeded => stats.succeeded += 1,
                    QueueOutcome::Failed => stats.failed += 1,
                    QueueOutcome::Orphaned => {}
                }
            }
            Ok(stats)
        }
    }
}
