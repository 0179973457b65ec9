// Crash recovery: release queue claims stranded by a dead pass
use crate::application::processor::constants::DEFAULT_STALE_CLAIM_MS;
use crate::error::Result;
use crate::port::{QueueStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Claim recovery service
///
/// A pass that dies between claim and outcome (process crash, power loss)
/// leaves its item with `is_processing = 1`. Such an item is never due again,
/// so on daemon startup every claim older than the stale window is handed
/// back to the queue. The attempt counter is left untouched: the crashed
/// attempt may or may not have reached the invoicing API.
pub struct ClaimRecoveryService {
    queue_store: Arc<dyn QueueStore>,
    time_provider: Arc<dyn TimeProvider>,
    stale_after_ms: i64,
}

impl ClaimRecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `queue_store` - Queue store
    /// * `time_provider` - Time provider
    /// * `stale_after_ms` - Optional custom stale window (default: 5 minutes)
    ///
    /// # Example
    /// ```text
    /// let recovery = ClaimRecoveryService::new(queue_store, time_provider, None);
    /// recovery.release_stale_claims().await?;
    /// ```
    pub fn new(
        queue_store: Arc<dyn QueueStore>,
        time_provider: Arc<dyn TimeProvider>,
        stale_after_ms: Option<i64>,
    ) -> Self {
        Self {
            queue_store,
            time_provider,
            stale_after_ms: stale_after_ms.unwrap_or(DEFAULT_STALE_CLAIM_MS),
        }
    }

    /// Release claims older than the stale window
    ///
    /// # Returns
    /// Number of items handed back to the queue
    pub async fn release_stale_claims(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let cutoff = now.saturating_sub(self.stale_after_ms);

        info!(
            cutoff = cutoff,
            stale_after_ms = self.stale_after_ms,
            "Starting stale claim recovery"
        );

        let released = self.queue_store.release_stale_claims(cutoff).await?;

        if released > 0 {
            warn!(released = released, "Released queue items stranded by a previous run");
        }
        info!(released = released, "Stale claim recovery complete");
        Ok(released)
    }
}
