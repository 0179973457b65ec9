// Queue Item Domain Model
//
// One durable queue item per invoice awaiting a deferred submission attempt.

use crate::domain::error::{DomainError, Result};
use crate::domain::{InvoiceId, TenantId};
use serde::{Deserialize, Serialize};

/// Queue item ID (UUID v4)
pub type QueueItemId = String;

/// Priority (higher number = processed sooner)
pub type Priority = i32;

/// Observable state of a live queue item
///
/// Removal (success or terminal failure) deletes the item, so there is no
/// "removed" variant here; see [`QueueOutcome`] for how removals are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemState {
    Pending,
    Processing,
}

impl std::fmt::Display for QueueItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueItemState::Pending => write!(f, "PENDING"),
            QueueItemState::Processing => write!(f, "PROCESSING"),
        }
    }
}

/// Why a queue item was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueOutcome {
    /// Resubmission accepted
    Succeeded,
    /// Terminal failure (budget exhausted or permanent rejection)
    Failed,
    /// Invoice no longer exists
    Orphaned,
}

impl std::fmt::Display for QueueOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueOutcome::Succeeded => write!(f, "SUCCEEDED"),
            QueueOutcome::Failed => write!(f, "FAILED"),
            QueueOutcome::Orphaned => write!(f, "ORPHANED"),
        }
    }
}

/// Durable unit of deferred submission work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub priority: Priority,

    /// Due when now >= scheduled_at (epoch ms)
    pub scheduled_at: i64,

    pub attempts: u32,
    pub max_attempts: u32,

    pub is_processing: bool,
    /// Set while claimed (epoch ms), used to release claims stranded by a crash
    pub claimed_at: Option<i64>,

    pub last_error: Option<String>,
    pub last_error_code: Option<String>,

    pub created_at: i64, // epoch ms
}

impl QueueItem {
    /// Create a new pending queue item
    ///
    /// # Arguments
    ///
    /// * `id` - Unique queue item ID (injected, not generated)
    /// * `tenant_id` - Owning tenant
    /// * `invoice_id` - Invoice awaiting resubmission
    /// * `priority` - Higher is sooner
    /// * `scheduled_at` - First due time in epoch ms
    /// * `max_attempts` - Retry budget (copied from the retry configuration)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        invoice_id: impl Into<String>,
        priority: Priority,
        scheduled_at: i64,
        max_attempts: u32,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            invoice_id: invoice_id.into(),
            priority,
            scheduled_at,
            attempts: 0,
            max_attempts,
            is_processing: false,
            claimed_at: None,
            last_error: None,
            last_error_code: None,
            created_at,
        }
    }

    pub fn state(&self) -> QueueItemState {
        if self.is_processing {
            QueueItemState::Processing
        } else {
            QueueItemState::Pending
        }
    }

    /// Pending and past its scheduled time
    pub fn is_due(&self, now_millis: i64) -> bool {
        !self.is_processing && now_millis >= self.scheduled_at
    }

    /// A failure of the attempt in flight would spend the whole budget
    pub fn is_final_attempt(&self) -> bool {
        self.attempts.saturating_add(1) >= self.max_attempts
    }

    /// Pending -> Processing
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        if self.is_processing {
            return Err(DomainError::InvalidStateTransition {
                from: self.state().to_string(),
                to: QueueItemState::Processing.to_string(),
            });
        }
        self.is_processing = true;
        self.claimed_at = Some(now_millis);
        Ok(())
    }

    /// Processing -> Pending after a failed attempt that still has budget left
    pub fn rearm(
        &mut self,
        scheduled_at: i64,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Result<()> {
        if !self.is_processing {
            return Err(DomainError::InvalidStateTransition {
                from: self.state().to_string(),
                to: QueueItemState::Pending.to_string(),
            });
        }
        if self.is_final_attempt() {
            return Err(DomainError::AttemptsExhausted {
                id: self.id.clone(),
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }

        self.attempts += 1;
        self.scheduled_at = scheduled_at;
        self.is_processing = false;
        self.claimed_at = None;
        self.last_error_code = Some(error_code.into());
        self.last_error = Some(error_message.into());
        Ok(())
    }

    /// Processing -> Pending without spending an attempt (pass aborted by an infra fault)
    pub fn release(&mut self) {
        self.is_processing = false;
        self.claimed_at = None;
    }
}
