// Record Store Port (Interface)

use crate::domain::{InvoiceId, InvoiceRecord, InvoiceStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Invoice status persistence
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new invoice record
    async fn insert(&self, invoice: &InvoiceRecord) -> Result<()>;

    /// Find invoice by ID
    async fn find_by_id(&self, invoice_id: &InvoiceId) -> Result<Option<InvoiceRecord>>;

    /// Set delivery status
    ///
    /// `details` is stored as-is; a `transaction_id` key, when present, is
    /// also copied onto the record.
    ///
    /// # Errors
    /// `AppError::NotFound` if the invoice does not exist.
    async fn update_status(
        &self,
        invoice_id: &InvoiceId,
        status: InvoiceStatus,
        details: serde_json::Value,
    ) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory record store
    #[derive(Default)]
    pub struct InMemoryRecordStore {
        records: Mutex<HashMap<InvoiceId, InvoiceRecord>>,
        history: Mutex<Vec<(InvoiceId, InvoiceStatus)>>,
        fail_updates: AtomicBool,
    }

    impl InMemoryRecordStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Synchronous seeding helper
        pub fn with_invoice(self, invoice: InvoiceRecord) -> Self {
            self.records
                .lock()
                .unwrap()
                .insert(invoice.id.clone(), invoice);
            self
        }

        pub fn status_of(&self, invoice_id: &str) -> Option<InvoiceStatus> {
            self.records
                .lock()
                .unwrap()
                .get(invoice_id)
                .map(|r| r.status)
        }

        /// Make every subsequent `update_status` call fail
        pub fn set_fail_updates(&self, fail: bool) {
            self.fail_updates.store(fail, Ordering::SeqCst);
        }

        /// Every status change, in order
        pub fn status_history(&self) -> Vec<(InvoiceId, InvoiceStatus)> {
            self.history.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordStore for InMemoryRecordStore {
        async fn insert(&self, invoice: &InvoiceRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&invoice.id) {
                return Err(AppError::Conflict(format!(
                    "Invoice {} already exists",
                    invoice.id
                )));
            }
            records.insert(invoice.id.clone(), invoice.clone());
            Ok(())
        }

        async fn find_by_id(&self, invoice_id: &InvoiceId) -> Result<Option<InvoiceRecord>> {
            Ok(self.records.lock().unwrap().get(invoice_id).cloned())
        }

        async fn update_status(
            &self,
            invoice_id: &InvoiceId,
            status: InvoiceStatus,
            details: serde_json::Value,
        ) -> Result<()> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(AppError::Database("simulated update failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let record = records
                .get_mut(invoice_id)
                .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", invoice_id)))?;

            record.status = status;
            if let Some(tx) = details.get("transaction_id").and_then(|v| v.as_str()) {
                record.transaction_id = Some(tx.to_string());
            }
            record.status_details = Some(details);
            self.history
                .lock()
                .unwrap()
                .push((invoice_id.clone(), status));
            Ok(())
        }
    }
}
