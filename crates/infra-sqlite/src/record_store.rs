// SQLite RecordStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use dispatch_core::domain::{InvoiceId, InvoiceRecord, InvoiceStatus};
use dispatch_core::error::{AppError, Result};
use dispatch_core::port::{RecordStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteRecordStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, invoice: &InvoiceRecord) -> Result<()> {
        let details = invoice.status_details.as_ref().map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, tenant_id, status, payload, transaction_id,
                status_details, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.tenant_id)
        .bind(invoice.status.to_string())
        .bind(invoice.payload.to_string())
        .bind(&invoice.transaction_id)
        .bind(details)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, invoice_id: &InvoiceId) -> Result<Option<InvoiceRecord>> {
        let row: Option<InvoiceRow> = sqlx::query_as("SELECT * FROM invoices WHERE id = ?")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(InvoiceRow::into_record).transpose()
    }

    async fn update_status(
        &self,
        invoice_id: &InvoiceId,
        status: InvoiceStatus,
        details: serde_json::Value,
    ) -> Result<()> {
        let now = self.time_provider.now_millis();
        let transaction_id = details
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = ?,
                status_details = ?,
                transaction_id = COALESCE(?, transaction_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(details.to_string())
        .bind(transaction_id)
        .bind(now)
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Invoice {} not found", invoice_id)));
        }
        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    tenant_id: String,
    status: String,
    payload: String, // JSON text
    transaction_id: Option<String>,
    status_details: Option<String>, // JSON text
    created_at: i64,
    updated_at: i64,
}

impl InvoiceRow {
    fn into_record(self) -> Result<InvoiceRecord> {
        let status: InvoiceStatus = self.status.parse()?;
        let payload = serde_json::from_str(&self.payload)?;
        let status_details = self
            .status_details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(InvoiceRecord {
            id: self.id,
            tenant_id: self.tenant_id,
            status,
            payload,
            transaction_id: self.transaction_id,
            status_details,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use dispatch_core::port::time_provider::mocks::ManualClock;
    use serde_json::json;

    async fn setup_test_db() -> (SqliteRecordStore, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        (SqliteRecordStore::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (store, _) = setup_test_db().await;
        let invoice = InvoiceRecord::new("inv-1", "t1", json!({"lines": [1, 2]}), 500);

        store.insert(&invoice).await.unwrap();

        let found = store.find_by_id(&invoice.id).await.unwrap();
        assert_eq!(found, Some(invoice));
        assert!(store.find_by_id(&"nope".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let (store, _) = setup_test_db().await;
        let invoice = InvoiceRecord::new("inv-1", "t1", json!({}), 500);
        store.insert(&invoice).await.unwrap();

        let err = store.insert(&invoice).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_status_records_details_and_transaction() {
        let (store, clock) = setup_test_db().await;
        let invoice = InvoiceRecord::new("inv-1", "t1", json!({}), 500);
        store.insert(&invoice).await.unwrap();

        clock.set(2_000);
        store
            .update_status(
                &invoice.id,
                InvoiceStatus::Submitted,
                json!({"transaction_id": "tx-9", "attempts": 2}),
            )
            .await
            .unwrap();

        let stored = store.find_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Submitted);
        assert_eq!(stored.transaction_id.as_deref(), Some("tx-9"));
        assert_eq!(stored.status_details.unwrap()["attempts"], 2);
        assert_eq!(stored.updated_at, 2_000);
    }

    #[tokio::test]
    async fn test_update_status_keeps_existing_transaction_id() {
        let (store, _) = setup_test_db().await;
        let invoice = InvoiceRecord::new("inv-1", "t1", json!({}), 500);
        store.insert(&invoice).await.unwrap();

        store
            .update_status(&invoice.id, InvoiceStatus::Submitted, json!({"transaction_id": "tx-1"}))
            .await
            .unwrap();
        store
            .update_status(&invoice.id, InvoiceStatus::Submitted, json!({"note": "replayed"}))
            .await
            .unwrap();

        let stored = store.find_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_update_status_of_missing_invoice_is_not_found() {
        let (store, _) = setup_test_db().await;
        let err = store
            .update_status(&"nope".to_string(), InvoiceStatus::Rejected, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
