// SQLite QueueStore Implementation

use crate::error::{map_sqlx_error, to_u32};
use async_trait::async_trait;
use dispatch_core::domain::{InvoiceId, QueueItem, QueueItemId, QueueOutcome};
use dispatch_core::error::{AppError, Result};
use dispatch_core::port::{QueueItemPatch, QueueStats, QueueStore};
use sqlx::SqlitePool;
use tracing::debug;

pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn find_due_items(&self, now_millis: i64, limit: usize) -> Result<Vec<QueueItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<QueueItemRow> = sqlx::query_as(
            r#"
            SELECT * FROM submission_queue
            WHERE is_processing = 0 AND scheduled_at <= ?
            ORDER BY priority DESC, scheduled_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(now_millis)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(QueueItemRow::into_item).collect()
    }

    async fn claim(&self, id: &QueueItemId, now_millis: i64) -> Result<bool> {
        // Conditional update: of two concurrent claimers exactly one sees a row change
        let result = sqlx::query(
            r#"
            UPDATE submission_queue
            SET is_processing = 1, claimed_at = ?
            WHERE id = ? AND is_processing = 0
            "#,
        )
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let claimed = result.rows_affected() == 1;
        debug!(queue_item_id = %id, claimed = claimed, "Claim attempted");
        Ok(claimed)
    }

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        let row: Option<QueueItemRow> =
            sqlx::query_as("SELECT * FROM submission_queue WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(QueueItemRow::into_item).transpose()
    }

    async fn find_by_invoice_id(&self, invoice_id: &InvoiceId) -> Result<Option<QueueItem>> {
        let row: Option<QueueItemRow> =
            sqlx::query_as("SELECT * FROM submission_queue WHERE invoice_id = ?")
                .bind(invoice_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(QueueItemRow::into_item).transpose()
    }

    async fn create(&self, item: &QueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO submission_queue (
                id, tenant_id, invoice_id, priority, scheduled_at,
                attempts, max_attempts, is_processing, claimed_at,
                last_error, last_error_code, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.tenant_id)
        .bind(&item.invoice_id)
        .bind(item.priority)
        .bind(item.scheduled_at)
        .bind(i64::from(item.attempts))
        .bind(i64::from(item.max_attempts))
        .bind(item.is_processing)
        .bind(item.claimed_at)
        .bind(&item.last_error)
        .bind(&item.last_error_code)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            AppError::Conflict(_) => {
                AppError::Conflict(format!("Invoice {} already queued", item.invoice_id))
            }
            other => other,
        })?;

        Ok(())
    }

    async fn update(&self, id: &QueueItemId, patch: &QueueItemPatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE submission_queue
            SET scheduled_at = COALESCE(?, scheduled_at),
                attempts = COALESCE(?, attempts),
                is_processing = COALESCE(?, is_processing),
                claimed_at = CASE WHEN ? = 0 THEN NULL ELSE claimed_at END,
                last_error = COALESCE(?, last_error),
                last_error_code = COALESCE(?, last_error_code)
            WHERE id = ?
            "#,
        )
        .bind(patch.scheduled_at)
        .bind(patch.attempts.map(i64::from))
        .bind(patch.is_processing)
        .bind(patch.is_processing.map(i64::from))
        .bind(&patch.last_error)
        .bind(&patch.last_error_code)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Queue item {} not found", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &QueueItemId) -> Result<()> {
        sqlx::query("DELETE FROM submission_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        item: &QueueItem,
        outcome: QueueOutcome,
        at_millis: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_outcomes (
                queue_item_id, tenant_id, invoice_id, outcome,
                attempts, last_error_code, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.tenant_id)
        .bind(&item.invoice_id)
        .bind(outcome.to_string())
        .bind(i64::from(item.attempts))
        .bind(&item.last_error_code)
        .bind(at_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn release_stale_claims(&self, claimed_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE submission_queue
            SET is_processing = 0, claimed_at = NULL
            WHERE is_processing = 1
              AND (claimed_at IS NULL OR claimed_at < ?)
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn get_stats(&self, tenant_id: Option<&str>) -> Result<QueueStats> {
        let (total, pending, processing, next_scheduled_at): (i64, i64, i64, Option<i64>) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN is_processing = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_processing = 1 THEN 1 ELSE 0 END), 0),
                    MIN(CASE WHEN is_processing = 0 THEN scheduled_at END)
                FROM submission_queue
                WHERE (?1 IS NULL OR tenant_id = ?1)
                "#,
            )
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        // Orphan removals are not counted as either outcome
        let (succeeded, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN outcome = 'SUCCEEDED' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN outcome = 'FAILED' THEN 1 ELSE 0 END), 0)
            FROM queue_outcomes
            WHERE (?1 IS NULL OR tenant_id = ?1)
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(QueueStats {
            total,
            pending,
            processing,
            succeeded,
            failed,
            next_scheduled_at,
        })
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct QueueItemRow {
    id: String,
    tenant_id: String,
    invoice_id: String,
    priority: i32,
    scheduled_at: i64,
    attempts: i64,
    max_attempts: i64,
    is_processing: bool, // SQLite boolean as integer
    claimed_at: Option<i64>,
    last_error: Option<String>,
    last_error_code: Option<String>,
    created_at: i64,
}

impl QueueItemRow {
    fn into_item(self) -> Result<QueueItem> {
        Ok(QueueItem {
            attempts: to_u32(self.attempts, "attempts")?,
            max_attempts: to_u32(self.max_attempts, "max_attempts")?,
            id: self.id,
            tenant_id: self.tenant_id,
            invoice_id: self.invoice_id,
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            is_processing: self.is_processing,
            claimed_at: self.claimed_at,
            last_error: self.last_error,
            last_error_code: self.last_error_code,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn setup_test_db() -> SqliteQueueStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteQueueStore::new(pool)
    }

    fn item(id: &str, tenant: &str, priority: i32, scheduled_at: i64) -> QueueItem {
        QueueItem::new(id, tenant, format!("inv-{}", id), priority, scheduled_at, 5, 0)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = setup_test_db().await;
        let mut original = item("a", "t1", 3, 1_000);
        original.last_error_code = Some("TIMEOUT".to_string());
        store.create(&original).await.unwrap();

        let found = store.find_by_id(&"a".to_string()).await.unwrap();
        assert_eq!(found, Some(original.clone()));

        let by_invoice = store
            .find_by_invoice_id(&"inv-a".to_string())
            .await
            .unwrap();
        assert_eq!(by_invoice.map(|i| i.id), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_second_item_for_same_invoice_conflicts() {
        let store = setup_test_db().await;
        store.create(&item("a", "t1", 0, 0)).await.unwrap();

        let mut dup = item("b", "t1", 0, 0);
        dup.invoice_id = "inv-a".to_string();
        let err = store.create(&dup).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_due_items_order_and_limit() {
        let store = setup_test_db().await;
        store.create(&item("low", "t1", 0, 100)).await.unwrap();
        store.create(&item("late", "t1", 5, 900)).await.unwrap();
        store.create(&item("early", "t1", 5, 200)).await.unwrap();
        store.create(&item("future", "t1", 9, 5_000)).await.unwrap();

        let due = store.find_due_items(1_000, 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late", "low"]);

        let limited = store.find_due_items(1_000, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = setup_test_db().await;
        store.create(&item("a", "t1", 0, 0)).await.unwrap();
        let id = "a".to_string();

        assert!(store.claim(&id, 10).await.unwrap());
        assert!(!store.claim(&id, 11).await.unwrap(), "second claim must lose");
        assert!(!store.claim(&"missing".to_string(), 12).await.unwrap());

        let claimed = store.find_by_id(&id).await.unwrap().unwrap();
        assert!(claimed.is_processing);
        assert_eq!(claimed.claimed_at, Some(10));
        assert!(store.find_due_items(1_000, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_applies_patch_and_clears_claim() {
        let store = setup_test_db().await;
        let mut original = item("a", "t1", 0, 0);
        store.create(&original).await.unwrap();
        store.claim(&original.id, 10).await.unwrap();

        original.claim(10).unwrap();
        original.rearm(4_000, "TIMEOUT", "timed out").unwrap();
        tokio_test::assert_ok!(
            store
                .update(&original.id, &QueueItemPatch::rearmed(&original))
                .await
        );

        let stored = store.find_by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(stored, original);
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let store = setup_test_db().await;
        let err = store
            .update(&"missing".to_string(), &QueueItemPatch::released())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let store = setup_test_db().await;
        store.create(&item("old", "t1", 0, 0)).await.unwrap();
        store.create(&item("new", "t1", 0, 0)).await.unwrap();
        store.claim(&"old".to_string(), 100).await.unwrap();
        store.claim(&"new".to_string(), 9_000).await.unwrap();

        let released = store.release_stale_claims(5_000).await.unwrap();

        assert_eq!(released, 1);
        let old = store.find_by_id(&"old".to_string()).await.unwrap().unwrap();
        assert!(!old.is_processing);
        let new = store.find_by_id(&"new".to_string()).await.unwrap().unwrap();
        assert!(new.is_processing);
    }

    #[tokio::test]
    async fn test_stats_count_live_items_and_outcomes_per_tenant() {
        let store = setup_test_db().await;
        store.create(&item("a", "t1", 0, 500)).await.unwrap();
        store.create(&item("b", "t1", 0, 300)).await.unwrap();
        store.create(&item("c", "t2", 0, 100)).await.unwrap();
        store.claim(&"b".to_string(), 10).await.unwrap();

        let done = item("d", "t1", 0, 0);
        store
            .record_outcome(&done, QueueOutcome::Succeeded, 1)
            .await
            .unwrap();
        store.record_outcome(&done, QueueOutcome::Failed, 2).await.unwrap();
        store
            .record_outcome(&done, QueueOutcome::Orphaned, 3)
            .await
            .unwrap();

        let t1 = store.get_stats(Some("t1")).await.unwrap();
        assert_eq!(
            t1,
            QueueStats {
                total: 2,
                pending: 1,
                processing: 1,
                succeeded: 1,
                failed: 1,
                next_scheduled_at: Some(500),
            }
        );

        let all = store.get_stats(None).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.next_scheduled_at, Some(100));
    }

    #[tokio::test]
    async fn test_stats_on_empty_queue() {
        let store = setup_test_db().await;
        let stats = store.get_stats(None).await.unwrap();
        assert_eq!(stats, QueueStats::default());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = setup_test_db().await;
        store.create(&item("a", "t1", 0, 0)).await.unwrap();

        store.delete(&"a".to_string()).await.unwrap();
        store.delete(&"a".to_string()).await.unwrap();

        assert!(store.find_by_id(&"a".to_string()).await.unwrap().is_none());
    }
}
