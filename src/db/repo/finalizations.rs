//! Pending finalization operations for the repository.

use crate::domain::{
    FinalizationStatus, NewFinalization, PendingFinalization, PoolId, TimeMs, TxRef,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_column, Repository};

const SELECT_COLUMNS: &str = r#"
    SELECT id, pool_id, tx_ref, amount_in, expected_out, queued_at_ms, unlock_at_ms,
           status, attempts, last_error, completion_tx_ref
    FROM pending_finalizations
"#;

impl Repository {
    /// Persist a newly queued redemption as `pending`.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_pending_finalization(
        &self,
        record: &NewFinalization,
    ) -> Result<PendingFinalization, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_finalizations (
                pool_id, tx_ref, amount_in, expected_out, queued_at_ms, unlock_at_ms,
                status, attempts, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(record.pool_id.as_str())
        .bind(record.tx_ref.as_ref().map(|t| t.as_str().to_string()))
        .bind(record.amount_in.to_canonical_string())
        .bind(record.expected_out.to_canonical_string())
        .bind(record.queued_at.as_ms())
        .bind(record.unlock_at.as_ms())
        .bind(FinalizationStatus::Pending.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(PendingFinalization {
            id: result.last_insert_rowid(),
            pool_id: record.pool_id.clone(),
            tx_ref: record.tx_ref.clone(),
            amount_in: record.amount_in.clone(),
            expected_out: record.expected_out.clone(),
            queued_at: record.queued_at,
            unlock_at: record.unlock_at,
            status: FinalizationStatus::Pending,
            attempts: 0,
            last_error: None,
            completion_tx_ref: None,
        })
    }

    /// # Errors
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn get_finalization(&self, id: i64) -> Result<Option<PendingFinalization>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_finalization).transpose()
    }

    /// All records for a pool, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn list_finalizations(
        &self,
        pool_id: &PoolId,
    ) -> Result<Vec<PendingFinalization>, sqlx::Error> {
        let rows = sqlx::query(&format!("{} WHERE pool_id = ? ORDER BY id ASC", SELECT_COLUMNS))
            .bind(pool_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_finalization).collect()
    }

    /// Records with the given status for a pool, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn list_finalizations_by_status(
        &self,
        pool_id: &PoolId,
        status: FinalizationStatus,
    ) -> Result<Vec<PendingFinalization>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{} WHERE pool_id = ? AND status = ? ORDER BY id ASC",
            SELECT_COLUMNS
        ))
        .bind(pool_id.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_finalization).collect()
    }

    /// Number of records still holding a queued redemption (pending or failed).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_open_finalizations(&self, pool_id: &PoolId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS open_count
            FROM pending_finalizations
            WHERE pool_id = ? AND status != ?
            "#,
        )
        .bind(pool_id.as_str())
        .bind(FinalizationStatus::Finalized.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("open_count"))
    }

    /// Record the outcome of one completion attempt.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn record_finalization_attempt(
        &self,
        id: i64,
        status: FinalizationStatus,
        last_error: Option<&str>,
        completion_tx_ref: Option<&TxRef>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pending_finalizations
            SET status = ?,
                attempts = attempts + 1,
                last_error = ?,
                completion_tx_ref = COALESCE(?, completion_tx_ref),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(completion_tx_ref.map(|t| t.as_str().to_string()))
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a failed record back to `pending` ahead of an operator retry.
    ///
    /// Returns `false` when the record is not in the `failed` state.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn reopen_failed_finalization(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pending_finalizations
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(FinalizationStatus::Pending.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(id)
        .bind(FinalizationStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_finalization(row: &SqliteRow) -> Result<PendingFinalization, sqlx::Error> {
    let pool_id: String = row.get("pool_id");
    let status: String = row.get("status");
    let tx_ref: Option<String> = row.get("tx_ref");
    let completion_tx_ref: Option<String> = row.get("completion_tx_ref");
    let attempts: i64 = row.get("attempts");

    let parse_tx = |value: Option<String>| -> Result<Option<TxRef>, sqlx::Error> {
        value
            .map(|s| TxRef::parse(&s).map_err(|e| sqlx::Error::Decode(e.to_string().into())))
            .transpose()
    };

    Ok(PendingFinalization {
        id: row.get("id"),
        pool_id: PoolId::parse(&pool_id).map_err(|e| sqlx::Error::Decode(e.to_string().into()))?,
        tx_ref: parse_tx(tx_ref)?,
        amount_in: decode_column("amount_in", row.get::<&str, _>("amount_in"))?,
        expected_out: decode_column("expected_out", row.get::<&str, _>("expected_out"))?,
        queued_at: TimeMs::new(row.get("queued_at_ms")),
        unlock_at: TimeMs::new(row.get("unlock_at_ms")),
        status: FinalizationStatus::parse(&status).ok_or_else(|| {
            sqlx::Error::Decode(format!("invalid status value {:?}", status).into())
        })?,
        attempts: attempts.max(0) as u32,
        last_error: row.get("last_error"),
        completion_tx_ref: parse_tx(completion_tx_ref)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::{init_db, Repository};
    use crate::domain::{Amount, FinalizationStatus, NewFinalization, PoolId, TimeMs, TxRef};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fin.db").to_string_lossy().to_string();
        let pool = init_db(&path).await.unwrap();
        (dir, Repository::new(pool))
    }

    fn new_record() -> NewFinalization {
        NewFinalization {
            pool_id: PoolId::parse(&format!("0x{}", "44".repeat(32))).unwrap(),
            tx_ref: Some(TxRef::parse(&format!("0x{}", "cd".repeat(32))).unwrap()),
            amount_in: Amount::from(25_000_000i64),
            expected_out: Amount::from(24_000_000i64),
            queued_at: TimeMs::new(1_000),
            unlock_at: TimeMs::new(61_000),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (_dir, repo) = setup().await;
        let inserted = repo.insert_pending_finalization(&new_record()).await.unwrap();
        let loaded = repo.get_finalization(inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded, inserted);
        assert_eq!(loaded.status, FinalizationStatus::Pending);
        assert!(repo.get_finalization(inserted.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_then_reopened() {
        let (_dir, repo) = setup().await;
        let record = new_record();
        let inserted = repo.insert_pending_finalization(&record).await.unwrap();

        repo.record_finalization_attempt(inserted.id, FinalizationStatus::Failed, Some("reverted"), None)
            .await
            .unwrap();
        let failed = repo.get_finalization(inserted.id).await.unwrap().unwrap();
        assert_eq!(failed.status, FinalizationStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("reverted"));
        assert_eq!(repo.count_open_finalizations(&record.pool_id).await.unwrap(), 1);

        assert!(repo.reopen_failed_finalization(inserted.id).await.unwrap());
        // only failed records can be reopened
        assert!(!repo.reopen_failed_finalization(inserted.id).await.unwrap());

        let done = TxRef::parse(&format!("0x{}", "ef".repeat(32))).unwrap();
        repo.record_finalization_attempt(inserted.id, FinalizationStatus::Finalized, None, Some(&done))
            .await
            .unwrap();
        let finalized = repo.get_finalization(inserted.id).await.unwrap().unwrap();
        assert_eq!(finalized.status, FinalizationStatus::Finalized);
        assert_eq!(finalized.attempts, 2);
        assert_eq!(finalized.completion_tx_ref, Some(done));
        assert_eq!(repo.count_open_finalizations(&record.pool_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let (_dir, repo) = setup().await;
        let record = new_record();
        let a = repo.insert_pending_finalization(&record).await.unwrap();
        let b = repo.insert_pending_finalization(&record).await.unwrap();
        repo.record_finalization_attempt(b.id, FinalizationStatus::Finalized, None, None)
            .await
            .unwrap();

        let pending = repo
            .list_finalizations_by_status(&record.pool_id, FinalizationStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
        assert_eq!(repo.list_finalizations(&record.pool_id).await.unwrap().len(), 2);
    }
}
