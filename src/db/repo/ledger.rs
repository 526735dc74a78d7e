//! Balance log and ledger entry operations for the repository.

use crate::domain::{
    Amount, BalanceLog, Decimal, Direction, LedgerEntry, PoolId, TimeMs, TxRef,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::warn;

use super::{decode_column, Repository};

impl Repository {
    /// Load the full balance log for a pool, entries ordered by `seq`.
    ///
    /// Returns `None` when the pool has never been recorded.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored amount is corrupt.
    pub async fn load_balance_log(&self, pool_id: &PoolId) -> Result<Option<BalanceLog>, sqlx::Error> {
        let header = sqlx::query(
            r#"
            SELECT start_time_ms, starting_balance, current_balance, trade_count
            FROM balance_logs
            WHERE pool_id = ?
            "#,
        )
        .bind(pool_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let starting_balance: Option<String> = header.get("starting_balance");
        let current_balance: Option<String> = header.get("current_balance");
        let trade_count: i64 = header.get("trade_count");

        let rows = sqlx::query(
            r#"
            SELECT seq, entry_key, time_ms, balance_token0, balance_token1, share_price_e18,
                   total_value, tx_ref, direction, change_from_previous,
                   change_percent_from_previous, cumulative_profit, cumulative_profit_percent
            FROM ledger_entries
            WHERE pool_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(pool_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(BalanceLog {
            pool_id: pool_id.clone(),
            start_time: TimeMs::new(header.get("start_time_ms")),
            starting_balance: starting_balance
                .map(|s| decode_column("starting_balance", &s))
                .transpose()?,
            current_balance: current_balance
                .map(|s| decode_column("current_balance", &s))
                .transpose()?,
            trade_count: trade_count.max(0) as u64,
            entries,
        }))
    }

    /// Insert or overwrite the log header (everything except the entries).
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn save_balance_log_header(&self, log: &BalanceLog) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        upsert_header(&mut tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist a newly derived entry together with the updated header.
    ///
    /// Both writes share one transaction so a reader never sees an entry whose header
    /// (current balance, trade count) does not include it yet.
    ///
    /// # Errors
    /// Returns an error if the transaction fails (for example a duplicate `seq`).
    pub async fn append_ledger_entry(
        &self,
        log: &BalanceLog,
        entry: &LedgerEntry,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        upsert_header(&mut tx, log).await?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                pool_id, seq, entry_key, time_ms, balance_token0, balance_token1,
                share_price_e18, total_value, tx_ref, direction, change_from_previous,
                change_percent_from_previous, cumulative_profit, cumulative_profit_percent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.pool_id.as_str())
        .bind(entry.seq as i64)
        .bind(entry.entry_key.as_str())
        .bind(entry.timestamp.as_ms())
        .bind(entry.balance_token0.to_canonical_string())
        .bind(entry.balance_token1.to_canonical_string())
        .bind(entry.share_price_e18.to_canonical_string())
        .bind(entry.total_value.to_canonical_string())
        .bind(entry.tx_ref.as_ref().map(|t| t.as_str().to_string()))
        .bind(entry.direction.map(|d| d.as_str()))
        .bind(entry.change_from_previous.as_ref().map(|a| a.to_canonical_string()))
        .bind(entry.change_percent_from_previous.map(|d| d.to_canonical_string()))
        .bind(entry.cumulative_profit.to_canonical_string())
        .bind(entry.cumulative_profit_percent.map(|d| d.to_canonical_string()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drop every entry and reinitialize the header to an empty log.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn reset_balance_log(&self, log: &BalanceLog) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM ledger_entries WHERE pool_id = ?")
            .bind(log.pool_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        upsert_header(&mut tx, log).await?;
        tx.commit().await?;
        Ok(deleted)
    }
}

async fn upsert_header(tx: &mut Transaction<'_, Sqlite>, log: &BalanceLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO balance_logs (
            pool_id, start_time_ms, starting_balance, current_balance, trade_count, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(pool_id) DO UPDATE SET
            start_time_ms = excluded.start_time_ms,
            starting_balance = excluded.starting_balance,
            current_balance = excluded.current_balance,
            trade_count = excluded.trade_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(log.pool_id.as_str())
    .bind(log.start_time.as_ms())
    .bind(log.starting_balance.as_ref().map(|a| a.to_canonical_string()))
    .bind(log.current_balance.as_ref().map(|a| a.to_canonical_string()))
    .bind(log.trade_count as i64)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
    let entry_key: String = row.get("entry_key");
    let seq: i64 = row.get("seq");
    let tx_ref: Option<String> = row.get("tx_ref");
    let direction: Option<String> = row.get("direction");
    let change: Option<String> = row.get("change_from_previous");
    let change_pct: Option<String> = row.get("change_percent_from_previous");
    let cum_pct: Option<String> = row.get("cumulative_profit_percent");

    let tx_ref = match tx_ref {
        Some(s) => Some(TxRef::parse(&s).map_err(|e| sqlx::Error::Decode(e.to_string().into()))?),
        None => None,
    };
    let direction = direction.as_deref().and_then(|s| {
        let parsed = Direction::parse(s);
        if parsed.is_none() {
            warn!(entry_key = %entry_key, direction = %s, "Unknown direction in ledger entry, ignoring");
        }
        parsed
    });

    // Percentages are display-only; a bad value is logged rather than failing the load.
    let parse_pct = |field: &str, value: Option<String>| -> Option<Decimal> {
        value.and_then(|s| match Decimal::from_str_canonical(&s) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(entry_key = %entry_key, field, value = %s, error = %e, "Failed to parse percent decimal, ignoring");
                None
            }
        })
    };
    let change_percent_from_previous = parse_pct("change_percent_from_previous", change_pct);
    let cumulative_profit_percent = parse_pct("cumulative_profit_percent", cum_pct);

    Ok(LedgerEntry {
        seq: seq.max(0) as u64,
        timestamp: TimeMs::new(row.get("time_ms")),
        balance_token0: decode_column("balance_token0", row.get::<&str, _>("balance_token0"))?,
        balance_token1: decode_column("balance_token1", row.get::<&str, _>("balance_token1"))?,
        share_price_e18: decode_column("share_price_e18", row.get::<&str, _>("share_price_e18"))?,
        total_value: decode_column("total_value", row.get::<&str, _>("total_value"))?,
        tx_ref,
        direction,
        change_from_previous: change
            .map(|s| decode_column::<Amount>("change_from_previous", &s))
            .transpose()?,
        change_percent_from_previous,
        cumulative_profit: decode_column("cumulative_profit", row.get::<&str, _>("cumulative_profit"))?,
        cumulative_profit_percent,
        entry_key,
    })
}
