//! Append-only balance ledger and its derived statistics.
//!
//! Every derived field is a function of `starting_balance` and the ordered raw total
//! values, so replaying the raw snapshots rebuilds an identical log.

use crate::db::Repository;
use crate::domain::{
    Amount, BalanceLog, BalanceSnapshot, Decimal, Direction, LedgerEntry, PoolId, RawSnapshot,
    TimeMs, TxRef,
};
use crate::math::{pow10, PRICE_SCALE_DECIMALS};
use num_bigint::{BigInt, BigUint};
use num_traits::Signed;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Floor for elapsed time in throughput figures (0.01 h).
pub const MIN_ELAPSED_MS: i64 = 36_000;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("csv export error: {0}")]
    Csv(String),
    /// Entry timestamps must not go backwards.
    #[error("entry at {timestamp} precedes the last entry at {last}")]
    OutOfOrder { timestamp: i64, last: i64 },
}

/// Token1-equivalent value of the holdings: `b1 + b0 * price * 10^dec1 / (10^18 * 10^dec0)`.
pub fn valuation(
    balance_token0: &BigUint,
    balance_token1: &BigUint,
    share_price_e18: &BigUint,
    dec0: u8,
    dec1: u8,
) -> BigUint {
    let token0_in_token1 = balance_token0 * share_price_e18 * pow10(dec1 as u32)
        / (pow10(PRICE_SCALE_DECIMALS) * pow10(dec0 as u32));
    balance_token1 + token0_in_token1
}

/// Build a raw snapshot from chain balances.
pub fn snapshot_to_raw(
    snapshot: &BalanceSnapshot,
    timestamp: TimeMs,
    tx_ref: Option<TxRef>,
    direction: Option<Direction>,
    dec0: u8,
    dec1: u8,
) -> RawSnapshot {
    let total = valuation(
        &snapshot.balance_token0,
        &snapshot.balance_token1,
        &snapshot.share_price_e18,
        dec0,
        dec1,
    );
    RawSnapshot {
        timestamp,
        balance_token0: Amount::from_unsigned(&snapshot.balance_token0),
        balance_token1: Amount::from_unsigned(&snapshot.balance_token1),
        share_price_e18: Amount::from_unsigned(&snapshot.share_price_e18),
        total_value: Amount::from_unsigned(&total),
        tx_ref,
        direction,
    }
}

/// Derive the next entry for `log` without mutating it.
pub fn derive_entry(log: &BalanceLog, raw: RawSnapshot) -> LedgerEntry {
    let starting = log
        .starting_balance
        .clone()
        .unwrap_or_else(|| raw.total_value.clone());
    let seq = log.last().map_or(1, |e| e.seq + 1);

    let (change, change_pct) = match log.last() {
        Some(prev) => {
            let change = &raw.total_value - &prev.total_value;
            let pct = Decimal::percent_of(change.inner(), prev.total_value.inner());
            (Some(change), pct)
        }
        None => (None, None),
    };

    let cumulative = &raw.total_value - &starting;
    let cumulative_pct = Decimal::percent_of(cumulative.inner(), starting.inner());

    LedgerEntry {
        entry_key: LedgerEntry::compute_entry_key(&log.pool_id, seq, raw.timestamp, &raw.total_value),
        seq,
        timestamp: raw.timestamp,
        balance_token0: raw.balance_token0,
        balance_token1: raw.balance_token1,
        share_price_e18: raw.share_price_e18,
        total_value: raw.total_value,
        tx_ref: raw.tx_ref,
        direction: raw.direction,
        change_from_previous: change,
        change_percent_from_previous: change_pct,
        cumulative_profit: cumulative,
        cumulative_profit_percent: cumulative_pct,
    }
}

/// Apply an already derived entry to the in-memory log.
fn apply_entry(log: &mut BalanceLog, entry: LedgerEntry) {
    if log.starting_balance.is_none() {
        log.starting_balance = Some(entry.total_value.clone());
    }
    log.current_balance = Some(entry.total_value.clone());
    log.trade_count += 1;
    log.entries.push(entry);
}

/// Derive and append in one step.
pub fn append_entry(log: &mut BalanceLog, raw: RawSnapshot) -> LedgerEntry {
    let entry = derive_entry(log, raw);
    apply_entry(log, entry.clone());
    entry
}

/// Rebuild a log from scratch over the same raw sequence.
pub fn replay<I>(
    pool_id: PoolId,
    start_time: TimeMs,
    opening_balance: Option<Amount>,
    raws: I,
) -> BalanceLog
where
    I: IntoIterator<Item = RawSnapshot>,
{
    let mut log = BalanceLog::empty(pool_id, start_time);
    log.starting_balance = opening_balance;
    for raw in raws {
        append_entry(&mut log, raw);
    }
    log
}

/// Aggregate statistics over a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub pool_id: PoolId,
    pub start_time: TimeMs,
    pub last_update_time: Option<TimeMs>,
    pub starting_balance: Option<Amount>,
    pub current_balance: Option<Amount>,
    pub trade_count: u64,
    pub total_profit: Amount,
    pub total_profit_percent: Option<Decimal>,
    pub entries_with_change: u64,
    pub winning_entries: u64,
    pub losing_entries: u64,
    pub win_rate: Option<Decimal>,
    /// Largest peak-to-trough drop, percent of the peak.
    pub max_drawdown_percent: Option<Decimal>,
    pub avg_profit_per_entry: Option<Amount>,
    pub profit_per_hour: Option<Decimal>,
    pub profit_per_day: Option<Decimal>,
}

pub fn compute_summary(log: &BalanceLog, now: TimeMs) -> Summary {
    let last = log.last();
    let total_profit = last.map_or_else(Amount::zero, |e| e.cumulative_profit.clone());
    let total_profit_percent = last.and_then(|e| e.cumulative_profit_percent);

    let mut entries_with_change = 0u64;
    let mut winning_entries = 0u64;
    let mut losing_entries = 0u64;
    for change in log.entries.iter().filter_map(|e| e.change_from_previous.as_ref()) {
        entries_with_change += 1;
        if change.is_positive() {
            winning_entries += 1;
        } else if change.is_negative() {
            losing_entries += 1;
        }
    }
    let win_rate = Decimal::percent_of(
        &BigInt::from(winning_entries),
        &BigInt::from(entries_with_change),
    );

    let max_drawdown_percent = max_drawdown(log)
        .and_then(|(drop, peak)| Decimal::percent_of(&drop, &peak));

    let avg_profit_per_entry = last.and_then(|_| total_profit.div_floor_count(log.trade_count));

    let elapsed_ms = (now.as_ms() - log.start_time.as_ms()).max(MIN_ELAPSED_MS);
    let (profit_per_hour, profit_per_day) = if last.is_some() {
        let profit = total_profit.inner();
        (
            Decimal::scaled_ratio(&(profit * MS_PER_HOUR), &BigInt::from(elapsed_ms)),
            Decimal::scaled_ratio(&(profit * MS_PER_DAY), &BigInt::from(elapsed_ms)),
        )
    } else {
        (None, None)
    };

    Summary {
        pool_id: log.pool_id.clone(),
        start_time: log.start_time,
        last_update_time: last.map(|e| e.timestamp),
        starting_balance: log.starting_balance.clone(),
        current_balance: log.current_balance.clone(),
        trade_count: log.trade_count,
        total_profit,
        total_profit_percent,
        entries_with_change,
        winning_entries,
        losing_entries,
        win_rate,
        max_drawdown_percent,
        avg_profit_per_entry,
        profit_per_hour,
        profit_per_day,
    }
}

/// `(peak - value, peak)` of the deepest drawdown, peak tracked forward from the starting balance.
fn max_drawdown(log: &BalanceLog) -> Option<(BigInt, BigInt)> {
    let mut values = log.entries.iter().map(|e| e.total_value.inner().clone());
    let mut peak = match &log.starting_balance {
        Some(start) => start.inner().clone(),
        None => values.next()?,
    };
    let mut worst: (BigInt, BigInt) = (BigInt::from(0), BigInt::from(1));
    for value in values {
        if value > peak {
            peak = value;
            continue;
        }
        if !peak.is_positive() {
            continue;
        }
        let drop = &peak - &value;
        // drop / peak > worst.0 / worst.1
        if &drop * &worst.1 > &worst.0 * &peak {
            worst = (drop, peak.clone());
        }
    }
    if log.entries.is_empty() {
        return None;
    }
    Some(worst)
}

/// Process-wide ledger for one pool, persisted on every append.
///
/// Appends are serialized by the mutex; the in-memory log only changes after the
/// database write succeeds.
#[derive(Clone)]
pub struct BalanceLedger {
    repo: Arc<Repository>,
    log: Arc<Mutex<BalanceLog>>,
}

impl BalanceLedger {
    /// Load the pool's log, creating an empty one if none is stored.
    ///
    /// # Errors
    /// Returns an error if the load or the initial insert fails.
    pub async fn open(repo: Arc<Repository>, pool_id: PoolId) -> Result<Self, LedgerError> {
        let log = match repo.load_balance_log(&pool_id).await? {
            Some(log) => {
                info!(pool_id = %pool_id, entries = log.entries.len(), "Loaded balance log");
                log
            }
            None => {
                let log = BalanceLog::empty(pool_id.clone(), TimeMs::now());
                repo.save_balance_log_header(&log).await?;
                info!(pool_id = %pool_id, "Initialized empty balance log");
                log
            }
        };
        Ok(Self {
            repo,
            log: Arc::new(Mutex::new(log)),
        })
    }

    /// Fix the starting balance before the first entry. No-op once one is set.
    ///
    /// # Errors
    /// Returns an error if the header write fails.
    pub async fn open_with(&self, opening_balance: Amount) -> Result<bool, LedgerError> {
        let mut log = self.log.lock().await;
        if log.starting_balance.is_some() {
            return Ok(false);
        }
        let mut next = log.clone();
        next.starting_balance = Some(opening_balance);
        self.repo.save_balance_log_header(&next).await?;
        *log = next;
        Ok(true)
    }

    /// Derive, persist and publish the next entry.
    ///
    /// # Errors
    /// Returns an error if the timestamp goes backwards or the write fails; the
    /// in-memory log is unchanged in that case.
    pub async fn append(&self, raw: RawSnapshot) -> Result<LedgerEntry, LedgerError> {
        let mut log = self.log.lock().await;
        if let Some(last) = log.last() {
            if raw.timestamp < last.timestamp {
                return Err(LedgerError::OutOfOrder {
                    timestamp: raw.timestamp.as_ms(),
                    last: last.timestamp.as_ms(),
                });
            }
        }

        let entry = derive_entry(&log, raw);
        let mut next_header = header_of(&log);
        if next_header.starting_balance.is_none() {
            next_header.starting_balance = Some(entry.total_value.clone());
        }
        next_header.current_balance = Some(entry.total_value.clone());
        next_header.trade_count += 1;

        self.repo.append_ledger_entry(&next_header, &entry).await?;
        apply_entry(&mut log, entry.clone());

        info!(
            seq = entry.seq,
            total_value = %entry.total_value,
            cumulative_profit = %entry.cumulative_profit,
            direction = entry.direction.map(|d| d.as_str()).unwrap_or("none"),
            "Ledger entry appended"
        );
        Ok(entry)
    }

    pub async fn summary(&self, now: TimeMs) -> Summary {
        let log = self.log.lock().await;
        compute_summary(&log, now)
    }

    /// Up to `n` entries, most recent first.
    pub async fn recent(&self, n: usize) -> Vec<LedgerEntry> {
        let log = self.log.lock().await;
        log.entries.iter().rev().take(n).cloned().collect()
    }

    pub async fn snapshot(&self) -> BalanceLog {
        self.log.lock().await.clone()
    }

    /// Flat CSV rendering of every entry, oldest first.
    ///
    /// # Errors
    /// Returns an error if the CSV writer fails.
    pub async fn export_csv(&self) -> Result<String, LedgerError> {
        let log = self.log.lock().await;
        entries_to_csv(&log.entries)
    }

    /// Drop every entry and reinitialize the log header.
    ///
    /// # Errors
    /// Returns an error if the reset write fails.
    pub async fn reset(&self, now: TimeMs) -> Result<u64, LedgerError> {
        let mut log = self.log.lock().await;
        let fresh = BalanceLog::empty(log.pool_id.clone(), now);
        let deleted = self.repo.reset_balance_log(&fresh).await?;
        *log = fresh;
        info!(deleted, "Balance log reset");
        Ok(deleted)
    }
}

/// The log without its entries.
fn header_of(log: &BalanceLog) -> BalanceLog {
    BalanceLog {
        pool_id: log.pool_id.clone(),
        start_time: log.start_time,
        starting_balance: log.starting_balance.clone(),
        current_balance: log.current_balance.clone(),
        trade_count: log.trade_count,
        entries: Vec::new(),
    }
}

pub const CSV_HEADERS: [&str; 11] = [
    "timestamp",
    "balanceToken0",
    "balanceToken1",
    "sharePriceE18",
    "totalValue",
    "changeFromPrevious",
    "changePercentFromPrevious",
    "cumulativeProfit",
    "cumulativeProfitPercent",
    "direction",
    "txRef",
];

pub fn entries_to_csv(entries: &[LedgerEntry]) -> Result<String, LedgerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADERS)
        .map_err(|e| LedgerError::Csv(e.to_string()))?;

    for entry in entries {
        let opt = |value: Option<String>| value.unwrap_or_default();
        writer
            .write_record([
                entry.timestamp.to_rfc3339(),
                entry.balance_token0.to_canonical_string(),
                entry.balance_token1.to_canonical_string(),
                entry.share_price_e18.to_canonical_string(),
                entry.total_value.to_canonical_string(),
                opt(entry.change_from_previous.as_ref().map(|a| a.to_canonical_string())),
                opt(entry.change_percent_from_previous.map(|d| d.to_canonical_string())),
                entry.cumulative_profit.to_canonical_string(),
                opt(entry.cumulative_profit_percent.map(|d| d.to_canonical_string())),
                opt(entry.direction.map(|d| d.as_str().to_string())),
                opt(entry.tx_ref.as_ref().map(|t| t.as_str().to_string())),
            ])
            .map_err(|e| LedgerError::Csv(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| LedgerError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LedgerError::Csv(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    const USDC: i64 = 1_000_000;

    fn pool() -> PoolId {
        PoolId::parse(&format!("0x{}", "55".repeat(32))).unwrap()
    }

    fn raw(ts: i64, total: i64) -> RawSnapshot {
        RawSnapshot {
            timestamp: TimeMs::new(ts),
            balance_token0: Amount::zero(),
            balance_token1: Amount::from(total),
            share_price_e18: Amount::from(1_000_000_000_000_000_000i64),
            total_value: Amount::from(total),
            tx_ref: None,
            direction: Some(Direction::ZeroForOne),
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_valuation_folds_decimals() {
        // 2 shares (18 decimals) at 1.5 USDC (6 decimals) + 10 USDC
        let b0 = BigUint::from(2u32) * pow10(18);
        let b1 = BigUint::from(10u32) * pow10(6);
        let price = BigUint::from(15u32) * pow10(17);
        assert_eq!(valuation(&b0, &b1, &price, 18, 6), BigUint::from(13_000_000u32));
        // same decimals, price 1.0
        let v = valuation(&BigUint::from(5u8), &BigUint::from(7u8), &pow10(18), 6, 6);
        assert_eq!(v, BigUint::from(12u8));
    }

    #[test]
    fn test_scenario_profit_sequence() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        log.starting_balance = Some(Amount::from(1_000 * USDC));

        let e1 = append_entry(&mut log, raw(1, 1_010 * USDC));
        let e2 = append_entry(&mut log, raw(2, 1_005 * USDC));
        let e3 = append_entry(&mut log, raw(3, 1_020 * USDC));

        assert_eq!(e1.cumulative_profit, Amount::from(10 * USDC));
        assert_eq!(e2.cumulative_profit, Amount::from(5 * USDC));
        assert_eq!(e3.cumulative_profit, Amount::from(20 * USDC));

        assert_eq!(e1.change_from_previous, None);
        assert_eq!(e1.change_percent_from_previous, None);
        assert_eq!(e2.change_from_previous, Some(Amount::from(-5 * USDC)));
        assert_eq!(e3.change_from_previous, Some(Amount::from(15 * USDC)));
        assert_eq!(e1.cumulative_profit_percent, Some(dec("1")));

        let summary = compute_summary(&log, TimeMs::new(3));
        assert_eq!(summary.entries_with_change, 2);
        assert_eq!(summary.winning_entries, 1);
        assert_eq!(summary.losing_entries, 1);
        assert_eq!(summary.win_rate, Some(dec("50")));
        // 5 / 1010 = 0.4950495...%
        assert_eq!(summary.max_drawdown_percent, Some(dec("0.495049")));
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.total_profit, Amount::from(20 * USDC));
        assert_eq!(summary.avg_profit_per_entry, Some(Amount::from(20 * USDC / 3)));
    }

    #[test]
    fn test_starting_balance_from_first_entry() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        let first = append_entry(&mut log, raw(1, 500));
        assert_eq!(log.starting_balance, Some(Amount::from(500i64)));
        assert_eq!(first.cumulative_profit, Amount::zero());
        assert_eq!(first.cumulative_profit_percent, Some(Decimal::zero()));

        let second = append_entry(&mut log, raw(2, 450));
        assert_eq!(second.cumulative_profit, Amount::from(-50i64));
        assert_eq!(second.cumulative_profit_percent, Some(dec("-10")));
    }

    #[test]
    fn test_zero_change_counts_toward_denominator_only() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        for (ts, v) in [(1, 100), (2, 100), (3, 110), (4, 110)] {
            append_entry(&mut log, raw(ts, v));
        }
        let summary = compute_summary(&log, TimeMs::new(10));
        assert_eq!(summary.entries_with_change, 3);
        assert_eq!(summary.winning_entries, 1);
        assert_eq!(summary.losing_entries, 0);
        assert_eq!(summary.win_rate, Some(dec("33.333333")));
        assert_eq!(summary.max_drawdown_percent, Some(Decimal::zero()));
    }

    #[test]
    fn test_drawdown_uses_running_peak() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        // peak 200 -> 150 (25%), later peak 400 -> 320 (20%)
        for (ts, v) in [(1, 100), (2, 200), (3, 150), (4, 400), (5, 320)] {
            append_entry(&mut log, raw(ts, v));
        }
        let summary = compute_summary(&log, TimeMs::new(10));
        assert_eq!(summary.max_drawdown_percent, Some(dec("25")));
    }

    #[test]
    fn test_empty_summary() {
        let log = BalanceLog::empty(pool(), TimeMs::new(0));
        let summary = compute_summary(&log, TimeMs::new(1));
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.win_rate, None);
        assert_eq!(summary.max_drawdown_percent, None);
        assert_eq!(summary.avg_profit_per_entry, None);
        assert_eq!(summary.profit_per_hour, None);
        assert_eq!(summary.total_profit, Amount::zero());
    }

    #[test]
    fn test_profit_rate_elapsed_floor() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        log.starting_balance = Some(Amount::from(1_000i64));
        append_entry(&mut log, raw(1, 1_010));
        // 1 ms elapsed is floored to 36 s = 0.01 h -> 10 / 0.01 = 1000 per hour
        let summary = compute_summary(&log, TimeMs::new(1));
        assert_eq!(summary.profit_per_hour, Some(dec("1000")));
        assert_eq!(summary.profit_per_day, Some(dec("24000")));

        let summary = compute_summary(&log, TimeMs::new(2 * MS_PER_HOUR));
        assert_eq!(summary.profit_per_hour, Some(dec("5")));
    }

    #[test]
    fn test_replay_matches_incremental() {
        let raws: Vec<RawSnapshot> = [(1, 1_000), (5, 990), (9, 1_030), (9, 1_030), (20, 700)]
            .into_iter()
            .map(|(ts, v)| raw(ts, v))
            .collect();
        let mut incremental = BalanceLog::empty(pool(), TimeMs::new(0));
        for r in raws.clone() {
            append_entry(&mut incremental, r);
        }
        let replayed = replay(pool(), TimeMs::new(0), None, incremental.entries.iter().map(|e| e.raw()));
        assert_eq!(replayed, incremental);
    }

    #[test]
    fn test_csv_columns() {
        let mut log = BalanceLog::empty(pool(), TimeMs::new(0));
        append_entry(&mut log, raw(1_700_000_000_000, 100));
        append_entry(&mut log, raw(1_700_000_060_000, 90));
        let csv = entries_to_csv(&log.entries).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADERS.join(","));
        assert!(lines[1].starts_with("2023-11-14T22:13:20.000Z,0,100,"));
        assert!(lines[2].contains(",-10,-10,"));
        assert!(lines[2].ends_with(",zeroForOne,"));
    }

    async fn ledger() -> (TempDir, Arc<Repository>, BalanceLedger) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&path).await.unwrap()));
        let ledger = BalanceLedger::open(repo.clone(), pool()).await.unwrap();
        (dir, repo, ledger)
    }

    #[tokio::test]
    async fn test_ledger_persists_and_reloads() {
        let (_dir, repo, ledger) = ledger().await;
        assert!(ledger.open_with(Amount::from(1_000i64)).await.unwrap());
        assert!(!ledger.open_with(Amount::from(5i64)).await.unwrap());

        ledger.append(raw(1, 1_010)).await.unwrap();
        ledger.append(raw(2, 1_005)).await.unwrap();

        let reopened = BalanceLedger::open(repo, pool()).await.unwrap();
        assert_eq!(reopened.snapshot().await, ledger.snapshot().await);
        let recent = reopened.recent(1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].seq, 2);
        assert_eq!(recent[0].cumulative_profit, Amount::from(5i64));
    }

    #[tokio::test]
    async fn test_out_of_order_rejected_without_change() {
        let (_dir, _repo, ledger) = ledger().await;
        ledger.append(raw(10, 100)).await.unwrap();
        let err = ledger.append(raw(5, 200)).await.unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { .. }));
        assert_eq!(ledger.snapshot().await.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_reinitializes() {
        let (_dir, repo, ledger) = ledger().await;
        ledger.append(raw(1, 100)).await.unwrap();
        ledger.append(raw(2, 120)).await.unwrap();
        assert_eq!(ledger.reset(TimeMs::new(99)).await.unwrap(), 2);

        let log = ledger.snapshot().await;
        assert!(log.is_empty());
        assert_eq!(log.starting_balance, None);
        assert_eq!(log.start_time, TimeMs::new(99));

        let stored = repo.load_balance_log(&pool()).await.unwrap().unwrap();
        assert_eq!(stored, log);
    }
}
