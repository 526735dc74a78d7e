//! Balance ledger records.

use crate::domain::{Amount, Decimal, Direction, PoolId, TimeMs, TxRef};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Executor holdings as read from chain, in raw token units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub balance_token0: BigUint,
    pub balance_token1: BigUint,
    /// Reference price (token1 per token0) scaled by 1e18.
    pub share_price_e18: BigUint,
}

/// A valuation snapshot before any derived field is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub timestamp: TimeMs,
    pub balance_token0: Amount,
    pub balance_token1: Amount,
    pub share_price_e18: Amount,
    /// Token1-equivalent valuation at `share_price_e18`.
    pub total_value: Amount,
    pub tx_ref: Option<TxRef>,
    pub direction: Option<Direction>,
}

/// One immutable, timestamped ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Stable unique identifier for this entry.
    pub entry_key: String,
    /// Position in the log, starting at 1.
    pub seq: u64,
    pub timestamp: TimeMs,
    pub balance_token0: Amount,
    pub balance_token1: Amount,
    pub share_price_e18: Amount,
    pub total_value: Amount,
    pub tx_ref: Option<TxRef>,
    pub direction: Option<Direction>,
    pub change_from_previous: Option<Amount>,
    pub change_percent_from_previous: Option<Decimal>,
    pub cumulative_profit: Amount,
    pub cumulative_profit_percent: Option<Decimal>,
}

impl LedgerEntry {
    /// The raw snapshot this entry was derived from.
    pub fn raw(&self) -> RawSnapshot {
        RawSnapshot {
            timestamp: self.timestamp,
            balance_token0: self.balance_token0.clone(),
            balance_token1: self.balance_token1.clone(),
            share_price_e18: self.share_price_e18.clone(),
            total_value: self.total_value.clone(),
            tx_ref: self.tx_ref.clone(),
            direction: self.direction,
        }
    }

    /// Compute a stable key from the pool, position and valuation.
    ///
    /// Truncated SHA-256 (128 bits) over length-prefixed fields.
    pub fn compute_entry_key(
        pool_id: &PoolId,
        seq: u64,
        timestamp: TimeMs,
        total_value: &Amount,
    ) -> String {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, pool_id.as_str());
        hasher.update(seq.to_le_bytes());
        hasher.update(timestamp.as_ms().to_le_bytes());
        hash_var(&mut hasher, &total_value.to_canonical_string());
        let hash = hasher.finalize();
        format!("entry:{}", hex::encode(&hash[..16]))
    }
}

/// Ordered, append-only ledger for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceLog {
    pub pool_id: PoolId,
    pub start_time: TimeMs,
    /// Fixed by the first entry unless opened with an explicit balance.
    pub starting_balance: Option<Amount>,
    pub current_balance: Option<Amount>,
    pub trade_count: u64,
    pub entries: Vec<LedgerEntry>,
}

impl BalanceLog {
    /// An empty log, as created on first start or after a reset.
    pub fn empty(pool_id: PoolId, start_time: TimeMs) -> Self {
        Self {
            pool_id,
            start_time,
            starting_balance: None,
            current_balance: None,
            trade_count: 0,
            entries: Vec::new(),
        }
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
