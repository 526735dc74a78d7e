//! Second-phase records for queued redemptions.

use crate::domain::{Amount, PoolId, TimeMs, TxRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinalizationStatus {
    /// Waiting for the unlock time or currently being completed.
    Pending,
    Finalized,
    /// Completion failed; waits for an operator retry.
    Failed,
}

impl FinalizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationStatus::Pending => "pending",
            FinalizationStatus::Finalized => "finalized",
            FinalizationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FinalizationStatus::Pending),
            "finalized" => Some(FinalizationStatus::Finalized),
            "failed" => Some(FinalizationStatus::Failed),
            _ => None,
        }
    }

    /// Still holds the executor's queued redemption.
    pub fn is_open(&self) -> bool {
        !matches!(self, FinalizationStatus::Finalized)
    }
}

impl fmt::Display for FinalizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for a newly queued redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFinalization {
    pub pool_id: PoolId,
    pub tx_ref: Option<TxRef>,
    pub amount_in: Amount,
    pub expected_out: Amount,
    pub queued_at: TimeMs,
    pub unlock_at: TimeMs,
}

/// A persisted two-phase correction awaiting (or past) completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFinalization {
    pub id: i64,
    pub pool_id: PoolId,
    /// Transaction that acquired and queued the redemption.
    pub tx_ref: Option<TxRef>,
    pub amount_in: Amount,
    pub expected_out: Amount,
    pub queued_at: TimeMs,
    pub unlock_at: TimeMs,
    pub status: FinalizationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub completion_tx_ref: Option<TxRef>,
}

impl PendingFinalization {
    /// Milliseconds until unlock, zero once unlocked.
    pub fn wait_ms(&self, now: TimeMs) -> u64 {
        (self.unlock_at.as_ms() - now.as_ms()).max(0) as u64
    }
}
