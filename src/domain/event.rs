//! Chain events that can trigger a correction check.

use crate::domain::TxRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a hook fee in pips (100%).
const MAX_FEE_PIPS: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(String),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Closed set of signals accepted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainEvent {
    /// Pool square-root price moved.
    #[serde(rename_all = "camelCase")]
    PriceChanged {
        block_number: u64,
        #[serde(default)]
        tx_ref: Option<TxRef>,
    },
    /// Hook picked a fee for a swap; the swap itself moved the price.
    #[serde(rename_all = "camelCase")]
    FeeChosen {
        block_number: u64,
        #[serde(default)]
        tx_ref: Option<TxRef>,
        raw_fee: u32,
        dev_bps: u32,
        toward: bool,
    },
    /// Reference price changed.
    #[serde(rename_all = "camelCase")]
    NavUpdated { block_number: u64 },
}

impl ChainEvent {
    /// Decode and validate a loosely-typed payload.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EventError> {
        let event: ChainEvent = serde_json::from_value(value.clone())
            .map_err(|e| EventError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.block_number() == 0 {
            return Err(EventError::InvalidField {
                field: "blockNumber",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(tx) = self.tx_ref() {
            TxRef::parse(tx.as_str()).map_err(|e| EventError::InvalidField {
                field: "txRef",
                reason: e.to_string(),
            })?;
        }
        if let ChainEvent::FeeChosen { raw_fee, .. } = self {
            if *raw_fee > MAX_FEE_PIPS {
                return Err(EventError::InvalidField {
                    field: "rawFee",
                    reason: format!("{} exceeds {}", raw_fee, MAX_FEE_PIPS),
                });
            }
        }
        Ok(())
    }

    pub fn block_number(&self) -> u64 {
        match self {
            ChainEvent::PriceChanged { block_number, .. }
            | ChainEvent::FeeChosen { block_number, .. }
            | ChainEvent::NavUpdated { block_number } => *block_number,
        }
    }

    pub fn tx_ref(&self) -> Option<&TxRef> {
        match self {
            ChainEvent::PriceChanged { tx_ref, .. } | ChainEvent::FeeChosen { tx_ref, .. } => {
                tx_ref.as_ref()
            }
            ChainEvent::NavUpdated { .. } => None,
        }
    }
}
