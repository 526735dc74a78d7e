//! Domain types for the NAV peg arbitrage engine.
//!
//! This module provides:
//! - Arbitrary-precision raw amounts and display decimals
//! - Domain primitives: TimeMs, ChainTime, PoolId, TxRef, Direction
//! - Pool observations, ledger records and chain events
//! - Pending two-phase finalizations

pub mod amount;
pub mod decimal;
pub mod event;
pub mod finalization;
pub mod ledger;
pub mod pool;
pub mod primitives;

pub use amount::Amount;
pub use decimal::Decimal;
pub use event::{ChainEvent, EventError};
pub use finalization::{FinalizationStatus, NewFinalization, PendingFinalization};
pub use ledger::{BalanceLog, BalanceSnapshot, LedgerEntry, RawSnapshot};
pub use pool::{PoolState, PoolStateError, TargetPrice, TickLiquidity};
pub use primitives::{ChainTime, Direction, HexParseError, PoolId, TimeMs, TxRef};
