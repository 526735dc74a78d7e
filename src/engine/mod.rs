//! Pure decision logic and the balance ledger.

pub mod ledger;
pub mod selector;

pub use ledger::{
    append_entry, compute_summary, derive_entry, entries_to_csv, replay, snapshot_to_raw,
    valuation, BalanceLedger, LedgerError, Summary, CSV_HEADERS, MIN_ELAPSED_MS,
};
pub use selector::{
    apply_slippage, build_params, deviation_bps, ensure_deadline, evaluate, pool_deviation_bps,
    should_trigger, Evaluation, ExecutionParams, SelectorConfig, SelectorError, BPS_SCALE,
};
