//! Fixed-point AMM math.
//!
//! All settlement values are arbitrary-precision integers; every division truncates.
//! Square-root prices use Q64.96 notation (`sqrt(price) * 2^96`).

pub mod liquidity;
pub mod price;
pub mod sizing;
pub mod tick;

use num_bigint::BigUint;
use num_traits::One;
use thiserror::Error;

pub use liquidity::{liquidity_window, position_amounts, window_ticks, LiquidityBand};
pub use price::{isqrt, price_to_sqrt_x96, sqrt_x96_to_price, PRICE_SCALE_DECIMALS};
pub use sizing::{size_correction, size_one_for_zero, size_zero_for_one, SizingOutcome, TradeSizing};
pub use tick::{max_sqrt_ratio, sqrt_x96_at_tick, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK};

/// Fractional bits of the square-root price representation.
pub const RESOLUTION: u32 = 96;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    /// Caller asked for a direction that contradicts the price ordering.
    #[error("ordering violation: {0}")]
    OrderingViolation(String),
    #[error("no active liquidity")]
    NoLiquidity,
    /// Sizing truncated to a zero input; nothing can be submitted.
    #[error("sized amount truncates to zero")]
    ZeroAmount,
    #[error("invalid price: {0}")]
    InvalidPrice(String),
    #[error("tick {0} outside the valid tick range")]
    TickOutOfRange(i32),
    #[error("tick spacing must be positive, got {0}")]
    InvalidTickSpacing(i32),
}

/// `2^96`
pub fn q96() -> BigUint {
    BigUint::one() << RESOLUTION
}

/// `2^192`
pub fn q192() -> BigUint {
    BigUint::one() << (2 * RESOLUTION)
}

/// `10^exp`
pub fn pow10(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}
