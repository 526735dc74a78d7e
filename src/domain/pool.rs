//! Point-in-time pool observations.

use crate::domain::TimeMs;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolStateError {
    #[error("pool is not initialized (sqrt price is zero)")]
    Uninitialized,
    #[error("tick {0} outside the valid tick range")]
    TickOutOfRange(i32),
    #[error("token decimals {0} exceed the supported maximum")]
    DecimalsTooLarge(u8),
}

/// Largest decimal exponent accepted for a token.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

/// Current observed state of the pool.
///
/// Immutable once read; every correction cycle reads a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    #[serde(serialize_with = "serialize_u128")]
    pub active_liquidity: u128,
    #[serde(serialize_with = "serialize_biguint")]
    pub sqrt_price_x96: BigUint,
    pub tick: i32,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    pub read_at: TimeMs,
}

impl PoolState {
    /// Validate a freshly read state at the boundary.
    pub fn new(
        active_liquidity: u128,
        sqrt_price_x96: BigUint,
        tick: i32,
        token0_decimals: u8,
        token1_decimals: u8,
        read_at: TimeMs,
    ) -> Result<Self, PoolStateError> {
        if sqrt_price_x96.is_zero() {
            return Err(PoolStateError::Uninitialized);
        }
        if !(crate::math::MIN_TICK..=crate::math::MAX_TICK).contains(&tick) {
            return Err(PoolStateError::TickOutOfRange(tick));
        }
        for dec in [token0_decimals, token1_decimals] {
            if dec > MAX_TOKEN_DECIMALS {
                return Err(PoolStateError::DecimalsTooLarge(dec));
            }
        }
        Ok(Self {
            active_liquidity,
            sqrt_price_x96,
            tick,
            token0_decimals,
            token1_decimals,
            read_at,
        })
    }
}

/// Reference ("NAV") price, token1 per token0, scaled by 1e18.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TargetPrice(#[serde(serialize_with = "serialize_biguint")] pub BigUint);

impl TargetPrice {
    pub fn new(price_e18: BigUint) -> Self {
        TargetPrice(price_e18)
    }

    pub fn as_e18(&self) -> &BigUint {
        &self.0
    }
}

/// Per-tick liquidity boundary as reported by the pool state view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickLiquidity {
    pub tick: i32,
    #[serde(serialize_with = "serialize_u128")]
    pub liquidity_gross: u128,
    #[serde(serialize_with = "serialize_i128")]
    pub liquidity_net: i128,
}

pub(crate) fn serialize_biguint<S: serde::Serializer>(
    value: &BigUint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_str_radix(10))
}

pub(crate) fn serialize_u128<S: serde::Serializer>(
    value: &u128,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub(crate) fn serialize_i128<S: serde::Serializer>(
    value: &i128,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}
