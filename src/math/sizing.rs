//! Exact fee-free trade sizing within a single liquidity band.
//!
//! `sa` is the current square-root price and `sb` the target. Amounts are raw token units,
//! every division truncates, so `amount_out` is an upper bound on what the pool pays.

use super::{q192, q96, sqrt_x96_to_price, MathError};
use crate::domain::{Decimal, Direction};
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use serde::Serialize;

use crate::domain::pool::serialize_biguint;

/// Sized counter-trade for one correction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSizing {
    pub direction: Direction,
    #[serde(serialize_with = "serialize_biguint")]
    pub amount_in: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub amount_out: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub sqrt_price_now: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub sqrt_price_target: BigUint,
    /// Recomputed from the truncated `amount_in`, so it generally misses the target slightly.
    #[serde(serialize_with = "serialize_biguint")]
    pub sqrt_price_post: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub price_post_e18: BigUint,
    /// `(price_post - price_now) / price_now * 100`
    pub price_impact_percent: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SizingOutcome {
    Opportunity(TradeSizing),
    NoOpportunity,
}

/// Pick the direction from the price ordering and size the trade.
///
/// # Errors
///
/// Returns `NoLiquidity` for `L = 0` and `ZeroAmount` when the input truncates to nothing.
/// Equal prices are not an error; they yield [`SizingOutcome::NoOpportunity`].
pub fn size_correction(
    liquidity: u128,
    sqrt_now: &BigUint,
    sqrt_target: &BigUint,
    dec0: u8,
    dec1: u8,
) -> Result<SizingOutcome, MathError> {
    if sqrt_now == sqrt_target {
        return Ok(SizingOutcome::NoOpportunity);
    }
    let sizing = if sqrt_now > sqrt_target {
        size_zero_for_one(liquidity, sqrt_now, sqrt_target, dec0, dec1)?
    } else {
        size_one_for_zero(liquidity, sqrt_now, sqrt_target, dec0, dec1)?
    };
    Ok(SizingOutcome::Opportunity(sizing))
}

/// Push the price down: token0 in, token1 out. Requires `sa > sb`.
pub fn size_zero_for_one(
    liquidity: u128,
    sa: &BigUint,
    sb: &BigUint,
    dec0: u8,
    dec1: u8,
) -> Result<TradeSizing, MathError> {
    if sa <= sb {
        return Err(MathError::OrderingViolation(format!(
            "zeroForOne needs current sqrt price {} above target {}",
            sa, sb
        )));
    }
    check_inputs(liquidity, sa, sb)?;

    let l = BigUint::from(liquidity);
    let diff = sa - sb;

    let amount_in = &l * &diff * q96() / (sa * sb);
    let amount_out = &l * &diff / q96();
    if amount_in.is_zero() {
        return Err(MathError::ZeroAmount);
    }

    let l_q96 = &l * q96();
    let sqrt_post = &l_q96 * sa / (&amount_in * sa + &l_q96);

    Ok(finish(
        Direction::ZeroForOne,
        amount_in,
        amount_out,
        sa,
        sb,
        sqrt_post,
        dec0,
        dec1,
    ))
}

/// Push the price up: token1 in, token0 out. Requires `sa < sb`.
pub fn size_one_for_zero(
    liquidity: u128,
    sa: &BigUint,
    sb: &BigUint,
    dec0: u8,
    dec1: u8,
) -> Result<TradeSizing, MathError> {
    if sa >= sb {
        return Err(MathError::OrderingViolation(format!(
            "oneForZero needs current sqrt price {} below target {}",
            sa, sb
        )));
    }
    check_inputs(liquidity, sa, sb)?;

    let l = BigUint::from(liquidity);

    let amount_in = &l * (sb - sa) / q96();
    let amount_out = &l * (q192() / sa - q192() / sb) / q96();
    if amount_in.is_zero() {
        return Err(MathError::ZeroAmount);
    }

    let sqrt_post = sa + &amount_in * q96() / &l;

    Ok(finish(
        Direction::OneForZero,
        amount_in,
        amount_out,
        sa,
        sb,
        sqrt_post,
        dec0,
        dec1,
    ))
}

fn check_inputs(liquidity: u128, sa: &BigUint, sb: &BigUint) -> Result<(), MathError> {
    if sa.is_zero() || sb.is_zero() {
        return Err(MathError::InvalidPrice("sqrt price must be positive".to_string()));
    }
    if liquidity == 0 {
        return Err(MathError::NoLiquidity);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish(
    direction: Direction,
    amount_in: BigUint,
    amount_out: BigUint,
    sa: &BigUint,
    sb: &BigUint,
    sqrt_post: BigUint,
    dec0: u8,
    dec1: u8,
) -> TradeSizing {
    let price_now = BigInt::from(sqrt_x96_to_price(sa, dec0, dec1));
    let price_post_e18 = sqrt_x96_to_price(&sqrt_post, dec0, dec1);
    let price_impact_percent =
        Decimal::percent_of(&(BigInt::from(price_post_e18.clone()) - &price_now), &price_now);

    TradeSizing {
        direction,
        amount_in,
        amount_out,
        sqrt_price_now: sa.clone(),
        sqrt_price_target: sb.clone(),
        sqrt_price_post: sqrt_post,
        price_post_e18,
        price_impact_percent,
    }
}
