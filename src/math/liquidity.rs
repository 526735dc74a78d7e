//! Position amounts and the per-tick liquidity table around the current price.

use super::{q96, sqrt_x96_at_tick, sqrt_x96_to_price, MathError, MAX_TICK, MIN_TICK};
use crate::domain::pool::{serialize_biguint, serialize_i128, serialize_u128};
use crate::domain::{Amount, TickLiquidity};
use num_bigint::{BigInt, BigUint};
use serde::Serialize;

/// One boundary tick of the liquidity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityBand {
    pub tick: i32,
    /// Start of the band holding the current price.
    pub is_current_band: bool,
    #[serde(serialize_with = "serialize_biguint")]
    pub sqrt_price_x96: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub price_e18: BigUint,
    #[serde(serialize_with = "serialize_u128")]
    pub liquidity_gross: u128,
    #[serde(serialize_with = "serialize_i128")]
    pub liquidity_net: i128,
    /// Active liquidity once the price crosses this boundary upward.
    pub liquidity_after_up: Amount,
}

/// Token amounts backing `liquidity` over `[tick_lower, tick_upper]`.
///
/// Below the range the position is all token0, above it all token1.
pub fn position_amounts(
    liquidity: u128,
    current_tick: i32,
    sqrt_price_x96: &BigUint,
    tick_lower: i32,
    tick_upper: i32,
) -> Result<(BigUint, BigUint), MathError> {
    let a = sqrt_x96_at_tick(tick_lower)?;
    let b = sqrt_x96_at_tick(tick_upper)?;
    let (lower, upper) = if a < b { (a, b) } else { (b, a) };
    let l = BigUint::from(liquidity);

    if current_tick < tick_lower.min(tick_upper) {
        let amount0 = &l * (&upper - &lower) * q96() / (&upper * &lower);
        return Ok((amount0, BigUint::default()));
    }
    if current_tick > tick_lower.max(tick_upper) {
        let amount1 = &l * (&upper - &lower) / q96();
        return Ok((BigUint::default(), amount1));
    }

    // tick and sqrt price can disagree by rounding at a boundary
    let sp = sqrt_price_x96.clone().clamp(lower.clone(), upper.clone());
    let amount0 = &l * (&upper - &sp) * q96() / (&upper * &sp);
    let amount1 = &l * (&sp - &lower) / q96();
    Ok((amount0, amount1))
}

/// Boundary ticks `steps` spacings either side of the band holding `tick_now`.
pub fn window_ticks(tick_now: i32, tick_spacing: i32, steps: u32) -> Result<Vec<i32>, MathError> {
    if tick_spacing <= 0 {
        return Err(MathError::InvalidTickSpacing(tick_spacing));
    }
    let base = tick_now.div_euclid(tick_spacing) * tick_spacing;
    let steps = steps as i64;
    Ok((-steps..=steps)
        .map(|i| base as i64 + i * tick_spacing as i64)
        .filter(|t| (MIN_TICK as i64..=MAX_TICK as i64).contains(t))
        .map(|t| t as i32)
        .collect())
}

/// Walk the window upward from the current band, applying each boundary's net liquidity.
///
/// Ticks missing from `ticks` are treated as uninitialized.
pub fn liquidity_window(
    liquidity_now: u128,
    tick_now: i32,
    tick_spacing: i32,
    steps: u32,
    ticks: &[TickLiquidity],
    dec0: u8,
    dec1: u8,
) -> Result<Vec<LiquidityBand>, MathError> {
    let window = window_ticks(tick_now, tick_spacing, steps)?;
    let base = tick_now.div_euclid(tick_spacing) * tick_spacing;

    let mut cursor = BigInt::from(liquidity_now);
    let mut bands = Vec::with_capacity(window.len());
    for t in window {
        let info = ticks.iter().find(|info| info.tick == t);
        let (gross, net) = info.map_or((0, 0), |i| (i.liquidity_gross, i.liquidity_net));

        let sqrt = sqrt_x96_at_tick(t)?;
        let price_e18 = sqrt_x96_to_price(&sqrt, dec0, dec1);

        let after_up = if t >= base {
            cursor += BigInt::from(net);
            cursor.clone()
        } else {
            cursor.clone()
        };

        bands.push(LiquidityBand {
            tick: t,
            is_current_band: t == base,
            sqrt_price_x96: sqrt,
            price_e18,
            liquidity_gross: gross,
            liquidity_net: net,
            liquidity_after_up: Amount::new(after_up),
        });
    }
    Ok(bands)
}
