//! Deviation check, direction selection and slippage-bounded execution parameters.

use crate::domain::{ChainTime, Direction, PoolState, TargetPrice};
use crate::math::{self, MathError, SizingOutcome, TradeSizing};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;
use thiserror::Error;

use crate::domain::pool::serialize_biguint;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("reference price must be positive")]
    InvalidReferencePrice,
    #[error("slippage tolerance {0}% must be below 100%")]
    InvalidSlippage(u32),
    /// Chain time caught up with the deadline between sizing and submission.
    #[error("deadline {deadline} already reached at chain time {now}")]
    DeadlineExpired { deadline: ChainTime, now: ChainTime },
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Knobs for direction selection and parameter building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    pub trigger_bps: u32,
    pub slippage_pct: u32,
    pub deadline_margin_secs: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            trigger_bps: 500,
            slippage_pct: 1,
            deadline_margin_secs: 3000,
        }
    }
}

/// `|target - now| * 10000 / target`, truncated. Saturates at `u64::MAX`.
pub fn deviation_bps(price_now_e18: &BigUint, target_e18: &BigUint) -> Result<u64, SelectorError> {
    if target_e18.is_zero() {
        return Err(SelectorError::InvalidReferencePrice);
    }
    let diff = if price_now_e18 > target_e18 {
        price_now_e18 - target_e18
    } else {
        target_e18 - price_now_e18
    };
    let bps = diff * BigUint::from(BPS_SCALE) / target_e18;
    Ok(bps.to_u64().unwrap_or(u64::MAX))
}

/// Bound on single-bps corrections applied to the rebuilt-price estimate.
const ROUNDING_STEPS: usize = 4;

/// Whole-bps deviation of an encoded pool price from the reference, decided on sqrt prices.
///
/// The pool has deviated by at least `k` bps when its sqrt price sits at or beyond the
/// encoded sqrt of `target * (10000 ± k) / 10000`. The floored price rebuilt from the
/// sqrt price only seeds the search, so a pool priced exactly on a boundary reads the
/// same on both sides of the reference for any token decimals.
pub fn pool_deviation_bps(
    sqrt_now: &BigUint,
    target_e18: &BigUint,
    dec0: u8,
    dec1: u8,
) -> Result<u64, SelectorError> {
    if target_e18.is_zero() {
        return Err(SelectorError::InvalidReferencePrice);
    }
    let sqrt_target = math::price_to_sqrt_x96(target_e18, dec0, dec1)?;
    if *sqrt_now == sqrt_target {
        return Ok(0);
    }
    let above = *sqrt_now > sqrt_target;

    let rebuilt = math::sqrt_x96_to_price(sqrt_now, dec0, dec1);
    let mut bps = deviation_bps(&rebuilt, target_e18)?;
    for _ in 0..ROUNDING_STEPS {
        match bps.checked_add(1) {
            Some(next) if crossed(sqrt_now, target_e18, next, above, dec0, dec1)? => bps = next,
            _ => break,
        }
    }
    for _ in 0..ROUNDING_STEPS {
        if bps == 0 || crossed(sqrt_now, target_e18, bps, above, dec0, dec1)? {
            break;
        }
        bps -= 1;
    }
    Ok(bps)
}

fn crossed(
    sqrt_now: &BigUint,
    target_e18: &BigUint,
    bps: u64,
    above: bool,
    dec0: u8,
    dec1: u8,
) -> Result<bool, SelectorError> {
    let scale = BigUint::from(BPS_SCALE);
    if above {
        let bound = target_e18 * (&scale + bps) / &scale;
        return Ok(*sqrt_now >= math::price_to_sqrt_x96(&bound, dec0, dec1)?);
    }
    if bps >= BPS_SCALE as u64 {
        return Ok(false);
    }
    let bound = target_e18 * (&scale - bps) / &scale;
    match math::price_to_sqrt_x96(&bound, dec0, dec1) {
        Ok(sqrt_bound) => Ok(*sqrt_now <= sqrt_bound),
        // bound below the smallest encodable price
        Err(MathError::InvalidPrice(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Inclusive threshold: a deviation equal to the trigger fires.
pub fn should_trigger(deviation_bps: u64, trigger_bps: u32) -> bool {
    deviation_bps >= trigger_bps as u64
}

/// Result of comparing the pool against the reference price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(serialize_with = "serialize_biguint")]
    pub price_now_e18: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub target_price_e18: BigUint,
    pub deviation_bps: u64,
    pub triggered: bool,
    pub outcome: SizingOutcome,
}

impl Evaluation {
    pub fn sizing(&self) -> Option<&TradeSizing> {
        match &self.outcome {
            SizingOutcome::Opportunity(sizing) => Some(sizing),
            SizingOutcome::NoOpportunity => None,
        }
    }
}

/// Compare a fresh pool state with the reference price and size the correction if triggered.
///
/// # Errors
///
/// `Math` errors (ordering, liquidity, zero amount) surface unchanged.
pub fn evaluate(
    pool: &PoolState,
    target: &TargetPrice,
    trigger_bps: u32,
) -> Result<Evaluation, SelectorError> {
    let dec0 = pool.token0_decimals;
    let dec1 = pool.token1_decimals;
    let price_now_e18 = math::sqrt_x96_to_price(&pool.sqrt_price_x96, dec0, dec1);
    let deviation = pool_deviation_bps(&pool.sqrt_price_x96, target.as_e18(), dec0, dec1)?;
    let triggered = should_trigger(deviation, trigger_bps);

    let outcome = if triggered && deviation > 0 {
        let sqrt_target = math::price_to_sqrt_x96(target.as_e18(), dec0, dec1)?;
        math::size_correction(
            pool.active_liquidity,
            &pool.sqrt_price_x96,
            &sqrt_target,
            dec0,
            dec1,
        )?
    } else {
        SizingOutcome::NoOpportunity
    };

    Ok(Evaluation {
        price_now_e18,
        target_price_e18: target.as_e18().clone(),
        deviation_bps: deviation,
        triggered,
        outcome,
    })
}

/// Submission bounds for one correction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParams {
    pub direction: Direction,
    /// Exactly the sized input; sizing is exact so there is no buffer.
    #[serde(serialize_with = "serialize_biguint")]
    pub max_amount_in: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub min_amount_out: BigUint,
    /// Minimum vault shares minted before the sell leg (mint-then-sell only).
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_biguint")]
    pub min_intermediate_out: Option<BigUint>,
    pub deadline: ChainTime,
}

/// `amount * (100 - pct) / 100`, floor.
pub fn apply_slippage(amount: &BigUint, slippage_pct: u32) -> Result<BigUint, SelectorError> {
    if slippage_pct >= 100 {
        return Err(SelectorError::InvalidSlippage(slippage_pct));
    }
    Ok(amount * BigUint::from(100 - slippage_pct) / BigUint::from(100u32))
}

/// Derive execution bounds from a sizing.
///
/// `chain_now` must be the chain's block time; the deadline is re-checked with
/// [`ensure_deadline`] right before submission.
pub fn build_params(
    sizing: &TradeSizing,
    config: &SelectorConfig,
    chain_now: ChainTime,
    expected_intermediate: Option<&BigUint>,
) -> Result<ExecutionParams, SelectorError> {
    let min_amount_out = apply_slippage(&sizing.amount_out, config.slippage_pct)?;
    let min_intermediate_out = match (sizing.direction, expected_intermediate) {
        (Direction::ZeroForOne, Some(shares)) => Some(apply_slippage(shares, config.slippage_pct)?),
        _ => None,
    };
    Ok(ExecutionParams {
        direction: sizing.direction,
        max_amount_in: sizing.amount_in.clone(),
        min_amount_out,
        min_intermediate_out,
        deadline: chain_now.plus_secs(config.deadline_margin_secs),
    })
}

/// Abort when the deadline is not strictly in the future at submission time.
pub fn ensure_deadline(params: &ExecutionParams, chain_now: ChainTime) -> Result<(), SelectorError> {
    if params.deadline <= chain_now {
        return Err(SelectorError::DeadlineExpired {
            deadline: params.deadline,
            now: chain_now,
        });
    }
    Ok(())
}

fn serialize_opt_biguint<S: serde::Serializer>(
    value: &Option<BigUint>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_biguint(v, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeMs;
    use crate::math::{pow10, price_to_sqrt_x96};

    fn e18(num: u64, den: u64) -> BigUint {
        pow10(18) * BigUint::from(num) / BigUint::from(den)
    }

    fn pool_at(price_e18: &BigUint, liquidity: u128) -> PoolState {
        let sqrt = price_to_sqrt_x96(price_e18, 6, 6).unwrap();
        PoolState::new(liquidity, sqrt, 0, 6, 6, TimeMs::new(0)).unwrap()
    }

    #[test]
    fn test_deviation_bps_integer() {
        let target = e18(1, 1);
        assert_eq!(deviation_bps(&e18(10499, 10000), &target).unwrap(), 499);
        assert_eq!(deviation_bps(&e18(105, 100), &target).unwrap(), 500);
        assert_eq!(deviation_bps(&e18(95, 100), &target).unwrap(), 500);
        assert_eq!(deviation_bps(&target, &target).unwrap(), 0);
        assert_eq!(
            deviation_bps(&target, &BigUint::zero()),
            Err(SelectorError::InvalidReferencePrice)
        );
    }

    #[test]
    fn test_trigger_boundary_inclusive() {
        assert!(!should_trigger(499, 500));
        assert!(should_trigger(500, 500));
        assert!(should_trigger(501, 500));
    }

    #[test]
    fn test_evaluate_below_threshold() {
        let target = TargetPrice::new(e18(1, 1));
        let pool = pool_at(&e18(1049, 1000), 1_000_000_000);
        let eval = evaluate(&pool, &target, 500).unwrap();
        assert!(!eval.triggered);
        assert_eq!(eval.outcome, SizingOutcome::NoOpportunity);
    }

    #[test]
    fn test_evaluate_sizes_when_triggered() {
        let target = TargetPrice::new(e18(1, 1));
        let pool = pool_at(&e18(106, 100), 1_000_000_000);
        let eval = evaluate(&pool, &target, 500).unwrap();
        assert!(eval.triggered);
        let sizing = eval.sizing().unwrap();
        assert_eq!(sizing.direction, Direction::ZeroForOne);
    }

    #[test]
    fn test_boundary_prices_trigger_for_any_decimals() {
        let target = TargetPrice::new(e18(1, 1));
        for (dec0, dec1) in [(6u8, 6u8), (18, 6), (6, 18), (8, 18)] {
            for (num, den, direction) in [
                (105u64, 100u64, Direction::ZeroForOne),
                (95, 100, Direction::OneForZero),
            ] {
                let sqrt = price_to_sqrt_x96(&e18(num, den), dec0, dec1).unwrap();
                let pool = PoolState::new(10u128.pow(18), sqrt, 0, dec0, dec1, TimeMs::new(0)).unwrap();
                let eval = evaluate(&pool, &target, 500).unwrap();
                assert_eq!(eval.deviation_bps, 500, "{}/{} at decimals {}/{}", num, den, dec0, dec1);
                assert!(eval.triggered);
                assert_eq!(eval.sizing().unwrap().direction, direction);
            }
            for (num, den) in [(10_499u64, 10_000u64), (9_501, 10_000)] {
                let sqrt = price_to_sqrt_x96(&e18(num, den), dec0, dec1).unwrap();
                let pool = PoolState::new(10u128.pow(18), sqrt, 0, dec0, dec1, TimeMs::new(0)).unwrap();
                let eval = evaluate(&pool, &target, 500).unwrap();
                assert_eq!(eval.deviation_bps, 499, "{}/{} at decimals {}/{}", num, den, dec0, dec1);
                assert!(!eval.triggered);
            }
        }
    }

    #[test]
    fn test_pool_deviation_is_zero_at_reference() {
        let target = e18(3, 2);
        let sqrt = price_to_sqrt_x96(&target, 18, 6).unwrap();
        assert_eq!(pool_deviation_bps(&sqrt, &target, 18, 6).unwrap(), 0);
        assert_eq!(
            pool_deviation_bps(&sqrt, &BigUint::zero(), 18, 6),
            Err(SelectorError::InvalidReferencePrice)
        );
    }

    #[test]
    fn test_evaluate_no_liquidity_surfaces() {
        let target = TargetPrice::new(e18(1, 1));
        let pool = pool_at(&e18(90, 100), 0);
        assert_eq!(
            evaluate(&pool, &target, 500),
            Err(SelectorError::Math(MathError::NoLiquidity))
        );
    }

    fn sizing(direction: Direction, amount_in: u64, amount_out: u64) -> TradeSizing {
        TradeSizing {
            direction,
            amount_in: BigUint::from(amount_in),
            amount_out: BigUint::from(amount_out),
            sqrt_price_now: BigUint::from(2u8),
            sqrt_price_target: BigUint::from(1u8),
            sqrt_price_post: BigUint::from(1u8),
            price_post_e18: BigUint::from(1u8),
            price_impact_percent: None,
        }
    }

    #[test]
    fn test_build_params_slippage_floor() {
        let config = SelectorConfig::default();
        let params = build_params(
            &sizing(Direction::OneForZero, 1_000, 999),
            &config,
            ChainTime::new(100),
            None,
        )
        .unwrap();
        assert_eq!(params.max_amount_in, BigUint::from(1_000u32));
        // 999 * 99 / 100 = 989.01 -> 989
        assert_eq!(params.min_amount_out, BigUint::from(989u32));
        assert_eq!(params.deadline, ChainTime::new(3100));
        assert_eq!(params.min_intermediate_out, None);
    }

    #[test]
    fn test_build_params_intermediate_only_for_mint_then_sell() {
        let config = SelectorConfig {
            slippage_pct: 2,
            ..SelectorConfig::default()
        };
        let shares = BigUint::from(5_000u32);
        let down = build_params(
            &sizing(Direction::ZeroForOne, 10, 10),
            &config,
            ChainTime::new(0),
            Some(&shares),
        )
        .unwrap();
        assert_eq!(down.min_intermediate_out, Some(BigUint::from(4_900u32)));

        let up = build_params(
            &sizing(Direction::OneForZero, 10, 10),
            &config,
            ChainTime::new(0),
            Some(&shares),
        )
        .unwrap();
        assert_eq!(up.min_intermediate_out, None);
    }

    #[test]
    fn test_invalid_slippage_rejected() {
        let config = SelectorConfig {
            slippage_pct: 100,
            ..SelectorConfig::default()
        };
        let err = build_params(&sizing(Direction::OneForZero, 1, 1), &config, ChainTime::new(0), None)
            .unwrap_err();
        assert_eq!(err, SelectorError::InvalidSlippage(100));
    }

    #[test]
    fn test_deadline_expired_after_delay() {
        let config = SelectorConfig {
            deadline_margin_secs: 10,
            ..SelectorConfig::default()
        };
        let sized_at = ChainTime::new(1_700_000_000);
        let params =
            build_params(&sizing(Direction::ZeroForOne, 5, 5), &config, sized_at, None).unwrap();
        assert!(ensure_deadline(&params, sized_at.plus_secs(9)).is_ok());
        assert_eq!(
            ensure_deadline(&params, sized_at.plus_secs(15)),
            Err(SelectorError::DeadlineExpired {
                deadline: sized_at.plus_secs(10),
                now: sized_at.plus_secs(15),
            })
        );
        // equal is expired too
        assert!(ensure_deadline(&params, sized_at.plus_secs(10)).is_err());
    }
}
