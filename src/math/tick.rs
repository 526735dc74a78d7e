//! Square-root price at a tick, bit for bit with the on-chain tick math.

use super::{MathError, RESOLUTION};
use num_bigint::BigUint;
use num_traits::{One, Zero};

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// `sqrt_x96_at_tick(MIN_TICK)`
pub const MIN_SQRT_RATIO: u64 = 4295128739;

/// `sqrt_x96_at_tick(MAX_TICK)`
pub const MAX_SQRT_RATIO: &str = "1461446703485210103287273052203988822378723970342";

/// Q128 value of `1 / sqrt(1.0001)` for bit 0 of the absolute tick.
const RATIO_BIT0: u128 = 0xfffcb933bd6fad37aa2d162d1a594001;

/// Q128 values of `1 / sqrt(1.0001)^(2^i)` for bits 1..=19.
const RATIO_PER_BIT: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

pub fn max_sqrt_ratio() -> BigUint {
    BigUint::parse_bytes(MAX_SQRT_RATIO.as_bytes(), 10).unwrap_or_default()
}

/// `sqrt(1.0001^tick) * 2^96`, rounded up.
///
/// The per-bit table multiplies towards `1 / sqrt(1.0001)^|tick|` in Q128. Positive ticks
/// take the reciprocal through a full-width 256-bit division, then the Q128 result is
/// narrowed to Q96 rounding up.
pub fn sqrt_x96_at_tick(tick: i32) -> Result<BigUint, MathError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(MathError::TickOutOfRange(tick));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 1 != 0 {
        BigUint::from(RATIO_BIT0)
    } else {
        BigUint::one() << 128u32
    };
    for (i, factor) in RATIO_PER_BIT.iter().enumerate() {
        if abs_tick & (1u32 << (i + 1)) != 0 {
            ratio = (ratio * BigUint::from(*factor)) >> 128u32;
        }
    }

    if tick > 0 {
        let u256_max = (BigUint::one() << 256u32) - BigUint::one();
        ratio = u256_max / ratio;
    }

    let shift = 128 - RESOLUTION;
    let mask = (BigUint::one() << shift) - BigUint::one();
    let round_up = !(&ratio & &mask).is_zero();
    let mut sqrt = ratio >> shift;
    if round_up {
        sqrt += 1u32;
    }
    Ok(sqrt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{q192, q96};

    #[test]
    fn test_tick_zero_is_unit_price() {
        assert_eq!(sqrt_x96_at_tick(0).unwrap(), q96());
    }

    #[test]
    fn test_extreme_ticks_match_bounds() {
        assert_eq!(sqrt_x96_at_tick(MIN_TICK).unwrap(), BigUint::from(MIN_SQRT_RATIO));
        assert_eq!(sqrt_x96_at_tick(MAX_TICK).unwrap(), max_sqrt_ratio());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(sqrt_x96_at_tick(MAX_TICK + 1), Err(MathError::TickOutOfRange(MAX_TICK + 1)));
        assert_eq!(sqrt_x96_at_tick(MIN_TICK - 1), Err(MathError::TickOutOfRange(MIN_TICK - 1)));
    }

    #[test]
    fn test_negative_tick_is_reciprocal() {
        let tolerance = BigUint::one() << 128u32;
        for t in [1, 60, 1_000, 50_000, 200_000] {
            let up = sqrt_x96_at_tick(t).unwrap();
            let down = sqrt_x96_at_tick(-t).unwrap();
            assert!(up > q96() && down < q96(), "tick {}", t);
            let product = &up * &down;
            let diff = if product > q192() {
                &product - q192()
            } else {
                q192() - &product
            };
            assert!(diff <= tolerance, "tick {} product off by {}", t, diff);
        }
    }

    #[test]
    fn test_monotonic_in_tick() {
        let mut prev = sqrt_x96_at_tick(-1_000).unwrap();
        for t in (-999..=1_000).step_by(37) {
            let cur = sqrt_x96_at_tick(t).unwrap();
            assert!(cur > prev, "tick {}", t);
            prev = cur;
        }
    }
}
