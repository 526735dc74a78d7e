//! Conversion between relative prices and Q64.96 square-root prices.

use super::{pow10, q192, MathError};
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Decimal exponent of relative prices handled by the codec (1e18 = 1.0).
pub const PRICE_SCALE_DECIMALS: u32 = 18;

/// Floor integer square root by Newton's method.
pub fn isqrt(n: &BigUint) -> BigUint {
    if *n < BigUint::from(2u8) {
        return n.clone();
    }
    let mut x0 = n.clone();
    let mut x1 = (n >> 1u32) + BigUint::one();
    while x1 < x0 {
        x0 = x1;
        x1 = (&x0 + n / &x0) >> 1u32;
    }
    x0
}

/// Square-root price for a relative price (token1 per token0, scaled by 1e18).
///
/// The decimal exponents of both tokens are folded into the radicand so the root is
/// taken once over the full-precision value:
/// `floor(sqrt(price * 10^dec1 * 2^192 / (10^18 * 10^dec0)))`.
pub fn price_to_sqrt_x96(price_e18: &BigUint, dec0: u8, dec1: u8) -> Result<BigUint, MathError> {
    if price_e18.is_zero() {
        return Err(MathError::InvalidPrice("price must be positive".to_string()));
    }
    let num = price_e18 * pow10(dec1 as u32) * q192();
    let den = pow10(PRICE_SCALE_DECIMALS) * pow10(dec0 as u32);
    let sqrt = isqrt(&(num / den));
    if sqrt.is_zero() {
        return Err(MathError::InvalidPrice(format!(
            "price {} too small to represent",
            price_e18
        )));
    }
    Ok(sqrt)
}

/// Relative price (scaled by 1e18) for a square-root price. Inverse of [`price_to_sqrt_x96`].
pub fn sqrt_x96_to_price(sqrt_price_x96: &BigUint, dec0: u8, dec1: u8) -> BigUint {
    let num = sqrt_price_x96 * sqrt_price_x96 * pow10(dec0 as u32) * pow10(PRICE_SCALE_DECIMALS);
    let den = q192() * pow10(dec1 as u32);
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::q96;

    fn e18(units: u64) -> BigUint {
        BigUint::from(units) * pow10(18)
    }

    #[test]
    fn test_isqrt_small_values() {
        for (n, root) in [(0u32, 0u32), (1, 1), (2, 1), (3, 1), (4, 2), (15, 3), (16, 4), (17, 4)] {
            assert_eq!(isqrt(&BigUint::from(n)), BigUint::from(root), "isqrt({})", n);
        }
    }

    #[test]
    fn test_isqrt_is_floor_for_large_values() {
        let n = BigUint::parse_bytes(b"123456789012345678901234567890123456789012345678901234567890", 10)
            .unwrap();
        let r = isqrt(&n);
        assert!(&r * &r <= n);
        let next = &r + BigUint::one();
        assert!(&next * &next > n);
    }

    #[test]
    fn test_unit_price_equal_decimals_is_q96() {
        assert_eq!(price_to_sqrt_x96(&e18(1), 6, 6).unwrap(), q96());
        assert_eq!(price_to_sqrt_x96(&e18(1), 18, 18).unwrap(), q96());
    }

    #[test]
    fn test_decimal_asymmetry_folded_into_radicand() {
        // 1.0 human with token1 carrying 12 more decimals: raw price 1e12, sqrt 1e6.
        assert_eq!(
            price_to_sqrt_x96(&e18(1), 6, 18).unwrap(),
            q96() * BigUint::from(1_000_000u32)
        );
        // Opposite asymmetry: sqrt(1e-12) * 2^96 = 2^96 / 1e6, floored.
        assert_eq!(
            price_to_sqrt_x96(&e18(1), 18, 6).unwrap(),
            q96() / BigUint::from(1_000_000u32)
        );
    }

    #[test]
    fn test_zero_price_rejected() {
        assert!(matches!(
            price_to_sqrt_x96(&BigUint::zero(), 6, 6),
            Err(MathError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_round_trip_within_one_unit() {
        let decimals = [0u8, 6, 8, 18];
        let offsets = [0u64, 1, 123_456_789, 987_654_321_987];
        for d0 in decimals {
            for d1 in decimals {
                // 0.001 .. 1000 (six orders of magnitude)
                for exp in 15u32..=21 {
                    for offset in offsets {
                        let p = pow10(exp) + BigUint::from(offset);
                        let sqrt = price_to_sqrt_x96(&p, d0, d1).unwrap();
                        let back = sqrt_x96_to_price(&sqrt, d0, d1);
                        assert!(back <= p, "overshoot p={} d0={} d1={}", p, d0, d1);
                        assert!(
                            &p - &back <= BigUint::one(),
                            "p={} back={} d0={} d1={}",
                            p,
                            back,
                            d0,
                            d1
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_sqrt_to_price_known_value() {
        // sqrt(1.05) in Q96 maps back to 1.05 within one unit.
        let p = BigUint::from(105u32) * pow10(16);
        let sqrt = price_to_sqrt_x96(&p, 6, 6).unwrap();
        let back = sqrt_x96_to_price(&sqrt, 6, 6);
        assert!(&p - &back <= BigUint::one());
    }
}
