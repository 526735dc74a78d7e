//! Arbitrary-precision raw token amounts.
//!
//! Settlement values (balances, valuations, profit deltas) are integers in raw token
//! units. They serialize as decimal strings so no JSON consumer rounds them through f64.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Signed raw-unit amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigInt);

impl Amount {
    pub fn new(value: BigInt) -> Self {
        Amount(value)
    }

    pub fn zero() -> Self {
        Amount(BigInt::zero())
    }

    pub fn from_unsigned(value: &BigUint) -> Self {
        Amount(BigInt::from_biguint(Sign::Plus, value.clone()))
    }

    pub fn inner(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Division by a count rounded toward negative infinity (per-entry averages).
    pub fn div_floor_count(&self, count: u64) -> Option<Amount> {
        if count == 0 {
            return None;
        }
        Some(Amount(self.0.div_floor(&BigInt::from(count))))
    }

    /// Canonical decimal string, no separators, leading `-` when negative.
    pub fn to_canonical_string(&self) -> String {
        self.0.to_str_radix(10)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigInt::from_str(s.trim()).map(Amount)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(BigInt::from(value))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(BigInt::from(value))
    }
}

impl From<BigInt> for Amount {
    fn from(value: BigInt) -> Self {
        Amount(value)
    }
}

impl std::ops::Add for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl std::ops::Sub for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Amount {
        Amount(&self.0 - &rhs.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_parse_and_format() {
        let a = Amount::from_str("-123456789012345678901234567890").unwrap();
        assert!(a.is_negative());
        assert_eq!(a.to_canonical_string(), "-123456789012345678901234567890");
        assert!(Amount::from_str("12.5").is_err());
    }

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::from(1_010_000_000i64);
        let b = Amount::from(1_000_000_000i64);
        assert_eq!(&a - &b, Amount::from(10_000_000i64));
        assert_eq!(&a + &b, Amount::from(2_010_000_000i64));
    }

    #[test]
    fn test_amount_div_floor_count() {
        let a = Amount::from(20_000_000i64);
        assert_eq!(a.div_floor_count(3), Some(Amount::from(6_666_666i64)));
        assert_eq!(a.div_floor_count(0), None);

        let loss = Amount::from(-20_000_000i64);
        assert_eq!(loss.div_floor_count(3), Some(Amount::from(-6_666_667i64)));
        assert_eq!(Amount::from(-9i64).div_floor_count(3), Some(Amount::from(-3i64)));
    }

    #[test]
    fn test_amount_serializes_as_string() {
        let json = serde_json::to_value(Amount::from(42i64)).unwrap();
        assert_eq!(json, serde_json::json!("42"));
        let back: Amount = serde_json::from_value(json).unwrap();
        assert_eq!(back, Amount::from(42i64));
    }
}
