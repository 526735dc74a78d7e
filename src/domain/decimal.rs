//! Display decimal backed by rust_decimal.
//!
//! Settlement math never touches this type. It only renders ratios of finalized
//! integers (percentages, win rate, drawdown) for humans.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits kept by every derived percentage.
pub const DISPLAY_SCALE: u32 = 6;

/// Lossless decimal for display values.
///
/// Serializes to JSON number (not string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// `numerator / denominator * 100`, truncated toward zero at [`DISPLAY_SCALE`] digits.
    ///
    /// Returns `None` for a zero denominator or a result outside the decimal range.
    pub fn percent_of(numerator: &BigInt, denominator: &BigInt) -> Option<Self> {
        Self::scaled_ratio(&(numerator * BigInt::from(100u32)), denominator)
    }

    /// `numerator / denominator`, truncated toward zero at [`DISPLAY_SCALE`] digits.
    pub fn scaled_ratio(numerator: &BigInt, denominator: &BigInt) -> Option<Self> {
        if denominator.is_zero() {
            return None;
        }
        let scaled = numerator * BigInt::from(10u64.pow(DISPLAY_SCALE)) / denominator;
        let raw = scaled.to_i128()?;
        RustDecimal::try_from_i128_with_scale(raw, DISPLAY_SCALE)
            .ok()
            .map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}
