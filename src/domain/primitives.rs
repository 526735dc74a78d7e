//! Domain primitives: TimeMs, ChainTime, PoolId, TxRef, Direction.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wall-clock time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// RFC 3339 rendering used by exports and API responses.
    pub fn to_rfc3339(&self) -> String {
        use chrono::TimeZone;
        match chrono::Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            None => self.0.to_string(),
        }
    }
}

/// Block timestamp in seconds, as reported by the chain.
///
/// Deadlines are always expressed in chain time, never client time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChainTime(pub u64);

impl ChainTime {
    pub fn new(secs: u64) -> Self {
        ChainTime(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn plus_secs(&self, secs: u64) -> Self {
        ChainTime(self.0.saturating_add(secs))
    }
}

impl fmt::Display for ChainTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct HexParseError {
    pub kind: &'static str,
    pub value: String,
}

fn is_hex_of_len(s: &str, bytes: usize) -> bool {
    s.len() == 2 + bytes * 2 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Pool identifier (32-byte hex, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl PoolId {
    /// Parse and normalize a pool id.
    pub fn parse(s: &str) -> Result<Self, HexParseError> {
        let trimmed = s.trim().to_ascii_lowercase();
        if !is_hex_of_len(&trimmed, 32) {
            return Err(HexParseError {
                kind: "pool id",
                value: s.to_string(),
            });
        }
        Ok(PoolId(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transaction reference (32-byte hex hash, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn parse(s: &str) -> Result<Self, HexParseError> {
        let trimmed = s.trim().to_ascii_lowercase();
        if !is_hex_of_len(&trimmed, 32) {
            return Err(HexParseError {
                kind: "tx reference",
                value: s.to_string(),
            });
        }
        Ok(TxRef(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correction direction.
///
/// `ZeroForOne` sells token0 into the pool and pushes the price down; it settles in a
/// single mint-then-sell transaction. `OneForZero` buys token0 from the pool and pushes
/// the price up; the acquired token0 is queued for redemption and finalized later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// token0 in, token1 out, price down.
    ZeroForOne,
    /// token1 in, token0 out, price up.
    OneForZero,
}

impl Direction {
    pub fn pushes_price_down(&self) -> bool {
        matches!(self, Direction::ZeroForOne)
    }

    /// True when the correction needs a second finalization step.
    pub fn is_two_phase(&self) -> bool {
        matches!(self, Direction::OneForZero)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ZeroForOne => "zeroForOne",
            Direction::OneForZero => "oneForZero",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zeroForOne" => Some(Direction::ZeroForOne),
            "oneForZero" => Some(Direction::OneForZero),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_serialization() {
        let json = serde_json::to_string(&Direction::ZeroForOne).unwrap();
        assert_eq!(json, "\"zeroForOne\"");
        let json = serde_json::to_string(&Direction::OneForZero).unwrap();
        assert_eq!(json, "\"oneForZero\"");
        assert_eq!(Direction::parse("oneForZero"), Some(Direction::OneForZero));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn test_direction_phases() {
        assert!(Direction::ZeroForOne.pushes_price_down());
        assert!(!Direction::ZeroForOne.is_two_phase());
        assert!(Direction::OneForZero.is_two_phase());
    }

    #[test]
    fn test_pool_id_normalized() {
        let raw = format!("0x{}", "AB".repeat(32));
        let id = PoolId::parse(&raw).unwrap();
        assert_eq!(id.as_str(), format!("0x{}", "ab".repeat(32)));
        assert!(PoolId::parse("0x1234").is_err());
    }

    #[test]
    fn test_tx_ref_rejects_garbage() {
        assert!(TxRef::parse(&format!("0x{}", "zz".repeat(32))).is_err());
        assert!(TxRef::parse(&format!("0x{}", "01".repeat(32))).is_ok());
    }

    #[test]
    fn test_chain_time_plus() {
        assert_eq!(ChainTime::new(100).plus_secs(10), ChainTime::new(110));
        assert_eq!(ChainTime::new(u64::MAX).plus_secs(1), ChainTime::new(u64::MAX));
    }

    #[test]
    fn test_timems_ordering() {
        let t1 = TimeMs::new(1000);
        let t2 = TimeMs::new(2000);
        assert!(t1 < t2);
        assert_eq!(TimeMs::new(0).to_rfc3339(), "1970-01-01T00:00:00.000Z");
    }
}
