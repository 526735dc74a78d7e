//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `ledger.rs` - Balance log header and ledger entry operations
//! - `finalizations.rs` - Pending two-phase finalization records

mod finalizations;
mod ledger;

use sqlx::sqlite::SqlitePool;
use std::str::FromStr;

/// Repository for database operations.
#[derive(Debug)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a stored column, turning bad text into a decode error instead of a silent default.
pub(crate) fn decode_column<T>(column: &str, raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| {
        sqlx::Error::Decode(format!("invalid {} value {:?}: {}", column, raw, e).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Amount;

    #[test]
    fn test_decode_column_reports_column() {
        let ok: Amount = decode_column("total_value", "-42").unwrap();
        assert_eq!(ok, Amount::from(-42i64));

        let err = decode_column::<Amount>("total_value", "4.2").unwrap_err();
        assert!(err.to_string().contains("total_value"));
    }
}
