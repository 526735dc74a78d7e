//! SQLite persistence for the balance ledger and queued redemptions.

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
