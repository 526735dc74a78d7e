pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod math;
pub mod orchestration;

pub use config::Config;
pub use datasource::{
    DataSourceError, DryRunExecutor, Executor, MockExecutor, MockStateReader, RpcStateReader,
    StateReader,
};
pub use db::{init_db, Repository};
pub use domain::{
    Amount, ChainEvent, ChainTime, Decimal, Direction, LedgerEntry, PoolId, PoolState,
    TargetPrice, TimeMs, TxRef,
};
pub use engine::{BalanceLedger, Summary};
pub use error::AppError;
pub use orchestration::{CheckReport, Monitor, MonitorConfig};
