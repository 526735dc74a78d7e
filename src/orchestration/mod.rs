pub mod driver;
pub mod finalizer;
pub mod monitor;
pub mod watch;

pub use driver::{CycleError, DriverState, ExecutionDriver, Submission};
pub use finalizer::Finalizer;
pub use monitor::{CheckReport, CycleOutcome, Monitor, MonitorConfig, PoolView};
pub use watch::Watcher;
