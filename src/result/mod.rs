pub mod log;

pub use log::{ExecutionLog, StatementOutcome};
