pub mod context;
pub mod run;

pub use context::{EngineContext, RunClock};
pub use run::ReconciliationRun;
