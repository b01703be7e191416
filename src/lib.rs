// ============================================================================
// recordplan library
// ============================================================================

pub mod config;
pub mod core;
pub mod executor;
pub mod facade;
pub mod loader;
pub mod matcher;
pub mod plan;
pub mod proposal;
pub mod reconciler;
pub mod result;
pub mod schema;
pub mod storage;
pub mod tree;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use core::{FieldType, ReconcileError, Result, Value};
pub use executor::Executor;
pub use facade::{EngineContext, ReconciliationRun, RunClock};
pub use loader::{TreeLoader, VersionIndex};
pub use matcher::{MatchOutcome, UpdateMatcher};
pub use plan::{
    AuditAction, AuditEntry, Cipher, PassthroughCipher, Plan, PlanBuilder, PlanItem, Script, Statement,
    StatementKind,
};
pub use proposal::{ProgenitorRef, ProposedRow, ProposedSet};
pub use reconciler::{OrderReconciler, ReconcileSummary};
pub use result::{ExecutionLog, StatementOutcome};
pub use schema::{FieldSpec, RecordTypeSchema, SchemaStore};
pub use storage::{MemoryStore, RelationalStore, Selector};
pub use tree::{Action, FieldValue, NodeId, RecordNode, RecordTree, mark_change};
