//! Sequential, best-effort statement execution.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::ReconcileError;
use crate::plan::Statement;
use crate::result::ExecutionLog;
use crate::storage::RelationalStore;

pub struct Executor {
    store: Arc<dyn RelationalStore>,
}

impl Executor {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Run every statement in order. A failure is logged against its
    /// statement and execution continues with the next one.
    pub async fn run(&self, statements: &[Statement]) -> ExecutionLog {
        let mut log = ExecutionLog::new();
        for stmt in statements {
            match self.store.execute(&stmt.sql).await {
                Ok(outcome) => {
                    debug!(kind = %stmt.kind, table = %stmt.table, rows = outcome.rows_affected, "statement executed");
                    log.push(stmt.clone(), Ok(outcome.rows_affected));
                }
                Err(e) => {
                    warn!(kind = %stmt.kind, table = %stmt.table, error = %e, "statement failed");
                    let reason = match e {
                        ReconcileError::Store(message) => message,
                        other => other.to_string(),
                    };
                    log.push(stmt.clone(), Err(ReconcileError::StatementFailed(reason)));
                }
            }
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::plan::StatementKind;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_failure_does_not_stop_execution() {
        let store = Arc::new(MemoryStore::new().with_rows(
            "item",
            vec![vec![("id", Value::from(1)), ("qty", Value::from(1))]],
        ));
        store.fail_on("qty = 2").await;

        let statements = vec![
            Statement::new(StatementKind::Update, "item", "UPDATE item\nSET qty = 2\nWHERE id = 1"),
            Statement::new(StatementKind::Update, "item", "UPDATE item\nSET qty = 3\nWHERE id = 1"),
            Statement::new(StatementKind::Delete, "item", "DELETE FROM item\nWHERE id = 9"),
        ];
        let log = Executor::new(store.clone()).run(&statements).await;

        assert_eq!(log.len(), 3);
        assert_eq!(log.failed(), 1);
        assert!(matches!(log.outcomes()[0].result, Err(ReconcileError::StatementFailed(_))));
        assert_eq!(log.outcomes()[1].result, Ok(1));
        assert_eq!(log.outcomes()[2].result, Ok(0));
        assert_eq!(store.executed().await.len(), 3);
    }
}
