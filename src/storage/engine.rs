use async_trait::async_trait;

use super::Selector;
use crate::core::{Result, Value};

/// One record as returned by the store: lowercased column names in column
/// order, paired with their values.
pub type StoreRow = Vec<(String, Value)>;

/// What the store reports after running a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: usize,
}

/// Relational store seam - the engine never opens or closes the connection,
/// it is always handed an already connected store.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Run one statement.
    async fn execute(&self, sql: &str) -> Result<ExecOutcome>;

    /// Fetch the records of `table` matching `selector`, ordered by `order_by`.
    async fn select(&self, table: &str, selector: &Selector, order_by: &[String]) -> Result<Vec<StoreRow>>;
}

/// Look up a column of a store row.
pub fn row_value<'a>(row: &'a StoreRow, column: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value)
}
