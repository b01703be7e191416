use std::collections::HashMap;

use async_trait::async_trait;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tokio::sync::{Mutex, RwLock};

use super::{ExecOutcome, RelationalStore, Selector, SelectorValue, StoreRow, row_value};
use crate::core::{ReconcileError, Result, Value};

/// In-process relational store.
///
/// Answers selector queries over plain row lists and applies the DML the
/// planner generates (`INSERT ... VALUES`, `UPDATE ... SET`, `DELETE FROM`,
/// each with a conjunction of equality predicates). Tables are schemaless
/// and created on first insert.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<StoreRow>>>,
    executed: Mutex<Vec<String>>,
    failing: RwLock<Vec<String>>,
    versions_table: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            failing: RwLock::new(Vec::new()),
            versions_table: "versions".to_string(),
        }
    }

    pub fn versions_table(mut self, table: &str) -> Self {
        self.versions_table = table.to_lowercase();
        self
    }

    /// Seed a table with rows; column names are lowercased.
    pub fn with_rows<I, R, K, V>(mut self, table: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let entry = self
            .tables
            .get_mut()
            .entry(table.to_lowercase())
            .or_default();
        for row in rows {
            entry.push(
                row.into_iter()
                    .map(|(column, value)| (column.into().to_lowercase(), value.into()))
                    .collect(),
            );
        }
        self
    }

    /// Seed from JSON of the form `{ "table": [ { "column": value, ... } ] }`.
    pub fn from_json(text: &str) -> Result<Self> {
        let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut store = Self::new();
        for (table, rows) in document {
            let serde_json::Value::Array(rows) = rows else {
                return Err(ReconcileError::Serialization(format!(
                    "table '{}' must hold an array of rows",
                    table
                )));
            };
            let mut parsed = Vec::with_capacity(rows.len());
            for row in rows {
                let serde_json::Value::Object(columns) = row else {
                    return Err(ReconcileError::Serialization(format!(
                        "rows of table '{}' must be objects",
                        table
                    )));
                };
                parsed.push(
                    columns
                        .into_iter()
                        .map(|(column, value)| (column, Value::from(value)))
                        .collect::<Vec<_>>(),
                );
            }
            store = store.with_rows(&table, parsed);
        }
        Ok(store)
    }

    /// Make every statement containing `pattern` fail.
    pub async fn fail_on(&self, pattern: &str) {
        self.failing.write().await.push(pattern.to_string());
    }

    pub async fn rows(&self, table: &str) -> Vec<StoreRow> {
        self.tables
            .read()
            .await
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Statements received through `execute`, in arrival order.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    /// Export every table as JSON, in the shape `from_json` reads.
    pub async fn to_json(&self) -> Result<String> {
        let tables = self.tables.read().await;
        let mut document = serde_json::Map::new();
        for (table, rows) in tables.iter() {
            let rows: Vec<serde_json::Value> = rows
                .iter()
                .map(|row| {
                    let mut columns = serde_json::Map::new();
                    for (column, value) in row {
                        columns.insert(column.clone(), serde_json::to_value(value).unwrap_or_default());
                    }
                    serde_json::Value::Object(columns)
                })
                .collect();
            document.insert(table.clone(), serde_json::Value::Array(rows));
        }
        Ok(serde_json::to_string_pretty(&document)?)
    }

    fn latest_version(&self, tables: &HashMap<String, Vec<StoreRow>>, kind: &str, name: &Value) -> Option<Value> {
        tables
            .get(&self.versions_table)?
            .iter()
            .filter(|row| {
                row_value(row, "table_name").is_some_and(|t| t.loosely_equals(&Value::Text(kind.to_string())))
                    && row_value(row, "name").is_some_and(|n| n.loosely_equals(name))
            })
            .filter_map(|row| row_value(row, "version").cloned())
            .max_by(|a, b| a.compare(b))
    }

    fn matches(&self, tables: &HashMap<String, Vec<StoreRow>>, row: &StoreRow, selector: &Selector) -> bool {
        selector.predicates().iter().all(|predicate| {
            let expected = match &predicate.value {
                SelectorValue::Literal(value) => Some(value.clone()),
                SelectorValue::LatestVersion { kind, name, .. } => self.latest_version(tables, kind, name),
            };
            match (row_value(row, &predicate.column), expected) {
                (Some(actual), Some(expected)) => actual.loosely_equals(&expected),
                _ => false,
            }
        })
    }

    fn apply(&self, tables: &mut HashMap<String, Vec<StoreRow>>, stmt: sql_ast::Statement) -> Result<usize> {
        match stmt {
            sql_ast::Statement::Insert(insert) => {
                let table = insert.table.to_string().to_lowercase();
                let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
                let Some(source) = insert.source else {
                    return Err(ReconcileError::Store("INSERT requires a VALUES clause".into()));
                };
                let sql_ast::SetExpr::Values(values) = *source.body else {
                    return Err(ReconcileError::Store("Only VALUES clause supported".into()));
                };

                let mut inserted = 0;
                for exprs in values.rows {
                    if exprs.len() != columns.len() {
                        return Err(ReconcileError::Store(format!(
                            "INSERT into '{}' has {} columns but {} values",
                            table,
                            columns.len(),
                            exprs.len()
                        )));
                    }
                    let row = columns
                        .iter()
                        .cloned()
                        .zip(exprs.into_iter().map(literal_value))
                        .map(|(column, value)| value.map(|v| (column, v)))
                        .collect::<Result<StoreRow>>()?;
                    tables.entry(table.clone()).or_default().push(row);
                    inserted += 1;
                }
                Ok(inserted)
            }
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table_name = match table.relation {
                    sql_ast::TableFactor::Table { name, .. } => name.to_string().to_lowercase(),
                    _ => {
                        return Err(ReconcileError::Store(
                            "Complex table references not supported in UPDATE".into(),
                        ));
                    }
                };
                let assignments = assignments
                    .into_iter()
                    .map(|assign| {
                        let column = match assign.target {
                            sql_ast::AssignmentTarget::ColumnName(col_name) => col_name.to_string().to_lowercase(),
                            _ => {
                                return Err(ReconcileError::Store(
                                    "Only simple column names supported in UPDATE".into(),
                                ));
                            }
                        };
                        Ok((column, literal_value(assign.value)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let conditions = selection.map(conditions).transpose()?.unwrap_or_default();

                let rows = tables
                    .get_mut(&table_name)
                    .ok_or_else(|| ReconcileError::Store(format!("Table '{}' not found", table_name)))?;
                let mut updated = 0;
                for row in rows.iter_mut().filter(|row| satisfies(row, &conditions)) {
                    for (column, value) in &assignments {
                        match row.iter_mut().find(|(name, _)| name == column) {
                            Some(slot) => slot.1 = value.clone(),
                            None => row.push((column.clone(), value.clone())),
                        }
                    }
                    updated += 1;
                }
                Ok(updated)
            }
            sql_ast::Statement::Delete(delete) => {
                let tables_with_joins = match delete.from {
                    sql_ast::FromTable::WithFromKeyword(tables) => tables,
                    sql_ast::FromTable::WithoutKeyword(tables) => tables,
                };
                let Some(first) = tables_with_joins.into_iter().next() else {
                    return Err(ReconcileError::Store("DELETE requires a table name".into()));
                };
                let table_name = match first.relation {
                    sql_ast::TableFactor::Table { name, .. } => name.to_string().to_lowercase(),
                    _ => {
                        return Err(ReconcileError::Store(
                            "Complex table references not supported in DELETE".into(),
                        ));
                    }
                };
                let conditions = delete.selection.map(conditions).transpose()?.unwrap_or_default();

                let rows = tables
                    .get_mut(&table_name)
                    .ok_or_else(|| ReconcileError::Store(format!("Table '{}' not found", table_name)))?;
                let before = rows.len();
                rows.retain(|row| !satisfies(row, &conditions));
                Ok(before - rows.len())
            }
            other => Err(ReconcileError::Store(format!(
                "Statement type not supported: {}",
                other
            ))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn execute(&self, sql: &str) -> Result<ExecOutcome> {
        self.executed.lock().await.push(sql.to_string());

        if let Some(pattern) = self.failing.read().await.iter().find(|p| sql.contains(p.as_str())) {
            return Err(ReconcileError::Store(format!("rejected statement matching '{}'", pattern)));
        }

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| ReconcileError::Store(e.to_string()))?;

        let mut tables = self.tables.write().await;
        let mut rows_affected = 0;
        for stmt in statements {
            rows_affected += self.apply(&mut tables, stmt)?;
        }
        Ok(ExecOutcome { rows_affected })
    }

    async fn select(&self, table: &str, selector: &Selector, order_by: &[String]) -> Result<Vec<StoreRow>> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(&table.to_lowercase())
            .ok_or_else(|| ReconcileError::Store(format!("Table '{}' not found", table)))?;

        let mut matched: Vec<StoreRow> = rows
            .iter()
            .filter(|row| self.matches(&tables, row, selector))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            order_by
                .iter()
                .map(|column| {
                    let left = row_value(a, column).cloned().unwrap_or(Value::Null);
                    let right = row_value(b, column).cloned().unwrap_or(Value::Null);
                    left.compare(&right)
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matched)
    }
}

fn satisfies(row: &StoreRow, conditions: &[(String, Value)]) -> bool {
    conditions.iter().all(|(column, expected)| {
        row_value(row, column).is_some_and(|actual| actual.loosely_equals(expected))
    })
}

/// Flatten `a = 1 AND b = 'x'` into column/value pairs.
fn conditions(expr: sql_ast::Expr) -> Result<Vec<(String, Value)>> {
    match expr {
        sql_ast::Expr::Nested(inner) => conditions(*inner),
        sql_ast::Expr::BinaryOp {
            left,
            op: sql_ast::BinaryOperator::And,
            right,
        } => {
            let mut parts = conditions(*left)?;
            parts.extend(conditions(*right)?);
            Ok(parts)
        }
        sql_ast::Expr::BinaryOp {
            left,
            op: sql_ast::BinaryOperator::Eq,
            right,
        } => match *left {
            sql_ast::Expr::Identifier(ident) => Ok(vec![(ident.value.to_lowercase(), literal_value(*right)?)]),
            other => Err(ReconcileError::Store(format!(
                "Only column = literal predicates supported, got: {}",
                other
            ))),
        },
        other => Err(ReconcileError::Store(format!(
            "Unsupported predicate: {}",
            other
        ))),
    }
}

fn literal_value(expr: sql_ast::Expr) -> Result<Value> {
    match expr {
        sql_ast::Expr::Value(value_with_span) => match value_with_span.value {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else {
                    n.parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| ReconcileError::Store(format!("Invalid number: {}", n)))
                }
            }
            sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => Ok(Value::Text(s)),
            sql_ast::Value::Boolean(b) => Ok(Value::Boolean(b)),
            sql_ast::Value::Null => Ok(Value::Null),
            other => Err(ReconcileError::Store(format!("Unsupported value: {}", other))),
        },
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Minus,
            expr,
        } => match literal_value(*expr)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ReconcileError::Store(format!("Cannot negate {}", other.type_name()))),
        },
        other => Err(ReconcileError::Store(format!("Expected a literal, got: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new().with_rows(
            "Sample",
            vec![
                vec![("NAME", Value::from("S1")), ("qty", Value::from(5))],
                vec![("NAME", Value::from("S2")), ("qty", Value::from(3))],
            ],
        )
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let store = store();
        let rows = store
            .select("sample", &Selector::new(), &["qty".to_string()])
            .await
            .unwrap();
        assert_eq!(row_value(&rows[0], "name"), Some(&Value::from("S2")));

        let rows = store
            .select("sample", &Selector::new().eq("name", "S1"), &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_select_unknown_table_fails() {
        assert!(store().select("missing", &Selector::new(), &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_applies_generated_dml() {
        let store = store();
        let outcome = store
            .execute("UPDATE sample\nSET qty = 7\nWHERE name = 'S1'")
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, 1);

        store
            .execute("INSERT INTO sample (name, qty) VALUES ('S3', -1)")
            .await
            .unwrap();
        let outcome = store.execute("DELETE FROM sample\nWHERE name = 'S2'").await.unwrap();
        assert_eq!(outcome.rows_affected, 1);

        let rows = store.rows("sample").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(row_value(&rows[0], "qty"), Some(&Value::Integer(7)));
        assert_eq!(row_value(&rows[1], "qty"), Some(&Value::Integer(-1)));
    }

    #[tokio::test]
    async fn test_latest_version_predicate() {
        let store = MemoryStore::new()
            .with_rows(
                "recipe",
                vec![
                    vec![("name", Value::from("S1")), ("version", Value::from(1))],
                    vec![("name", Value::from("S1")), ("version", Value::from(2))],
                ],
            )
            .with_rows(
                "versions",
                vec![vec![
                    ("table_name", Value::from("Recipe")),
                    ("name", Value::from("S1")),
                    ("version", Value::from(2)),
                ]],
            );

        let mut selector = Selector::new().eq("name", "S1");
        selector.push(
            "version",
            SelectorValue::LatestVersion {
                versions_table: "versions".into(),
                kind: "Recipe".into(),
                name: Value::from("S1"),
            },
        );
        let rows = store.select("recipe", &selector, &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(row_value(&rows[0], "version"), Some(&Value::Integer(2)));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = store();
        store.fail_on("qty = 9").await;
        assert!(store.execute("UPDATE sample SET qty = 9 WHERE name = 'S1'").await.is_err());
        assert_eq!(store.executed().await.len(), 1);
    }
}
