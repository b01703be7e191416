use std::fmt;

use crate::core::{Value, quote_literal, quote_text};

/// Right-hand side of one selector predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorValue {
    Literal(Value),
    /// The version currently registered for a progenitor in the versions
    /// table, resolved by the store at query time.
    LatestVersion {
        versions_table: String,
        kind: String,
        name: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: SelectorValue,
}

/// Conjunction of `column = value` predicates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selector {
    predicates: Vec<Predicate>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, SelectorValue::Literal(value.into()));
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: SelectorValue) {
        self.predicates.push(Predicate {
            column: column.into(),
            value,
        });
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Full query text as a SQL store would receive it.
    pub fn to_select_sql(&self, table: &str, order_by: &[String]) -> String {
        let order = if order_by.is_empty() {
            "1".to_string()
        } else {
            order_by.join(", ")
        };
        format!("SELECT *\nFROM {}\nWHERE {}\nORDER BY {}", table, self, order)
    }
}

impl fmt::Display for SelectorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", quote_literal(value)),
            Self::LatestVersion {
                versions_table,
                kind,
                name,
            } => write!(
                f,
                "(SELECT version FROM {} WHERE table_name = {} AND name = {})",
                versions_table,
                quote_text(kind),
                quote_text(&name.to_key_string())
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return write!(f, "1 = 1");
        }
        let parts: Vec<String> = self
            .predicates
            .iter()
            .map(|p| format!("{} = {}", p.column, p.value))
            .collect();
        write!(f, "{}", parts.join(" AND "))
    }
}
