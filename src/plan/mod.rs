//! Rendering the annotated tree into executable statements.

pub mod audit;
pub mod builder;

use std::fmt;

use tracing::warn;

use crate::config::EngineConfig;
use crate::core::ReconcileError;

pub use audit::{AuditAction, AuditEntry, Cipher, PassthroughCipher};
pub use builder::PlanBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    /// Registers a new progenitor version in the versions table.
    VersionRecord,
    Audit,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::VersionRecord => write!(f, "version"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub sql: String,
}

impl Statement {
    pub fn new(kind: StatementKind, table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            sql: sql.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanItem {
    Statement(Statement),
    Audit(AuditEntry),
}

/// Ordered statements and audit entries of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    items: Vec<PlanItem>,
}

/// A plan with every audit entry turned into a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub statements: Vec<Statement>,
    /// Audit entries that could not be encrypted and were left out.
    pub dropped: Vec<ReconcileError>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: PlanItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.items.iter().filter_map(|item| match item {
            PlanItem::Statement(stmt) => Some(stmt),
            PlanItem::Audit(_) => None,
        })
    }

    pub fn audit_entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.items.iter().filter_map(|item| match item {
            PlanItem::Audit(entry) => Some(entry),
            PlanItem::Statement(_) => None,
        })
    }

    /// Encrypt every audit payload and embed it in an audit-log insert.
    ///
    /// An entry whose encryption fails is dropped on its own; the rest of
    /// the plan is kept in order.
    pub async fn finalize(&self, cipher: &dyn Cipher, config: &EngineConfig) -> Script {
        let mut script = Script::default();
        for item in &self.items {
            match item {
                PlanItem::Statement(stmt) => script.statements.push(stmt.clone()),
                PlanItem::Audit(entry) => {
                    let payload = entry.payload(config.payload_delimiter);
                    match cipher.encrypt(&config.audit_salt, &payload).await {
                        Ok(cipher_text) => script.statements.push(Statement::new(
                            StatementKind::Audit,
                            config.audit_table.clone(),
                            entry.to_sql(&cipher_text, config),
                        )),
                        Err(e) => {
                            warn!(table = %entry.table_name, counter = entry.counter, error = %e, "audit entry dropped");
                            script.dropped.push(ReconcileError::EncryptionFailed {
                                table: entry.table_name.clone(),
                                counter: entry.counter,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
        script
    }

    /// Script text for review; audit entries appear as comments.
    pub fn sql_preview(&self) -> String {
        self.items
            .iter()
            .map(|item| match item {
                PlanItem::Statement(stmt) => format!("{};", stmt.sql),
                PlanItem::Audit(entry) => format!(
                    "-- audit #{}: {} {} ({} {})",
                    entry.counter, entry.action, entry.table_name, entry.parent_table, entry.parent_key
                ),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
