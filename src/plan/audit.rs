use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::config::EngineConfig;
use crate::core::{Result, TIMESTAMP_FORMAT, Value, quote_literal, quote_text};

/// Obscures audit payloads before they are stored.
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, salt: &str, plaintext: &str) -> Result<String>;
}

/// Stores payloads as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

#[async_trait]
impl Cipher for PassthroughCipher {
    async fn encrypt(&self, _salt: &str, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Insert,
    Update,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "Insert"),
            Self::Update => write!(f, "Update"),
        }
    }
}

/// One audited change, waiting for its payload to be encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub parent_table: String,
    pub parent_key: Value,
    pub timestamp: NaiveDateTime,
    pub counter: u32,
    pub table_name: String,
    pub action: AuditAction,
    /// Identity pairs followed by changed-field pairs, names uppercased.
    pub pairs: Vec<(String, Value)>,
}

impl AuditEntry {
    /// Names and values joined by `delimiter`; null values are empty.
    pub fn payload(&self, delimiter: char) -> String {
        let mut pieces = Vec::with_capacity(self.pairs.len() * 2);
        for (name, value) in &self.pairs {
            pieces.push(name.clone());
            pieces.push(value.to_key_string());
        }
        pieces.join(&delimiter.to_string())
    }

    /// Audit-log insert carrying `cipher_text` as the transaction string.
    pub fn to_sql(&self, cipher_text: &str, config: &EngineConfig) -> String {
        let values = [
            quote_text(&self.parent_table),
            quote_literal(&self.parent_key),
            quote_text(&self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
            self.counter.to_string(),
            self.counter.to_string(),
            quote_text(&self.table_name),
            quote_text(&self.action.to_string()),
            quote_text(&config.audit_type),
            quote_text(&config.audit_reason),
            quote_text(&config.system_user),
            "NULL".to_string(),
            quote_text(&config.false_marker),
            quote_text(cipher_text),
        ];
        format!(
            "INSERT INTO {} (parent_table, parent_key, audit_timestamp, counter, trans_order, table_name, \
             action, audit_type, reason, user_name, user_role, record_signed, trans_string) VALUES ({})",
            config.audit_table,
            values.join(", ")
        )
    }
}

/// Audit state of the progenitor subtree being rendered.
#[derive(Debug, Clone)]
pub(crate) struct AuditContext {
    pub parent_table: String,
    pub parent_key: Value,
    pub timestamp: NaiveDateTime,
    pub counter: u32,
}

impl AuditContext {
    pub fn new(parent_table: &str, parent_key: Value, timestamp: NaiveDateTime) -> Self {
        Self {
            parent_table: parent_table.to_string(),
            parent_key,
            timestamp,
            counter: 0,
        }
    }

    pub fn entry(&mut self, table_name: &str, action: AuditAction, pairs: Vec<(String, Value)>) -> AuditEntry {
        self.counter += 1;
        AuditEntry {
            parent_table: self.parent_table.clone(),
            parent_key: self.parent_key.clone(),
            timestamp: self.timestamp,
            counter: self.counter,
            table_name: table_name.to_string(),
            action,
            pairs,
        }
    }
}
