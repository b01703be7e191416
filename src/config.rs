use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::Result;

/// Engine configuration
///
/// Names the bookkeeping columns and tables the engine reads and writes.
/// Every field has a default, so a JSON config file only needs the keys
/// that differ from a standard installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Progenitor field holding the last-changed timestamp
    pub changed_at_field: String,

    /// Progenitor field holding the last-changed user
    pub changed_by_field: String,

    /// Marker written into the changed-by field and the audit user
    pub system_user: String,

    /// Position column of order-significant kinds
    pub order_field: String,

    /// Key name carrying record versions
    pub version_field: String,

    /// Table tracking the latest version per progenitor
    pub versions_table: String,

    /// Table receiving audit statements
    pub audit_table: String,

    /// Salt handed to the cipher with every audit payload
    pub audit_salt: String,

    /// Reason recorded on each audit row
    pub audit_reason: String,

    /// Audit type recorded on each audit row
    pub audit_type: String,

    /// Single-character rendering of boolean defaults
    pub true_marker: String,
    pub false_marker: String,

    /// Separator between audit payload pieces
    pub payload_delimiter: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            changed_at_field: "changed_on".to_string(),
            changed_by_field: "changed_by".to_string(),
            system_user: "SYSTEM".to_string(),
            order_field: "order_number".to_string(),
            version_field: "version".to_string(),
            versions_table: "versions".to_string(),
            audit_table: "table_audit_log".to_string(),
            audit_salt: "UnLicensed copy - Demo only".to_string(),
            audit_reason: "Imported using Data Importer".to_string(),
            audit_type: "TableUpdate".to_string(),
            true_marker: "T".to_string(),
            false_marker: "F".to_string(),
            payload_delimiter: '\u{1}',
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the audit-stamp field names
    pub fn stamp_fields(mut self, changed_at: &str, changed_by: &str) -> Self {
        self.changed_at_field = changed_at.to_string();
        self.changed_by_field = changed_by.to_string();
        self
    }

    /// Set the system user marker
    pub fn system_user(mut self, user: &str) -> Self {
        self.system_user = user.to_string();
        self
    }

    /// Set the position column
    pub fn order_field(mut self, field: &str) -> Self {
        self.order_field = field.to_string();
        self
    }

    /// Set the audit table
    pub fn audit_table(mut self, table: &str) -> Self {
        self.audit_table = table.to_string();
        self
    }

    /// Set the audit salt
    pub fn audit_salt(mut self, salt: &str) -> Self {
        self.audit_salt = salt.to_string();
        self
    }

    /// Set the audit reason
    pub fn audit_reason(mut self, reason: &str) -> Self {
        self.audit_reason = reason.to_string();
        self
    }

    /// True when `field` is one of the progenitor audit stamps.
    pub fn is_stamp_field(&self, field: &str) -> bool {
        field == self.changed_at_field || field == self.changed_by_field
    }

    pub fn boolean_marker(&self, value: bool) -> &str {
        if value { &self.true_marker } else { &self.false_marker }
    }

    /// Parse from JSON text
    ///
    /// # Examples
    ///
    /// ```
    /// use recordplan::EngineConfig;
    ///
    /// let config = EngineConfig::from_json(r#"{ "audit_table": "audit" }"#).unwrap();
    /// assert_eq!(config.audit_table, "audit");
    /// assert_eq!(config.order_field, "order_number");
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
