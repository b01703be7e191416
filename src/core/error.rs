use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Record type '{0}' not found")]
    SchemaNotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Record type '{0}' already exists")]
    KindExists(String),

    #[error("Missing {} for record type '{kind}'", key_list(.keys))]
    MissingKeyFields { kind: String, keys: Vec<String> },

    #[error("No {0} updates defined")]
    EmptyProposal(String),

    #[error("Unable to insert {kind} {identity} due to missing field definitions")]
    InsertionBlocked { kind: String, identity: String },

    #[error("Failed to load {kind} records ({selector}): {reason}")]
    LoadSubtreeFailed {
        kind: String,
        selector: String,
        reason: String,
    },

    #[error("Statement failed: {0}")]
    StatementFailed(String),

    #[error("Encryption failed for {table} audit entry {counter}: {reason}")]
    EncryptionFailed {
        table: String,
        counter: u32,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ReconcileError {
    /// Only a missing schema stops a run; everything else degrades to a
    /// partial, inspectable result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SchemaNotFound(_) | Self::InvalidSchema(_))
    }
}

fn key_list(keys: &[String]) -> String {
    let noun = if keys.len() < 2 { "key" } else { "keys" };
    format!("{} {}", noun, keys.join(", "))
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ReconcileError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
