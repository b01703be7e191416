//! Externally sourced rows and their preparation for a run.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::{ReconcileError, Result, Value};
use crate::schema::SchemaStore;
use crate::storage::{Selector, SelectorValue};

/// One proposed row. Field names are lowercased on the way in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposedRow {
    fields: Vec<(String, Value)>,
}

impl ProposedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut row = Self::new();
        for (name, value) in pairs {
            row.set(name.as_ref(), value.into());
        }
        row
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let name = name.to_lowercase();
        match self.fields.iter().position(|(field, _)| *field == name) {
            Some(pos) => self.fields[pos].1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Present and not null.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_null())
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
}

/// Proposed rows grouped per kind, in the order kinds were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposedSet {
    kinds: Vec<(String, Vec<ProposedRow>)>,
}

impl ProposedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, kind: &str, rows: Vec<ProposedRow>) -> Self {
        self.extend(kind, rows);
        self
    }

    pub fn extend(&mut self, kind: &str, rows: Vec<ProposedRow>) {
        match self.kinds.iter_mut().find(|(name, _)| name == kind) {
            Some((_, existing)) => existing.extend(rows),
            None => self.kinds.push((kind.to_string(), rows)),
        }
    }

    /// Parse `{ "Kind": [ { "FIELD": value, ... } ] }`. Kinds keep the order
    /// they appear in the document.
    pub fn from_json(text: &str) -> Result<Self> {
        let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut set = Self::new();
        for (kind, rows) in document {
            let serde_json::Value::Array(rows) = rows else {
                return Err(ReconcileError::Serialization(format!(
                    "proposed rows for '{}' must be an array",
                    kind
                )));
            };
            let rows = rows
                .into_iter()
                .map(|row| match row {
                    serde_json::Value::Object(fields) => Ok(ProposedRow::from_pairs(fields)),
                    _ => Err(ReconcileError::Serialization(format!(
                        "proposed rows for '{}' must be objects",
                        kind
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            set.extend(&kind, rows);
        }
        Ok(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProposedRow])> {
        self.kinds.iter().map(|(kind, rows)| (kind.as_str(), rows.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.kinds.iter().map(|(_, rows)| rows.len()).sum()
    }

    /// Drop kinds that cannot be matched and report why.
    ///
    /// An unknown kind fails the whole call. Empty kinds and kinds whose
    /// rows lack a key column (other than the version) are skipped with a
    /// diagnostic each.
    pub fn validate(&self, schema: &SchemaStore, config: &EngineConfig) -> Result<(Self, Vec<ReconcileError>)> {
        let mut accepted = Self::new();
        let mut diagnostics = Vec::new();

        for (kind, rows) in &self.kinds {
            let fields = schema.identity_fields(kind)?;
            if rows.is_empty() {
                warn!(kind = %kind, "no proposed rows");
                diagnostics.push(ReconcileError::EmptyProposal(kind.clone()));
                continue;
            }

            let definition = schema.get(kind)?;
            let missing: Vec<String> = fields
                .iter()
                .filter(|field| {
                    let column = definition.physical_name(&field.key).to_lowercase();
                    column != config.version_field && rows.iter().any(|row| !row.has(&column))
                })
                .map(|field| field.key.clone())
                .collect();
            if !missing.is_empty() {
                warn!(kind = %kind, keys = ?missing, "proposed rows lack key columns");
                diagnostics.push(ReconcileError::MissingKeyFields {
                    kind: kind.clone(),
                    keys: missing,
                });
                continue;
            }

            accepted.kinds.push((kind.clone(), rows.clone()));
        }
        Ok((accepted, diagnostics))
    }

    /// Distinct progenitor records the rows hang under, first seen first.
    pub fn progenitors(&self, schema: &SchemaStore, config: &EngineConfig) -> Result<Vec<ProgenitorRef>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (kind, rows) in &self.kinds {
            let definition = schema.get(kind)?;
            let progenitor = schema.progenitor(kind)?;
            for row in rows {
                let keys = progenitor
                    .key_fields
                    .iter()
                    .map(|key| {
                        let column = progenitor.physical_name(key).to_lowercase();
                        let value = row
                            .get(definition.physical_name(key))
                            .filter(|value| !value.is_null())
                            .cloned();
                        (column, value)
                    })
                    .collect();
                let reference = ProgenitorRef {
                    kind: progenitor.name.clone(),
                    keys,
                };
                if seen.insert(reference.label(config)) {
                    debug!(progenitor = %reference.label(config), "collated progenitor");
                    out.push(reference);
                }
            }
        }
        Ok(out)
    }
}

/// Key values of one progenitor record to load. A `None` version is
/// resolved by the store to the latest registered version.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgenitorRef {
    pub kind: String,
    pub keys: Vec<(String, Option<Value>)>,
}

impl ProgenitorRef {
    /// `Kind>value:value`, with `LATEST` standing in for an absent version.
    pub fn label(&self, config: &EngineConfig) -> String {
        let parts: Vec<String> = self
            .keys
            .iter()
            .map(|(column, value)| match value {
                Some(value) => value.to_key_string(),
                None if *column == config.version_field => "LATEST".to_string(),
                None => String::new(),
            })
            .collect();
        format!("{}>{}", self.kind, parts.join(":"))
    }

    pub fn selector(&self, config: &EngineConfig) -> Selector {
        let name = self
            .keys
            .first()
            .and_then(|(_, value)| value.clone())
            .unwrap_or(Value::Null);
        let mut selector = Selector::new();
        for (column, value) in &self.keys {
            let value = match value {
                Some(value) => SelectorValue::Literal(value.clone()),
                None if *column == config.version_field => SelectorValue::LatestVersion {
                    versions_table: config.versions_table.clone(),
                    kind: self.kind.clone(),
                    name: name.clone(),
                },
                None => SelectorValue::Literal(Value::Null),
            };
            selector.push(column.clone(), value);
        }
        selector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordTypeSchema;

    fn schema() -> SchemaStore {
        SchemaStore::from_kinds([
            RecordTypeSchema::new("Recipe").keys(["NAME", "VERSION"]),
            RecordTypeSchema::new("Step")
                .parent("Recipe")
                .keys(["STEP"])
                .remap("NAME", "RECIPE_NAME")
                .ordered(),
        ])
        .unwrap()
    }

    #[test]
    fn test_row_names_are_lowercased() {
        let row = ProposedRow::new().with("RECIPE_NAME", "S1").with("Step", 2);
        assert_eq!(row.get("recipe_name"), Some(&Value::from("S1")));
        assert_eq!(row.get("STEP"), Some(&Value::Integer(2)));
        assert_eq!(row.fields()[1].0, "step");
    }

    #[test]
    fn test_validation_skips_kinds_with_missing_keys() {
        let set = ProposedSet::new()
            .with_rows("Recipe", vec![ProposedRow::new().with("NAME", "S1")])
            .with_rows("Step", vec![ProposedRow::new().with("RECIPE_NAME", "S1")])
            .with_rows("Recipe", vec![]);
        let (accepted, diagnostics) = set.validate(&schema(), &EngineConfig::default()).unwrap();

        assert_eq!(accepted.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["Recipe"]);
        assert_eq!(
            diagnostics,
            vec![ReconcileError::MissingKeyFields {
                kind: "Step".into(),
                keys: vec!["STEP".into()],
            }]
        );
    }

    #[test]
    fn test_validation_reports_empty_kind() {
        let set = ProposedSet::new().with_rows("Step", vec![]);
        let (accepted, diagnostics) = set.validate(&schema(), &EngineConfig::default()).unwrap();
        assert!(accepted.is_empty());
        assert_eq!(diagnostics, vec![ReconcileError::EmptyProposal("Step".into())]);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let set = ProposedSet::new().with_rows("Nope", vec![ProposedRow::new()]);
        assert!(matches!(
            set.validate(&schema(), &EngineConfig::default()),
            Err(ReconcileError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_progenitors_are_collated_through_remaps() {
        let config = EngineConfig::default();
        let set = ProposedSet::new()
            .with_rows(
                "Step",
                vec![
                    ProposedRow::new().with("RECIPE_NAME", "S1").with("STEP", 1),
                    ProposedRow::new().with("RECIPE_NAME", "S1").with("STEP", 2),
                ],
            )
            .with_rows("Recipe", vec![ProposedRow::new().with("NAME", "S1").with("VERSION", 3)]);

        let refs = set.progenitors(&schema(), &config).unwrap();
        let labels: Vec<_> = refs.iter().map(|r| r.label(&config)).collect();
        assert_eq!(labels, vec!["Recipe>S1:LATEST", "Recipe>S1:3"]);
        assert_eq!(
            refs[0].selector(&config).to_string(),
            "name = 'S1' AND version = (SELECT version FROM versions WHERE table_name = 'Recipe' AND name = 'S1')"
        );
    }

    #[test]
    fn test_from_json() {
        let set = ProposedSet::from_json(r#"{"Recipe": [{"NAME": "S1", "VERSION": 2}]}"#).unwrap();
        assert_eq!(set.row_count(), 1);
        let (_, rows) = set.iter().next().unwrap();
        assert_eq!(rows[0].get("version"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_from_json_keeps_document_order() {
        let set = ProposedSet::from_json(
            r#"{"Step": [{"NAME": "S1", "STEP": 2}], "Recipe": [{"NAME": "S1"}], "Limit": []}"#,
        )
        .unwrap();
        let kinds: Vec<&str> = set.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec!["Step", "Recipe", "Limit"]);
    }
}
