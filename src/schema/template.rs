use std::collections::BTreeMap;

use tracing::debug;

use crate::core::{FieldType, ReconcileError, Result, Value};
use crate::storage::{RelationalStore, Selector, row_value};

use super::{FieldSpec, SchemaStore};

/// Table listing the data fields each kind's records carry.
pub const FIELD_MASTER_TABLE: &str = "field_master";

/// One `field_master` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub field_name: String,
    pub data_type: String,
}

impl FieldDefinition {
    pub fn new(field_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSyncReport {
    pub added: Vec<String>,
    pub retyped: Vec<String>,
    pub removed: Vec<String>,
}

impl TemplateSyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.retyped.is_empty() && self.removed.is_empty()
    }
}

pub async fn fetch_field_master(store: &dyn RelationalStore, kind: &str) -> Result<Vec<FieldDefinition>> {
    let rows = store
        .select(
            FIELD_MASTER_TABLE,
            &Selector::new().eq("table_name", kind),
            &["field_name".to_string()],
        )
        .await?;

    rows.iter()
        .map(|row| {
            let field_name = row_value(row, "field_name")
                .filter(|v| !v.is_null())
                .ok_or_else(|| ReconcileError::Store(format!("{} row without field_name", FIELD_MASTER_TABLE)))?;
            let data_type = row_value(row, "data_type").map(Value::to_key_string).unwrap_or_default();
            Ok(FieldDefinition::new(field_name.to_key_string(), data_type))
        })
        .collect()
}

/// Rebuild the field template of `kind` from its field definitions.
///
/// Identity columns never become template fields. Existing defaults survive
/// as long as the field keeps its type.
pub fn sync_template(
    schema: SchemaStore,
    kind: &str,
    definitions: &[FieldDefinition],
) -> Result<(SchemaStore, TemplateSyncReport)> {
    let identity = schema.identity_columns(kind)?;
    let mut definition = schema.get(kind)?.clone();
    let current = definition.fields.clone().unwrap_or_default();

    let mut report = TemplateSyncReport::default();
    let mut fields = BTreeMap::new();
    for def in definitions {
        let name = def.field_name.to_lowercase();
        if identity.contains(&name) || fields.contains_key(&name) {
            continue;
        }
        let field_type = FieldType::from_master_type(&def.data_type);
        let spec = match current.get(&name) {
            Some(existing) if existing.field_type == field_type => existing.clone(),
            Some(_) => {
                report.retyped.push(name.clone());
                FieldSpec::new(field_type)
            }
            None => {
                report.added.push(name.clone());
                FieldSpec::new(field_type)
            }
        };
        fields.insert(name, spec);
    }
    report.removed = current
        .keys()
        .filter(|name| !fields.contains_key(*name))
        .cloned()
        .collect();

    debug!(
        kind,
        added = report.added.len(),
        retyped = report.retyped.len(),
        removed = report.removed.len(),
        "template synchronized"
    );

    definition.fields = Some(fields);
    Ok((schema.with_definition(definition)?, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordTypeSchema;
    use crate::storage::MemoryStore;

    fn schema() -> SchemaStore {
        SchemaStore::from_kinds([
            RecordTypeSchema::new("Sample")
                .keys(["NAME"])
                .remap("NAME", "SAMPLE_NAME")
                .field("status", FieldSpec::new(FieldType::Text).with_default("NEW"))
                .field("weight", FieldSpec::new(FieldType::Text))
                .field("legacy", FieldSpec::new(FieldType::Text)),
        ])
        .unwrap()
    }

    #[test]
    fn test_sync_adds_retypes_and_removes() {
        let defs = vec![
            FieldDefinition::new("SAMPLE_NAME", "Text"),
            FieldDefinition::new("STATUS", "Text"),
            FieldDefinition::new("WEIGHT", "Number"),
            FieldDefinition::new("APPROVED", "Boolean"),
        ];
        let (schema, report) = sync_template(schema(), "Sample", &defs).unwrap();

        assert_eq!(report.added, vec!["approved"]);
        assert_eq!(report.retyped, vec!["weight"]);
        assert_eq!(report.removed, vec!["legacy"]);

        let fields = schema.get("Sample").unwrap().fields.clone().unwrap();
        assert!(!fields.contains_key("sample_name"));
        assert_eq!(fields["status"].default_value, Value::from("NEW"));
        assert_eq!(fields["weight"].field_type, FieldType::Number);
        assert_eq!(fields["approved"].field_type, FieldType::Boolean);
    }

    #[tokio::test]
    async fn test_fetch_reads_rows_for_kind() {
        let store = MemoryStore::new().with_rows(
            FIELD_MASTER_TABLE,
            vec![
                vec![("table_name", "Sample"), ("field_name", "WEIGHT"), ("data_type", "Number")],
                vec![("table_name", "Other"), ("field_name", "X"), ("data_type", "Text")],
            ],
        );
        let defs = fetch_field_master(&store, "Sample").await.unwrap();
        assert_eq!(defs, vec![FieldDefinition::new("WEIGHT", "Number")]);
    }
}
