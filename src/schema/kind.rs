use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{FieldType, ReconcileError, Result, Value};

/// One template field: its type and the value a synthesized record starts with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default = "null_value")]
    pub default_value: Value,
}

fn null_value() -> Value {
    Value::Null
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            default_value: Value::Null,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }
}

/// Shared counter settings of a kind. Carried with the schema for the
/// editor and persistence; the planner does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Increment {
    pub field: String,
    pub increment_type: String,
    pub increment_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTypeSchema {
    /// Filled from the map key when a schema map is loaded.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub parent_type: Option<String>,
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remap_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ordered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Increment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldSpec>>,
}

impl RecordTypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_type = Some(parent.into());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn remap(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.remap_fields.insert(logical.into(), physical.into());
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), spec);
        self
    }

    pub fn is_progenitor(&self) -> bool {
        self.parent_type.is_none()
    }

    /// Siblings carry a persisted sequence. Progenitors never do.
    pub fn keeps_order(&self) -> bool {
        self.ordered && self.parent_type.is_some()
    }

    /// A kind can only be synthesized when it carries a field template.
    pub fn has_template(&self) -> bool {
        self.fields.as_ref().is_some_and(|fields| !fields.is_empty())
    }

    pub fn physical_name<'a>(&'a self, logical: &'a str) -> &'a str {
        self.remap_fields
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    /// Table the kind's records live in.
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Parse the editor's remap text, `KEY => FIELD, OTHER => COLUMN`.
pub fn parse_remap(text: &str) -> Result<BTreeMap<String, String>> {
    let mut remap = BTreeMap::new();
    for definition in text.split(',') {
        let definition = definition.trim();
        if definition.is_empty() {
            continue;
        }
        let Some((logical, physical)) = definition.split_once("=>") else {
            return Err(ReconcileError::InvalidSchema(format!(
                "remap definition '{}' is missing '=>'",
                definition
            )));
        };
        let (logical, physical) = (logical.trim(), physical.trim());
        if logical.is_empty() || physical.is_empty() {
            return Err(ReconcileError::InvalidSchema(format!(
                "remap definition '{}' has an empty side",
                definition
            )));
        }
        remap.insert(logical.to_string(), physical.to_string());
    }
    Ok(remap)
}

pub fn format_remap(remap: &BTreeMap<String, String>) -> String {
    remap
        .iter()
        .map(|(logical, physical)| format!("{} => {}", logical, physical))
        .collect::<Vec<_>>()
        .join(", ")
}
