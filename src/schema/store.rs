use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::{ReconcileError, Result};

use super::RecordTypeSchema;

/// One element of a kind's full identity path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityField {
    /// Kind that declares the key.
    pub owner: String,
    /// Logical key name as declared by the owner.
    pub key: String,
}

/// SchemaStore holds the record-type definitions of one installation.
///
/// Immutable once built and cheap to clone: editing operations return a new
/// store and leave the old one untouched.
#[derive(Debug, Clone, Default)]
pub struct SchemaStore {
    kinds: Arc<BTreeMap<String, RecordTypeSchema>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an already deserialized map; names are taken from the keys.
    pub fn from_map(mut kinds: BTreeMap<String, RecordTypeSchema>) -> Result<Self> {
        for (name, kind) in kinds.iter_mut() {
            kind.name = name.clone();
        }
        let store = Self {
            kinds: Arc::new(kinds),
        };
        store.validate()?;
        Ok(store)
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = RecordTypeSchema>) -> Result<Self> {
        Self::from_map(
            kinds
                .into_iter()
                .map(|kind| (kind.name.clone(), kind))
                .collect(),
        )
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let kinds: BTreeMap<String, RecordTypeSchema> = serde_json::from_str(text)?;
        Self::from_map(kinds)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.kinds)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Every parent reference must resolve and every chain must end.
    fn validate(&self) -> Result<()> {
        for name in self.kinds.keys() {
            self.ancestor_chain(name)?;
        }
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Result<&RecordTypeSchema> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ReconcileError::SchemaNotFound(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &RecordTypeSchema> {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Schemas from the progenitor down to `kind`, inclusive.
    pub fn ancestor_chain(&self, kind: &str) -> Result<Vec<&RecordTypeSchema>> {
        let mut chain = Vec::new();
        let mut current = Some(kind);
        while let Some(name) = current {
            let schema = self.get(name)?;
            if chain.len() > self.kinds.len() {
                return Err(ReconcileError::InvalidSchema(format!(
                    "parent chain of '{}' contains a cycle",
                    kind
                )));
            }
            chain.push(schema);
            current = schema.parent_type.as_deref();
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn progenitor(&self, kind: &str) -> Result<&RecordTypeSchema> {
        let chain = self.ancestor_chain(kind)?;
        Ok(chain[0])
    }

    /// Physical field name of a logical key at `kind`.
    pub fn physical_name(&self, kind: &str, logical_key: &str) -> Result<String> {
        Ok(self.get(kind)?.physical_name(logical_key).to_string())
    }

    /// The kind's full identity path, root keys first.
    pub fn identity_fields(&self, kind: &str) -> Result<Vec<IdentityField>> {
        Ok(self
            .ancestor_chain(kind)?
            .into_iter()
            .flat_map(|schema| {
                schema.key_fields.iter().map(|key| IdentityField {
                    owner: schema.name.clone(),
                    key: key.clone(),
                })
            })
            .collect())
    }

    /// Lowercased physical identity columns of `kind`, root first.
    pub fn identity_columns(&self, kind: &str) -> Result<Vec<String>> {
        let schema = self.get(kind)?;
        Ok(self
            .identity_fields(kind)?
            .iter()
            .map(|field| schema.physical_name(&field.key).to_lowercase())
            .collect())
    }

    pub fn children_of(&self, kind: &str) -> Vec<&RecordTypeSchema> {
        self.kinds
            .values()
            .filter(|schema| schema.parent_type.as_deref() == Some(kind))
            .collect()
    }

    /// Add a kind - returns a NEW store.
    pub fn with_kind(self, kind: RecordTypeSchema) -> Result<Self> {
        if self.kinds.contains_key(&kind.name) {
            return Err(ReconcileError::KindExists(kind.name));
        }
        if let Some(parent) = &kind.parent_type {
            self.get(parent)?;
        }

        let mut kinds = (*self.kinds).clone();
        kinds.insert(kind.name.clone(), kind);
        Ok(Self {
            kinds: Arc::new(kinds),
        })
    }

    /// Replace an existing kind's definition, keeping its name and parent.
    pub fn with_definition(self, kind: RecordTypeSchema) -> Result<Self> {
        let existing = self.get(&kind.name)?;
        let mut kind = kind;
        kind.parent_type = existing.parent_type.clone();

        let mut kinds = (*self.kinds).clone();
        kinds.insert(kind.name.clone(), kind);
        Ok(Self {
            kinds: Arc::new(kinds),
        })
    }

    /// Remove a kind together with all of its descendants.
    pub fn without_kind(self, name: &str) -> Result<Self> {
        self.get(name)?;

        let mut doomed = vec![name.to_string()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            doomed.extend(self.children_of(&parent).into_iter().map(|c| c.name.clone()));
            cursor += 1;
        }

        let mut kinds = (*self.kinds).clone();
        for name in &doomed {
            kinds.remove(name);
        }
        Ok(Self {
            kinds: Arc::new(kinds),
        })
    }

    /// Rename a kind and re-point its children.
    pub fn renamed(self, old: &str, new: &str) -> Result<Self> {
        self.get(old)?;
        if old != new && self.kinds.contains_key(new) {
            return Err(ReconcileError::KindExists(new.to_string()));
        }

        let kinds: BTreeMap<String, RecordTypeSchema> = self
            .kinds
            .iter()
            .map(|(name, schema)| {
                let mut schema = schema.clone();
                if schema.parent_type.as_deref() == Some(old) {
                    schema.parent_type = Some(new.to_string());
                }
                if name == old {
                    schema.name = new.to_string();
                }
                (schema.name.clone(), schema)
            })
            .collect();
        Ok(Self {
            kinds: Arc::new(kinds),
        })
    }
}
