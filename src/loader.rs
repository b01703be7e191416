//! Depth-first population of the record tree from the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_recursion::async_recursion;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::{ReconcileError, Result, Value};
use crate::proposal::ProgenitorRef;
use crate::schema::{RecordTypeSchema, SchemaStore};
use crate::storage::{RelationalStore, Selector, SelectorValue, StoreRow, row_value};
use crate::tree::{FieldMap, FieldValue, NodeId, RecordNode, RecordTree};

/// Versions on record, keyed by kind and the key values preceding the
/// version key.
#[derive(Debug, Clone, Default)]
pub struct VersionIndex {
    versions: HashMap<(String, String), Value>,
}

impl VersionIndex {
    pub fn record(&mut self, kind: &str, prefix: &str, version: Value) {
        self.versions.insert((kind.to_string(), prefix.to_string()), version);
    }

    pub fn get(&self, kind: &str, prefix: &str) -> Option<&Value> {
        self.versions.get(&(kind.to_string(), prefix.to_string()))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Join key values into an identity string.
pub fn join_identity<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    values
        .into_iter()
        .map(Value::to_key_string)
        .collect::<Vec<_>>()
        .join(":")
}

pub struct TreeLoader {
    schema: SchemaStore,
    config: EngineConfig,
    store: Arc<dyn RelationalStore>,
    pending: AtomicUsize,
    versions: VersionIndex,
    diagnostics: Vec<ReconcileError>,
}

impl TreeLoader {
    pub fn new(schema: SchemaStore, config: EngineConfig, store: Arc<dyn RelationalStore>) -> Self {
        Self {
            schema,
            config,
            store,
            pending: AtomicUsize::new(0),
            versions: VersionIndex::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Outstanding store requests.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// True once every issued select has answered.
    pub fn is_settled(&self) -> bool {
        self.pending() == 0
    }

    pub fn versions(&self) -> &VersionIndex {
        &self.versions
    }

    pub fn diagnostics(&self) -> &[ReconcileError] {
        &self.diagnostics
    }

    pub fn into_parts(self) -> (VersionIndex, Vec<ReconcileError>) {
        (self.versions, self.diagnostics)
    }

    pub async fn load_progenitors(&mut self, tree: &mut RecordTree, refs: &[ProgenitorRef]) -> Result<()> {
        for reference in refs {
            let selector = reference.selector(&self.config);
            self.load(tree, None, &reference.kind, &selector).await?;
        }
        Ok(())
    }

    /// Load the records of `kind` matching `selector` under `parent`, then
    /// every child kind under each of them.
    ///
    /// A failing select is recorded as a diagnostic and leaves that subtree
    /// empty; only an unknown kind is returned as an error.
    #[async_recursion]
    pub async fn load(
        &mut self,
        tree: &mut RecordTree,
        parent: Option<NodeId>,
        kind: &str,
        selector: &Selector,
    ) -> Result<()> {
        let schema = self.schema.get(kind)?.clone();
        let order_by = if schema.ordered {
            vec![self.config.order_field.clone()]
        } else {
            schema
                .key_fields
                .iter()
                .map(|key| schema.physical_name(key).to_lowercase())
                .collect()
        };

        debug!(kind = %kind, selector = %selector, "loading records");
        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = self.store.select(&schema.table_name(), selector, &order_by).await;
        self.pending.fetch_sub(1, Ordering::SeqCst);

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!(kind = %kind, error = %e, "subtree load failed");
                self.diagnostics.push(ReconcileError::LoadSubtreeFailed {
                    kind: kind.to_string(),
                    selector: selector.to_string(),
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };
        debug!(kind = %kind, rows = rows.len(), "records loaded");

        tree.ensure_slot(parent, kind, schema.keeps_order());
        let children: Vec<RecordTypeSchema> = self.schema.children_of(kind).into_iter().cloned().collect();

        for row in rows {
            let identity = self.identity_of(&schema, &row);
            if tree.find(parent, kind, &identity).is_some() {
                debug!(kind = %kind, identity = %identity, "record already loaded");
                continue;
            }

            let mut fields = FieldMap::new();
            for (column, value) in row {
                fields.insert(column.to_lowercase(), FieldValue::Scalar(value));
            }
            let id = tree.add(parent, RecordNode::new(kind, identity.as_str(), fields), schema.keeps_order());
            if let Some(slot) = tree.slot_mut(parent, kind) {
                slot.record_stored(&identity);
            }

            for child in &children {
                let selector = self.child_selector(tree.node(id), &schema, child)?;
                self.load(tree, Some(id), &child.name, &selector).await?;
            }
        }
        Ok(())
    }

    /// Own key values of a row, capturing the version when one is keyed.
    fn identity_of(&mut self, schema: &RecordTypeSchema, row: &StoreRow) -> String {
        let mut values = Vec::with_capacity(schema.key_fields.len());
        for key in &schema.key_fields {
            let column = schema.physical_name(key).to_lowercase();
            let value = row_value(row, &column).cloned().unwrap_or(Value::Null);
            if column == self.config.version_field {
                self.versions.record(&schema.name, &join_identity(&values), value.clone());
            }
            values.push(value);
        }
        join_identity(&values)
    }

    /// Selector for `child` records under `node`: every identity key of the
    /// node's kind, read at the node and renamed for the child.
    fn child_selector(&self, node: &RecordNode, schema: &RecordTypeSchema, child: &RecordTypeSchema) -> Result<Selector> {
        let mut selector = Selector::new();
        for field in self.schema.identity_fields(&schema.name)? {
            let column = schema.physical_name(&field.key).to_lowercase();
            let value = node.value(&column).cloned().unwrap_or(Value::Null);
            let child_column = child.physical_name(&field.key).to_lowercase();

            if value.is_null() && column == self.config.version_field {
                let owner = self.schema.get(&field.owner)?;
                let name = owner
                    .key_fields
                    .first()
                    .and_then(|first| node.value(&schema.physical_name(first).to_lowercase()))
                    .cloned()
                    .unwrap_or(Value::Null);
                selector.push(
                    child_column,
                    SelectorValue::LatestVersion {
                        versions_table: self.config.versions_table.clone(),
                        kind: field.owner.clone(),
                        name,
                    },
                );
            } else {
                selector.push(child_column, SelectorValue::Literal(value));
            }
        }
        Ok(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

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

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_rows(
                "recipe",
                vec![vec![("name", Value::from("S1")), ("version", Value::from(2))]],
            )
            .with_rows(
                "step",
                vec![
                    vec![
                        ("recipe_name", Value::from("S1")),
                        ("version", Value::from(2)),
                        ("step", Value::from(20)),
                        ("order_number", Value::from(2)),
                    ],
                    vec![
                        ("recipe_name", Value::from("S1")),
                        ("version", Value::from(2)),
                        ("step", Value::from(10)),
                        ("order_number", Value::from(1)),
                    ],
                    vec![
                        ("recipe_name", Value::from("S9")),
                        ("version", Value::from(1)),
                        ("step", Value::from(10)),
                        ("order_number", Value::from(1)),
                    ],
                ],
            )
    }

    #[tokio::test]
    async fn test_loads_children_in_stored_order() {
        let mut loader = TreeLoader::new(schema(), EngineConfig::default(), Arc::new(store()));
        let mut tree = RecordTree::new();
        loader
            .load(&mut tree, None, "Recipe", &Selector::new().eq("name", "S1"))
            .await
            .unwrap();

        assert!(loader.is_settled());
        let spec = tree.find(None, "Recipe", "S1:2").unwrap();
        let slot = tree.slot(Some(spec), "Step").unwrap();
        assert_eq!(slot.stored_order(), Some(&["10".to_string(), "20".to_string()][..]));
        assert_eq!(loader.versions().get("Recipe", "S1"), Some(&Value::Integer(2)));
        assert!(loader.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_failed_subtree_is_reported() {
        let store = MemoryStore::new().with_rows(
            "recipe",
            vec![vec![("name", Value::from("S1")), ("version", Value::from(1))]],
        );
        let mut loader = TreeLoader::new(schema(), EngineConfig::default(), Arc::new(store));
        let mut tree = RecordTree::new();
        loader.load(&mut tree, None, "Recipe", &Selector::new()).await.unwrap();

        let spec = tree.find(None, "Recipe", "S1:1").unwrap();
        assert!(tree.slot(Some(spec), "Step").is_none());
        assert!(matches!(
            loader.diagnostics(),
            [ReconcileError::LoadSubtreeFailed { kind, .. }] if kind == "Step"
        ));
    }

    #[tokio::test]
    async fn test_same_progenitor_is_loaded_once() {
        let mut loader = TreeLoader::new(schema(), EngineConfig::default(), Arc::new(store()));
        let mut tree = RecordTree::new();
        let selector = Selector::new().eq("name", "S1");
        loader.load(&mut tree, None, "Recipe", &selector).await.unwrap();
        loader.load(&mut tree, None, "Recipe", &selector).await.unwrap();
        assert_eq!(tree.slot(None, "Recipe").unwrap().len(), 1);
        assert_eq!(tree.len(), 3);
    }
}
