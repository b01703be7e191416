//! Merging proposed rows into the loaded tree.

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::{ReconcileError, Result, Value};
use crate::loader::{VersionIndex, join_identity};
use crate::proposal::ProposedRow;
use crate::schema::{RecordTypeSchema, SchemaStore};
use crate::tree::{Action, ChangeStamp, FieldMap, FieldValue, NodeId, RecordNode, RecordTree, mark_change};

/// What one proposed row did to the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// The row's own node, absent when its insert was blocked.
    pub node: Option<NodeId>,
    pub created: Vec<NodeId>,
    pub changed: Vec<String>,
}

/// One level of a row's path: the kind and the identity at that kind.
struct PathStep<'s> {
    schema: &'s RecordTypeSchema,
    identity: String,
    /// Identity values of this level and every level above it, keyed by
    /// logical key name.
    keys: Vec<(String, Value)>,
}

pub struct UpdateMatcher<'a> {
    schema: &'a SchemaStore,
    config: &'a EngineConfig,
    versions: &'a VersionIndex,
    stamp: &'a ChangeStamp,
    diagnostics: Vec<ReconcileError>,
}

impl<'a> UpdateMatcher<'a> {
    pub fn new(
        schema: &'a SchemaStore,
        config: &'a EngineConfig,
        versions: &'a VersionIndex,
        stamp: &'a ChangeStamp,
    ) -> Self {
        Self {
            schema,
            config,
            versions,
            stamp,
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[ReconcileError] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<ReconcileError> {
        self.diagnostics
    }

    /// Merge one proposed row of `kind` into the tree.
    pub fn apply(&mut self, tree: &mut RecordTree, kind: &str, row: &ProposedRow) -> Result<MatchOutcome> {
        let row_schema = self.schema.get(kind)?;
        let path = self.resolve_path(row_schema, row)?;
        let mut outcome = MatchOutcome::default();

        let mut parent: Option<NodeId> = None;
        let mut own = None;
        for (level, step) in path.iter().enumerate() {
            let is_own = level + 1 == path.len();
            let id = match tree.find(parent, &step.schema.name, &step.identity) {
                Some(id) => id,
                None => {
                    let seed = if is_own { Some(row) } else { None };
                    let id = self.synthesize(tree, parent, step, seed);
                    outcome.created.push(id);
                    id
                }
            };
            if let Some(slot) = tree.slot_mut(parent, &step.schema.name)
                && slot.is_ordered()
            {
                slot.record_proposed(&step.identity);
            }
            parent = Some(id);
            own = Some(id);
        }

        let Some(id) = own else {
            return Ok(outcome);
        };
        if tree.node(id).blocked {
            return Ok(outcome);
        }
        outcome.node = Some(id);

        let keys = self.schema.identity_columns(kind)?;
        for (name, proposed) in row.fields() {
            if keys.contains(name) || self.config.is_stamp_field(name) {
                continue;
            }
            let proposed = self.proposed_value(proposed);
            let node = tree.node_mut(id);
            let Some(existing) = node.fields.get(name) else {
                match node.extras.iter_mut().find(|(extra, _)| extra == name) {
                    Some(extra) => extra.1 = proposed,
                    None => node.extras.push((name.clone(), proposed)),
                }
                continue;
            };
            if existing.current().same_as(&proposed) {
                continue;
            }

            let old = existing.original().clone();
            if node.is_insert() {
                node.fields.insert(name.clone(), FieldValue::Scalar(proposed));
                continue;
            }
            node.fields.insert(name.clone(), FieldValue::Diff { old, new: proposed });
            if !node.is_delete() {
                node.action = Some(Action::Update);
            }
            node.apply = true;
            outcome.changed.push(name.clone());
            mark_change(tree, id, self.stamp);
        }

        debug!(
            kind = %kind,
            identity = %tree.node(id).identity,
            created = outcome.created.len(),
            changed = outcome.changed.len(),
            "row matched"
        );
        Ok(outcome)
    }

    /// Walk the ancestor chain root-first, resolving each level's identity
    /// from the row. A missing version falls back to the one on record.
    fn resolve_path<'s>(&self, row_schema: &RecordTypeSchema, row: &ProposedRow) -> Result<Vec<PathStep<'s>>>
    where
        'a: 's,
    {
        let chain: Vec<&'s RecordTypeSchema> = self.schema.ancestor_chain(&row_schema.name)?;
        let mut path: Vec<PathStep<'s>> = Vec::with_capacity(chain.len());
        let mut keys: Vec<(String, Value)> = Vec::new();

        for schema in chain {
            let mut own = Vec::with_capacity(schema.key_fields.len());
            for key in &schema.key_fields {
                let column = row_schema.physical_name(key).to_lowercase();
                let value = match row.get(&column).filter(|value| !value.is_null()) {
                    Some(value) => value.clone(),
                    None if column == self.config.version_field => self
                        .versions
                        .get(&schema.name, &join_identity(&own))
                        .cloned()
                        .unwrap_or(Value::Integer(1)),
                    None => {
                        return Err(ReconcileError::MissingKeyFields {
                            kind: row_schema.name.clone(),
                            keys: vec![key.clone()],
                        });
                    }
                };
                own.push(value.clone());
                keys.push((key.clone(), value));
            }
            path.push(PathStep {
                schema,
                identity: join_identity(&own),
                keys: keys.clone(),
            });
        }
        Ok(path)
    }

    /// Create the node for a path step that is not in the tree yet.
    fn synthesize(
        &mut self,
        tree: &mut RecordTree,
        parent: Option<NodeId>,
        step: &PathStep<'_>,
        row: Option<&ProposedRow>,
    ) -> NodeId {
        let schema = step.schema;
        let Some(template) = schema.fields.as_ref().filter(|fields| !fields.is_empty()) else {
            warn!(kind = %schema.name, identity = %step.identity, "insertion blocked");
            self.diagnostics.push(ReconcileError::InsertionBlocked {
                kind: schema.name.clone(),
                identity: step.identity.clone(),
            });
            let mut node = RecordNode::new(schema.name.as_str(), step.identity.as_str(), FieldMap::new());
            node.action = Some(Action::Insert);
            node.blocked = true;
            return tree.add(parent, node, schema.keeps_order());
        };

        let mut fields = FieldMap::new();
        for (key, value) in &step.keys {
            fields.insert(schema.physical_name(key).to_lowercase(), FieldValue::Scalar(value.clone()));
        }
        for (name, spec) in template {
            let name = name.to_lowercase();
            if fields.contains(&name) {
                continue;
            }
            let value = if schema.is_progenitor() && name == self.config.changed_at_field {
                self.stamp.at.clone()
            } else if schema.is_progenitor() && name == self.config.changed_by_field {
                Value::Text(self.config.system_user.clone())
            } else {
                match row.and_then(|row| row.get(&name)) {
                    Some(value) => self.proposed_value(value),
                    None if matches!(spec.default_value, Value::Boolean(_)) => self.proposed_value(&spec.default_value),
                    None => spec.default_value.clone(),
                }
            };
            fields.insert(name, FieldValue::Scalar(value));
        }

        let mut node = RecordNode::new(schema.name.as_str(), step.identity.as_str(), fields);
        node.action = Some(Action::Insert);
        node.apply = true;
        let id = tree.add(parent, node, schema.keeps_order());
        debug!(kind = %schema.name, identity = %step.identity, "record synthesized");
        mark_change(tree, id, self.stamp);
        id
    }

    /// Normalized form of a proposed value; booleans become the stored
    /// single-character markers.
    fn proposed_value(&self, value: &Value) -> Value {
        match value {
            Value::Boolean(b) => Value::Text(self.config.boolean_marker(*b).to_string()),
            other => other.normalized(),
        }
    }
}
