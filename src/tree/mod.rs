//! Arena-backed annotated record tree.
//!
//! Nodes live in one vector and refer to each other by [`NodeId`]. Children
//! are grouped per kind into [`ChildSlot`]s; progenitors sit in root slots.

pub mod node;
pub mod slot;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDateTime;

use crate::config::EngineConfig;
use crate::core::Value;

pub use node::{Action, FieldMap, FieldValue, NodeId, RecordNode};
pub use slot::ChildSlot;

#[derive(Debug, Clone, Default)]
pub struct RecordTree {
    nodes: Vec<RecordNode>,
    roots: BTreeMap<String, ChildSlot>,
}

impl RecordTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&RecordNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut RecordNode> {
        self.nodes.get_mut(id.0)
    }

    /// Node lookup for ids handed out by this tree.
    pub(crate) fn node(&self, id: NodeId) -> &RecordNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut RecordNode {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Child slots under `parent`, or the root slots for `None`.
    pub fn slots(&self, parent: Option<NodeId>) -> &BTreeMap<String, ChildSlot> {
        match parent {
            Some(id) => &self.nodes[id.0].children,
            None => &self.roots,
        }
    }

    fn slots_mut(&mut self, parent: Option<NodeId>) -> &mut BTreeMap<String, ChildSlot> {
        match parent {
            Some(id) => &mut self.nodes[id.0].children,
            None => &mut self.roots,
        }
    }

    pub fn slot(&self, parent: Option<NodeId>, kind: &str) -> Option<&ChildSlot> {
        self.slots(parent).get(kind)
    }

    pub fn slot_mut(&mut self, parent: Option<NodeId>, kind: &str) -> Option<&mut ChildSlot> {
        self.slots_mut(parent).get_mut(kind)
    }

    pub fn ensure_slot(&mut self, parent: Option<NodeId>, kind: &str, ordered: bool) -> &mut ChildSlot {
        self.slots_mut(parent)
            .entry(kind.to_string())
            .or_insert_with(|| ChildSlot::new(ordered))
    }

    pub fn find(&self, parent: Option<NodeId>, kind: &str, identity: &str) -> Option<NodeId> {
        self.slot(parent, kind)?.get(identity)
    }

    /// Attach a node under `parent` and return its id. A node without a
    /// parent is its own progenitor.
    pub fn add(&mut self, parent: Option<NodeId>, mut node: RecordNode, ordered: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        node.progenitor = match parent {
            Some(parent) => self.nodes[parent.0].progenitor,
            None => id,
        };
        let kind = node.kind.clone();
        let identity = node.identity.clone();
        self.nodes.push(node);
        self.ensure_slot(parent, &kind, ordered).insert(&identity, id);
        id
    }

    /// Children of `parent` across all kinds, each slot in traversal order.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        self.slots(parent)
            .values()
            .flat_map(ChildSlot::traversal_order)
            .collect()
    }

    /// Every node below `id`, depth-first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for child in self.children(Some(id)) {
            out.push(child);
            out.extend(self.descendants(child));
        }
        out
    }

    /// All nodes depth-first, self before children.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in self.children(None) {
            out.push(root);
            out.extend(self.descendants(root));
        }
        out
    }

    /// Returns false when `id` is not a node of this tree.
    pub fn set_apply(&mut self, id: NodeId, apply: bool) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) => {
                node.apply = apply;
                true
            }
            None => false,
        }
    }

    pub fn has_pending_changes(&self) -> bool {
        self.nodes.iter().any(RecordNode::is_pending)
    }

    /// Indented text view of the annotated tree.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for root in self.children(None) {
            self.outline_node(root, 0, &mut out);
        }
        out
    }

    fn outline_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        let marker = match (node.action, node.apply, node.blocked) {
            (Some(action), _, true) => format!(" [{}, blocked]", action),
            (Some(action), true, false) => format!(" [{}]", action),
            (Some(action), false, false) => format!(" [{}, skipped]", action),
            (None, _, _) => String::new(),
        };
        let _ = writeln!(out, "{}{} {}{}", indent, node.kind, node.identity, marker);
        for (field, old, new) in node.fields.changed() {
            let _ = writeln!(out, "{}    {}: {} -> {}", indent, field, old, new);
        }
        for (field, value) in &node.extras {
            let _ = writeln!(out, "{}    ?{}: {}", indent, field, value);
        }
        for child in self.children(Some(id)) {
            self.outline_node(child, depth + 1, out);
        }
    }
}

/// What `mark_change` writes into a progenitor's audit stamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeStamp {
    pub changed_at_field: String,
    pub changed_by_field: String,
    pub system_user: String,
    pub at: Value,
}

impl ChangeStamp {
    pub fn new(config: &EngineConfig, at: NaiveDateTime) -> Self {
        Self {
            changed_at_field: config.changed_at_field.clone(),
            changed_by_field: config.changed_by_field.clone(),
            system_user: config.system_user.clone(),
            at: Value::Timestamp(at),
        }
    }
}

/// Record that something under `node`'s progenitor changed.
///
/// Fresh inserts and deletes keep their action. Otherwise the progenitor's
/// stamps become diffs and it is forced to an applied update. Calling it
/// again changes nothing.
pub fn mark_change(tree: &mut RecordTree, node: NodeId, stamp: &ChangeStamp) {
    let progenitor = tree.node(node).progenitor;
    let record = tree.node_mut(progenitor);
    if matches!(record.action, Some(Action::Insert) | Some(Action::Delete)) {
        return;
    }

    if let Some(FieldValue::Scalar(old)) = record.fields.get(&stamp.changed_at_field) {
        let old = old.clone();
        record.fields.insert(
            stamp.changed_at_field.clone(),
            FieldValue::Diff {
                old,
                new: stamp.at.clone(),
            },
        );
    }

    let system = Value::Text(stamp.system_user.clone());
    if let Some(FieldValue::Scalar(old)) = record.fields.get(&stamp.changed_by_field)
        && !old.same_as(&system)
    {
        let old = old.clone();
        record.fields.insert(
            stamp.changed_by_field.clone(),
            FieldValue::Diff { old, new: system },
        );
    }

    record.action = Some(Action::Update);
    record.apply = true;
}
