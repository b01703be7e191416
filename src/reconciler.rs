//! Sequence numbers and deletion-by-absence across sibling collections.

use tracing::debug;

use crate::config::EngineConfig;
use crate::core::Value;
use crate::tree::{Action, ChangeStamp, FieldValue, NodeId, RecordTree, mark_change};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub renumbered: usize,
    pub deleted: usize,
}

pub struct OrderReconciler<'a> {
    config: &'a EngineConfig,
    stamp: &'a ChangeStamp,
}

impl<'a> OrderReconciler<'a> {
    pub fn new(config: &'a EngineConfig, stamp: &'a ChangeStamp) -> Self {
        Self { config, stamp }
    }

    pub fn reconcile(&self, tree: &mut RecordTree) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        self.visit(tree, None, &mut summary);
        debug!(renumbered = summary.renumbered, deleted = summary.deleted, "order reconciled");
        summary
    }

    fn visit(&self, tree: &mut RecordTree, parent: Option<NodeId>, summary: &mut ReconcileSummary) {
        let parent_deleted = parent.is_some_and(|id| tree.node(id).is_delete());
        let kinds: Vec<String> = tree.slots(parent).keys().cloned().collect();

        for kind in kinds {
            let Some(slot) = tree.slot(parent, &kind) else {
                continue;
            };
            let ordered = slot.is_ordered();
            let order = slot.effective_order();
            let dropped = slot.dropped();
            let members = slot.traversal_order();

            if ordered {
                for (index, id) in order.into_iter().enumerate() {
                    if self.renumber(tree, id, index as i64 + 1) {
                        summary.renumbered += 1;
                    }
                }
            }

            for id in dropped {
                if self.delete(tree, id) {
                    summary.deleted += 1;
                }
            }

            if parent_deleted {
                for &id in &members {
                    if self.delete(tree, id) {
                        summary.deleted += 1;
                    }
                }
            }

            for id in members {
                self.visit(tree, Some(id), summary);
            }
        }
    }

    /// Bring a node's sequence number to `position`; true when it changed.
    fn renumber(&self, tree: &mut RecordTree, id: NodeId, position: i64) -> bool {
        let field = &self.config.order_field;
        let position = Value::Integer(position);
        let node = tree.node_mut(id);

        if node.is_insert() {
            node.fields.insert(field.clone(), FieldValue::Scalar(position));
            return false;
        }
        let Some(current) = node.fields.get(field) else {
            return false;
        };
        if current.current().loosely_equals(&position) {
            return false;
        }

        let old = current.original().clone();
        node.fields.insert(field.clone(), FieldValue::Diff { old, new: position });
        if !node.is_delete() {
            node.action = Some(Action::Update);
        }
        node.apply = true;
        mark_change(tree, id, self.stamp);
        true
    }

    /// Mark for removal; true when the node was not already being deleted.
    fn delete(&self, tree: &mut RecordTree, id: NodeId) -> bool {
        let node = tree.node_mut(id);
        let fresh = !node.is_delete();
        node.action = Some(Action::Delete);
        node.apply = true;
        mark_change(tree, id, self.stamp);
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{FieldMap, RecordNode};
    use chrono::NaiveDate;

    fn stamp() -> ChangeStamp {
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        ChangeStamp::new(&EngineConfig::default(), at)
    }

    fn line(number: i64) -> RecordNode {
        let mut fields = FieldMap::new();
        fields.insert("line_no", FieldValue::Scalar(Value::Integer(number)));
        fields.insert("order_number", FieldValue::Scalar(Value::Integer(number)));
        RecordNode::new("OrderLine", number.to_string(), fields)
    }

    /// Order 1 with stored lines 1, 2, 3; line 2 has one detail.
    fn tree() -> (RecordTree, NodeId, Vec<NodeId>, NodeId) {
        let mut tree = RecordTree::new();
        let mut fields = FieldMap::new();
        fields.insert("changed_on", FieldValue::Scalar(Value::from("2020-01-01 00:00:00")));
        let order = tree.add(None, RecordNode::new("Order", "1", fields), false);
        let lines: Vec<NodeId> = (1..=3)
            .map(|n| {
                let id = tree.add(Some(order), line(n), true);
                tree.slot_mut(Some(order), "OrderLine")
                    .unwrap()
                    .record_stored(&n.to_string());
                id
            })
            .collect();
        let detail = tree.add(Some(lines[1]), RecordNode::new("Detail", "a", FieldMap::new()), false);
        (tree, order, lines, detail)
    }

    #[test]
    fn test_absent_records_are_deleted_with_descendants() {
        let (mut tree, order, lines, detail) = tree();
        let slot = tree.slot_mut(Some(order), "OrderLine").unwrap();
        slot.record_proposed("1");
        slot.record_proposed("3");

        let config = EngineConfig::default();
        let stamp = stamp();
        let summary = OrderReconciler::new(&config, &stamp).reconcile(&mut tree);

        assert_eq!(tree.node(lines[1]).action, Some(Action::Delete));
        assert_eq!(tree.node(detail).action, Some(Action::Delete));
        assert!(tree.node(detail).apply);
        assert_eq!(summary.deleted, 2);

        // line 3 moves up to position 2
        assert_eq!(
            tree.node(lines[2]).fields.get("order_number"),
            Some(&FieldValue::Diff {
                old: Value::Integer(3),
                new: Value::Integer(2),
            })
        );
        assert_eq!(summary.renumbered, 1);
        assert_eq!(tree.node(lines[0]).action, None);
        assert_eq!(tree.node(order).action, Some(Action::Update));
        assert!(tree.node(order).fields.get("changed_on").unwrap().is_diff());
    }

    #[test]
    fn test_stored_order_alone_changes_nothing() {
        let (mut tree, _, _, _) = tree();
        let config = EngineConfig::default();
        let stamp = stamp();
        let summary = OrderReconciler::new(&config, &stamp).reconcile(&mut tree);
        assert_eq!(summary, ReconcileSummary::default());
        assert!(!tree.has_pending_changes());
    }

    #[test]
    fn test_insert_takes_its_position() {
        let (mut tree, order, _, _) = tree();
        let mut fresh = line(9);
        fresh.action = Some(Action::Insert);
        fresh.apply = true;
        let inserted = tree.add(Some(order), fresh, true);
        let slot = tree.slot_mut(Some(order), "OrderLine").unwrap();
        for identity in ["9", "1", "2", "3"] {
            slot.record_proposed(identity);
        }

        let config = EngineConfig::default();
        let stamp = stamp();
        OrderReconciler::new(&config, &stamp).reconcile(&mut tree);
        assert_eq!(tree.node(inserted).value("order_number"), Some(&Value::Integer(1)));
        assert_eq!(
            tree.node(tree.find(Some(order), "OrderLine", "3").unwrap()).value("order_number"),
            Some(&Value::Integer(4))
        );
    }
}
