use std::collections::{HashMap, HashSet};

use super::NodeId;

/// Identities in first-seen sequence.
#[derive(Debug, Clone, Default)]
struct Sequence {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl Sequence {
    fn push(&mut self, identity: &str) {
        if self.seen.insert(identity.to_string()) {
            self.order.push(identity.to_string());
        }
    }

    fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }
}

/// Children of one kind under one parent.
///
/// The stored order is present for order-significant kinds and lists member
/// identities in persisted sequence; the proposed order lists them in the
/// sequence the proposed rows walked them.
#[derive(Debug, Clone, Default)]
pub struct ChildSlot {
    members: Vec<NodeId>,
    index: HashMap<String, NodeId>,
    stored_order: Option<Sequence>,
    proposed_order: Option<Sequence>,
}

impl ChildSlot {
    pub fn new(ordered: bool) -> Self {
        Self {
            stored_order: ordered.then(Sequence::default),
            ..Self::default()
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.stored_order.is_some()
    }

    pub fn stored_order(&self) -> Option<&[String]> {
        self.stored_order.as_ref().map(|sequence| sequence.order.as_slice())
    }

    pub fn proposed_order(&self) -> Option<&[String]> {
        self.proposed_order.as_ref().map(|sequence| sequence.order.as_slice())
    }

    pub fn get(&self, identity: &str) -> Option<NodeId> {
        self.index.get(identity).copied()
    }

    pub(crate) fn insert(&mut self, identity: &str, id: NodeId) {
        self.members.push(id);
        self.index.insert(identity.to_string(), id);
    }

    /// Members in insertion order.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn record_stored(&mut self, identity: &str) {
        if let Some(order) = &mut self.stored_order {
            order.push(identity);
        }
    }

    /// First occurrence wins.
    pub fn record_proposed(&mut self, identity: &str) {
        self.proposed_order.get_or_insert_with(Sequence::default).push(identity);
    }

    /// Proposed order, else stored order, else insertion order.
    pub fn effective_order(&self) -> Vec<NodeId> {
        match self.proposed_order().or(self.stored_order()) {
            Some(order) => order.iter().filter_map(|identity| self.get(identity)).collect(),
            None => self.members.clone(),
        }
    }

    /// Effective order followed by the members it leaves out.
    pub fn traversal_order(&self) -> Vec<NodeId> {
        let mut order = self.effective_order();
        let mut seen: HashSet<NodeId> = order.iter().copied().collect();
        for id in &self.members {
            if seen.insert(*id) {
                order.push(*id);
            }
        }
        order
    }

    /// Stored identities the proposed order no longer mentions.
    pub fn dropped(&self) -> Vec<NodeId> {
        let (Some(stored), Some(proposed)) = (&self.stored_order, &self.proposed_order) else {
            return Vec::new();
        };
        stored
            .order
            .iter()
            .filter(|identity| !proposed.contains(identity))
            .filter_map(|identity| self.get(identity))
            .collect()
    }
}
