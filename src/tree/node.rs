use std::collections::BTreeMap;
use std::fmt;

use crate::core::Value;

use super::ChildSlot;

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A field's value, or its stored and proposed values once they differ.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Diff { old: Value, new: Value },
}

impl FieldValue {
    /// Value the record will hold after the plan is applied.
    pub fn current(&self) -> &Value {
        match self {
            Self::Scalar(value) => value,
            Self::Diff { new, .. } => new,
        }
    }

    /// Value the record holds in the store.
    pub fn original(&self) -> &Value {
        match self {
            Self::Scalar(value) => value,
            Self::Diff { old, .. } => old,
        }
    }

    pub fn is_diff(&self) -> bool {
        matches!(self, Self::Diff { .. })
    }
}

/// Field map that keeps insertion order, so rendered column lists follow
/// the order fields were loaded or seeded in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.entries
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.entries.iter().position(|(field, _)| *field == name) {
            Some(pos) => self.entries[pos].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fields holding a diff, with their old and new values.
    pub fn changed(&self) -> impl Iterator<Item = (&str, &Value, &Value)> {
        self.entries.iter().filter_map(|(name, value)| match value {
            FieldValue::Diff { old, new } => Some((name.as_str(), old, new)),
            FieldValue::Scalar(_) => None,
        })
    }
}

/// One record instance in the annotated tree.
#[derive(Debug, Clone)]
pub struct RecordNode {
    pub kind: String,
    /// Own key values joined with `:`.
    pub identity: String,
    pub fields: FieldMap,
    /// Proposed fields the record does not carry; shown, never planned.
    pub extras: Vec<(String, Value)>,
    pub action: Option<Action>,
    pub apply: bool,
    /// A required insert that could not be synthesized.
    pub blocked: bool,
    pub parent: Option<NodeId>,
    pub progenitor: NodeId,
    pub children: BTreeMap<String, ChildSlot>,
}

impl RecordNode {
    pub(crate) fn new(kind: impl Into<String>, identity: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            kind: kind.into(),
            identity: identity.into(),
            fields,
            extras: Vec::new(),
            action: None,
            apply: false,
            blocked: false,
            parent: None,
            progenitor: NodeId(0),
            children: BTreeMap::new(),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.action == Some(Action::Insert)
    }

    pub fn is_delete(&self) -> bool {
        self.action == Some(Action::Delete)
    }

    /// Marked for the plan: has an action and the apply flag.
    pub fn is_pending(&self) -> bool {
        self.action.is_some() && self.apply
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(FieldValue::current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_map_keeps_position_on_replace() {
        let mut fields = FieldMap::new();
        fields.insert("a", FieldValue::Scalar(Value::Integer(1)));
        fields.insert("b", FieldValue::Scalar(Value::Integer(2)));
        fields.insert(
            "a",
            FieldValue::Diff {
                old: Value::Integer(1),
                new: Value::Integer(3),
            },
        );

        let names: Vec<_> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(fields.get("a").unwrap().current(), &Value::Integer(3));
        assert_eq!(fields.get("a").unwrap().original(), &Value::Integer(1));
        assert_eq!(fields.changed().count(), 1);
    }
}
