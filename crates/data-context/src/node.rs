//! Observed node storage.
//!
//! Nodes live in the arena of a [`DataContext`](crate::DataContext) and refer
//! to each other through [`NodeId`] handles. A node never owns its parent:
//! `parent` is a plain handle whose validity is re-checked on every read.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::events::{Channel, Listener};
use crate::key::Key;
use crate::scheduler::TaskId;

/// Handle to an observed node: arena index plus generation.
///
/// A handle outlives its node only as a stale value; operations on it fail
/// with [`ContextError::StaleNode`](crate::ContextError::StaleNode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Content of a child position.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// String, number, bool or null. Never a record or array.
    Scalar(Value),
    Node(NodeId),
}

impl Slot {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Slot::Node(id) => Some(*id),
            Slot::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Slot::Scalar(v) => Some(v),
            Slot::Node(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Slot::Node(_))
    }
}

impl From<NodeId> for Slot {
    fn from(id: NodeId) -> Self {
        Slot::Node(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Record,
    Sequence,
}

impl NodeKind {
    /// Container kind of a plain value, `None` for scalars.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Object(_) => Some(NodeKind::Record),
            Value::Array(_) => Some(NodeKind::Sequence),
            _ => None,
        }
    }
}

/// Value accepted by writes: a plain value to wrap, or an existing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Value(Value),
    Node(NodeId),
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<&Value> for Input {
    fn from(value: &Value) -> Self {
        Input::Value(value.clone())
    }
}

impl From<NodeId> for Input {
    fn from(id: NodeId) -> Self {
        Input::Node(id)
    }
}

impl From<Slot> for Input {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Scalar(v) => Input::Value(v),
            Slot::Node(id) => Input::Node(id),
        }
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Input {
    fn from(s: String) -> Self {
        Input::Value(Value::String(s))
    }
}

impl From<bool> for Input {
    fn from(b: bool) -> Self {
        Input::Value(Value::Bool(b))
    }
}

impl From<i64> for Input {
    fn from(n: i64) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<f64> for Input {
    fn from(n: f64) -> Self {
        Input::Value(Value::from(n))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Children {
    Record(IndexMap<String, Slot>),
    Sequence(Vec<Slot>),
}

impl Children {
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Record => Children::Record(IndexMap::new()),
            NodeKind::Sequence => Children::Sequence(Vec::new()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Children::Record(_) => NodeKind::Record,
            Children::Sequence(_) => NodeKind::Sequence,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Children::Record(map) => map.len(),
            Children::Sequence(items) => items.len(),
        }
    }

    /// Lookup by a key already normalized for this container.
    pub fn get(&self, key: &Key) -> Option<&Slot> {
        match (self, key) {
            (Children::Record(map), Key::Name(name)) => map.get(name),
            (Children::Sequence(items), Key::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<Key> {
        match self {
            Children::Record(map) => map.keys().map(|k| Key::Name(k.clone())).collect(),
            Children::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    pub fn slots(&self) -> Box<dyn Iterator<Item = &Slot> + '_> {
        match self {
            Children::Record(map) => Box::new(map.values()),
            Children::Sequence(items) => Box::new(items.iter()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub children: Children,
    /// Contents were wholesale replaced, or membership changed by a delete.
    pub is_dirty: bool,
    /// Change ledger: children modified since the last flush.
    pub modified: Vec<Key>,
    pub property_name: Option<Key>,
    pub parent: Option<NodeId>,
    pub listeners: BTreeMap<Channel, Vec<Listener>>,
    /// Block comments attached to the node itself.
    pub metadata: Vec<String>,
    /// Block comments attached to scalar children.
    pub key_metadata: IndexMap<Key, Vec<String>>,
    pub pending_change: Option<TaskId>,
    /// Set while the `-change` listeners are taken out for a delivery.
    pub delivering_change: bool,
}

impl NodeData {
    pub fn new(kind: NodeKind, property_name: Option<Key>, parent: Option<NodeId>) -> Self {
        Self {
            children: Children::empty(kind),
            is_dirty: false,
            modified: Vec::new(),
            property_name,
            parent,
            listeners: BTreeMap::new(),
            metadata: Vec::new(),
            key_metadata: IndexMap::new(),
            pending_change: None,
            delivering_change: false,
        }
    }

    /// Adds `key` to the ledger; returns `false` when it was already there.
    pub fn record_modified(&mut self, key: Key) -> bool {
        if self.modified.contains(&key) {
            return false;
        }
        self.modified.push(key);
        true
    }

    pub fn evict_modified(&mut self, key: &Key) {
        self.modified.retain(|k| k != key);
    }
}
