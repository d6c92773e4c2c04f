//! The observed-tree arena and the node wrapper.
//!
//! [`DataContext`] owns every observed node. Wrapping a plain
//! [`serde_json::Value`] turns each record and array into a node; scalars are
//! stored inline as [`Slot::Scalar`]. Mutations go through the interceptor
//! methods (`write`, `remove`, `set_len`), which keep the change ledger
//! current and fire listeners.

use indexmap::IndexSet;
use serde_json::{Map, Value};
use web_time::Instant;

use crate::arena::Arena;
use crate::config::Config;
use crate::error::ContextError;
use crate::events::{Channel, Event};
use crate::key::{parse_pointer, Key};
use crate::node::{Children, NodeData, NodeId, NodeKind, Slot};
use crate::scheduler::{ScheduledTask, Scheduler, TaskId};

#[derive(Debug, Default)]
pub struct DataContext {
    pub(crate) arena: Arena,
    pub(crate) config: Config,
    pub(crate) scheduler: Scheduler,
    roots: IndexSet<NodeId>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Node wrapper ──────────────────────────────────────────────────────

    /// Wraps a plain value. Records and arrays become observed nodes
    /// registered as roots; scalars pass through unchanged.
    pub fn wrap(&mut self, value: Value) -> Slot {
        let slot = self.build(value, None, None);
        if let Slot::Node(id) = slot {
            self.roots.insert(id);
        }
        slot
    }

    /// Like [`wrap`](Self::wrap) but requires a record or array.
    pub fn wrap_node(&mut self, value: Value) -> Result<NodeId, ContextError> {
        if NodeKind::of(&value).is_none() {
            return Err(ContextError::NotContainer);
        }
        self.wrap(value).as_node().ok_or(ContextError::NotContainer)
    }

    /// Creates an empty root node.
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = self.arena.insert(NodeData::new(kind, None, None));
        self.roots.insert(id);
        id
    }

    /// Recursively wraps `value`, naming the top node `property_name` under
    /// `parent`. Does not touch the parent's children or ledger.
    pub(crate) fn build(
        &mut self,
        value: Value,
        property_name: Option<Key>,
        parent: Option<NodeId>,
    ) -> Slot {
        let Some(kind) = NodeKind::of(&value) else {
            return Slot::Scalar(value);
        };
        let id = self
            .arena
            .insert(NodeData::new(kind, property_name, parent));
        let children = match value {
            Value::Object(map) => {
                let mut out = indexmap::IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    let slot = self.build(v, Some(Key::Name(k.clone())), Some(id));
                    out.insert(k, slot);
                }
                Children::Record(out)
            }
            Value::Array(items) => Children::Sequence(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| self.build(v, Some(Key::Index(i)), Some(id)))
                    .collect(),
            ),
            _ => Children::empty(kind),
        };
        if let Some(data) = self.arena.get_mut(id) {
            data.children = children;
        }
        Slot::Node(id)
    }

    /// Allocates an empty detached node; the caller attaches it.
    pub(crate) fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.arena.insert(NodeData::new(kind, None, None))
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    pub(crate) fn data(&self, id: NodeId) -> Result<&NodeData, ContextError> {
        self.arena.get(id).ok_or(ContextError::StaleNode)
    }

    pub(crate) fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, ContextError> {
        self.arena.get_mut(id).ok_or(ContextError::StaleNode)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id)
    }

    /// Number of live nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind, ContextError> {
        Ok(self.data(id)?.children.kind())
    }

    pub fn len(&self, id: NodeId) -> Result<usize, ContextError> {
        Ok(self.data(id)?.children.len())
    }

    pub fn is_empty(&self, id: NodeId) -> Result<bool, ContextError> {
        Ok(self.len(id)? == 0)
    }

    /// Current keys in iteration order.
    pub fn keys(&self, id: NodeId) -> Result<Vec<Key>, ContextError> {
        Ok(self.data(id)?.children.keys())
    }

    /// Converts `key` to the form used by the node: names for records,
    /// indices for sequences.
    pub(crate) fn normalize_key(&self, id: NodeId, key: Key) -> Result<Key, ContextError> {
        match self.kind(id)? {
            NodeKind::Record => Ok(Key::Name(key.as_name())),
            NodeKind::Sequence => key
                .as_index()
                .map(Key::Index)
                .ok_or(ContextError::KeyMismatch(key)),
        }
    }

    pub fn get(&self, id: NodeId, key: impl Into<Key>) -> Result<Option<Slot>, ContextError> {
        let key = match self.normalize_key(id, key.into()) {
            Ok(key) => key,
            Err(ContextError::KeyMismatch(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self.data(id)?.children.get(&key).cloned())
    }

    /// Child node at `key`, if that slot holds a node.
    pub fn child(&self, id: NodeId, key: impl Into<Key>) -> Option<NodeId> {
        self.get(id, key).ok().flatten().and_then(|slot| slot.as_node())
    }

    pub fn contains_key(&self, id: NodeId, key: impl Into<Key>) -> Result<bool, ContextError> {
        Ok(self.get(id, key)?.is_some())
    }

    /// The node's parent, if the parent's slot at the node's property name
    /// still holds this node. An orphaned node reports `None`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.arena.get(id)?;
        let parent = node.parent?;
        let name = node.property_name.as_ref()?;
        match self.arena.get(parent)?.children.get(name) {
            Some(Slot::Node(child)) if *child == id => Some(parent),
            _ => None,
        }
    }

    pub fn property_name(&self, id: NodeId) -> Option<Key> {
        self.arena.get(id)?.property_name.clone()
    }

    /// Path from the topmost reachable ancestor down to `id`.
    pub fn path_of(&self, id: NodeId) -> Vec<Key> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if let Some(name) = self.property_name(current) {
                path.push(name);
            }
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether `ancestor` is `id` or one of its valid ancestors.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    pub fn find(&self, root: NodeId, path: &[Key]) -> Result<Option<Slot>, ContextError> {
        let mut current = Slot::Node(root);
        for key in path {
            let Slot::Node(id) = current else {
                return Ok(None);
            };
            match self.get(id, key)? {
                Some(slot) => current = slot,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolves an RFC 6901 pointer below `root`.
    pub fn find_pointer(&self, root: NodeId, pointer: &str) -> Result<Option<Slot>, ContextError> {
        let path = parse_pointer(pointer)?;
        self.find(root, &path)
    }

    // ── Metadata ──────────────────────────────────────────────────────────

    pub fn metadata(&self, id: NodeId) -> Result<&[String], ContextError> {
        Ok(&self.data(id)?.metadata)
    }

    pub fn set_metadata(&mut self, id: NodeId, metadata: Vec<String>) -> Result<(), ContextError> {
        self.data_mut(id)?.metadata = metadata;
        Ok(())
    }

    /// Comments attached to the scalar at `key`.
    pub fn key_metadata(&self, id: NodeId, key: impl Into<Key>) -> Result<&[String], ContextError> {
        let key = self.normalize_key(id, key.into())?;
        Ok(self
            .data(id)?
            .key_metadata
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    pub fn set_key_metadata(
        &mut self,
        id: NodeId,
        key: impl Into<Key>,
        metadata: Vec<String>,
    ) -> Result<(), ContextError> {
        let key = self.normalize_key(id, key.into())?;
        let data = self.data_mut(id)?;
        if metadata.is_empty() {
            data.key_metadata.shift_remove(&key);
        } else {
            data.key_metadata.insert(key, metadata);
        }
        Ok(())
    }

    // ── Plain export ──────────────────────────────────────────────────────

    pub fn to_value(&self, slot: &Slot) -> Result<Value, ContextError> {
        match slot {
            Slot::Scalar(v) => Ok(v.clone()),
            Slot::Node(id) => self.node_value(*id),
        }
    }

    pub fn node_value(&self, id: NodeId) -> Result<Value, ContextError> {
        match &self.data(id)?.children {
            Children::Record(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, slot) in map {
                    out.insert(k.clone(), self.to_value(slot)?);
                }
                Ok(Value::Object(out))
            }
            Children::Sequence(items) => items
                .iter()
                .map(|slot| self.to_value(slot))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    // ── Roots and reclamation ─────────────────────────────────────────────

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().copied()
    }

    pub fn add_root(&mut self, id: NodeId) -> Result<(), ContextError> {
        self.data(id)?;
        self.roots.insert(id);
        Ok(())
    }

    /// Unregisters a root; its nodes are reclaimed by the next
    /// [`collect_garbage`](Self::collect_garbage) unless reachable otherwise.
    pub fn release_root(&mut self, id: NodeId) -> bool {
        self.roots.shift_remove(&id)
    }

    /// Mark-and-sweep from the registered roots. Returns the number of
    /// reclaimed nodes; handles to them become stale.
    pub fn collect_garbage(&mut self) -> usize {
        let mut marked = IndexSet::new();
        let mut stack: Vec<NodeId> = self.roots.iter().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(data) = self.arena.get(id) else {
                continue;
            };
            if !marked.insert(id) {
                continue;
            }
            stack.extend(data.children.slots().filter_map(Slot::as_node));
        }
        let mut reclaimed = 0;
        for id in self.arena.ids() {
            if marked.contains(&id) {
                continue;
            }
            if let Some(data) = self.arena.remove(id) {
                if let Some(task) = data.pending_change {
                    self.scheduler.cancel(task);
                }
                reclaimed += 1;
            }
        }
        self.roots.retain(|id| marked.contains(id));
        reclaimed
    }

    // ── Debounced delivery ────────────────────────────────────────────────

    /// Schedules the `-change` aggregate for `id` if it has listeners on that
    /// channel, replacing any pending delivery.
    pub(crate) fn schedule_change(&mut self, id: NodeId) -> bool {
        let due = Instant::now() + self.config.debounce();
        let Some(data) = self.arena.get_mut(id) else {
            return false;
        };
        let listening = data.delivering_change
            || data
                .listeners
                .get(&Channel::Change)
                .is_some_and(|l| !l.is_empty());
        if !listening {
            return false;
        }
        let previous = data.pending_change.take();
        if let Some(task) = previous {
            self.scheduler.cancel(task);
        }
        let task = self.scheduler.schedule(id, due);
        tracing::trace!(node = ?id, ?task, "debounced change scheduled");
        if let Some(data) = self.arena.get_mut(id) {
            data.pending_change = Some(task);
        }
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.scheduler.is_empty()
    }

    /// Delivers every scheduled `-change` aggregate regardless of deadline.
    /// Deliveries scheduled by the listeners themselves stay queued.
    pub fn run_pending(&mut self) -> usize {
        let tasks = self.scheduler.take_all();
        self.deliver(tasks)
    }

    /// Delivers the `-change` aggregates whose debounce window elapsed.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let tasks = self.scheduler.take_due(now);
        self.deliver(tasks)
    }

    fn deliver(&mut self, tasks: Vec<(TaskId, ScheduledTask)>) -> usize {
        let mut delivered = 0;
        for (task, scheduled) in tasks {
            let node = scheduled.node;
            match self.arena.get_mut(node) {
                Some(data) if data.pending_change == Some(task) => data.pending_change = None,
                _ => continue,
            }
            if self.emit(node, &Channel::Change, &Event::change(node)) {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrap_recursively_parents_children() {
        let mut ctx = DataContext::new();
        let root = ctx
            .wrap_node(json!({"a": {"b": [1, {"c": true}]}, "n": 1}))
            .unwrap();

        let a = ctx.child(root, "a").unwrap();
        let b = ctx.child(a, "b").unwrap();
        let c = ctx.child(b, 1usize).unwrap();

        assert_eq!(ctx.parent(a), Some(root));
        assert_eq!(ctx.parent(c), Some(b));
        assert_eq!(ctx.property_name(c), Some(Key::Index(1)));
        assert_eq!(ctx.parent(root), None);
        assert_eq!(ctx.path_of(c), vec![Key::from("a"), Key::from("b"), Key::Index(1)]);
        assert_eq!(ctx.get(root, "n").unwrap(), Some(Slot::Scalar(json!(1))));
        assert_eq!(ctx.node_count(), 4);
        assert!(!ctx.data(root).unwrap().is_dirty);
    }

    #[test]
    fn scalars_pass_through_wrap() {
        let mut ctx = DataContext::new();
        assert_eq!(ctx.wrap(json!("x")), Slot::Scalar(json!("x")));
        assert_eq!(ctx.wrap_node(json!(3)), Err(ContextError::NotContainer));
        assert_eq!(ctx.node_count(), 0);
    }

    #[test]
    fn node_value_round_trips_plain_data() {
        let mut ctx = DataContext::new();
        let value = json!({"z": 1, "a": [null, "s", 2.5, {"k": false}]});
        let root = ctx.wrap_node(value.clone()).unwrap();
        assert_eq!(ctx.node_value(root).unwrap(), value);
        // Record order is preserved.
        assert_eq!(ctx.keys(root).unwrap(), vec![Key::from("z"), Key::from("a")]);
    }

    #[test]
    fn find_resolves_keys_and_pointers() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"items": [{"id": 7}], "0": "zero"})).unwrap();
        assert_eq!(
            ctx.find_pointer(root, "/items/0/id").unwrap(),
            Some(Slot::Scalar(json!(7)))
        );
        assert_eq!(
            ctx.find_pointer(root, "/0").unwrap(),
            Some(Slot::Scalar(json!("zero")))
        );
        assert_eq!(ctx.find_pointer(root, "/items/x").unwrap(), None);
        assert_eq!(ctx.find_pointer(root, "/items/0/id/deeper").unwrap(), None);
    }

    #[test]
    fn collect_garbage_reclaims_unreachable_nodes() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"keep": {"x": 1}, "drop": {"y": [2]}})).unwrap();
        let drop = ctx.child(root, "drop").unwrap();
        ctx.remove(root, "drop").unwrap();

        assert!(ctx.contains(drop));
        assert_eq!(ctx.collect_garbage(), 2);
        assert!(!ctx.contains(drop));
        assert_eq!(ctx.get(drop, "y"), Err(ContextError::StaleNode));
        assert_eq!(ctx.node_count(), 2);

        assert!(ctx.release_root(root));
        assert_eq!(ctx.collect_garbage(), 2);
        assert_eq!(ctx.node_count(), 0);
    }
}
