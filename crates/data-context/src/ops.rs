//! Mutation interceptor.
//!
//! Every structural change of an observed tree goes through [`write`],
//! [`remove`] or [`set_len`]. Each call classifies the mutation, updates the
//! change ledger and fires the key channel, the bubbling `-` channel and the
//! debounced `-change` aggregate, in that order.
//!
//! [`write`]: DataContext::write
//! [`remove`]: DataContext::remove
//! [`set_len`]: DataContext::set_len

use indexmap::IndexMap;

use crate::context::DataContext;
use crate::error::ContextError;
use crate::events::{Channel, Event, EventKind};
use crate::key::Key;
use crate::node::{Children, Input, NodeId, NodeKind, Slot};

impl DataContext {
    /// Writes `value` at `key` of `node`.
    ///
    /// Returns the classified event kind, or `None` when the slot already
    /// held the same node or an equal scalar.
    pub fn write(
        &mut self,
        node: NodeId,
        key: impl Into<Key>,
        value: impl Into<Input>,
    ) -> Result<Option<EventKind>, ContextError> {
        let key = self.normalize_key(node, key.into())?;
        let len = self.len(node)?;
        if let Key::Index(index) = key {
            if index > len {
                return Err(ContextError::IndexOutOfBounds { index, len });
            }
        }

        let input = value.into();
        if let Input::Node(id) = input {
            self.data(id)?;
            if self.is_ancestor_or_self(id, node) {
                return Err(ContextError::Cycle);
            }
        }

        let old = self.data(node)?.children.get(&key).cloned();
        match (&old, &input) {
            (Some(Slot::Node(a)), Input::Node(b)) if a == b => return Ok(None),
            (Some(Slot::Scalar(a)), Input::Value(b)) if NodeKind::of(b).is_none() && a == b => {
                return Ok(None)
            }
            _ => {}
        }

        // Any existing node arriving from another (parent, key) is a move,
        // including detached roots and orphans.
        let kind = match input {
            Input::Node(id) if self.is_moved(id, node, &key)? => EventKind::Reposition,
            _ if old.is_none() => EventKind::New,
            _ => EventKind::Set,
        };

        let slot = match input {
            Input::Node(id) => Slot::Node(id),
            Input::Value(value) => self.build(value, Some(key.clone()), Some(node)),
        };

        let data = self.data_mut(node)?;
        match (&mut data.children, &key) {
            (Children::Record(map), Key::Name(name)) => {
                map.insert(name.clone(), slot.clone());
            }
            (Children::Sequence(items), Key::Index(index)) => match items.get_mut(*index) {
                Some(existing) => *existing = slot.clone(),
                None => items.push(slot.clone()),
            },
            _ => return Err(ContextError::KeyMismatch(key)),
        }
        if let Slot::Node(child) = slot {
            let child = self.data_mut(child)?;
            child.is_dirty = true;
            child.parent = Some(node);
            child.property_name = Some(key.clone());
        }

        self.mark_modified(node, key.clone())?;

        let event = Event::mutation(kind, node, key.clone(), old, Some(slot));
        self.emit(node, &Channel::key(&key), &event);
        self.emit_to_parent(node, &Channel::Any, &event);
        self.emit_to_parent(node, &Channel::Change, &event);
        Ok(Some(kind))
    }

    /// Appends to a sequence, returning the new element's index.
    pub fn push(&mut self, node: NodeId, value: impl Into<Input>) -> Result<usize, ContextError> {
        if self.kind(node)? != NodeKind::Sequence {
            return Err(ContextError::NotSequence);
        }
        let index = self.len(node)?;
        self.write(node, index, value)?;
        Ok(index)
    }

    /// Deletes `key`, returning the removed slot. Missing keys are a no-op.
    ///
    /// Sequence elements after the removed one shift down; their property
    /// names, ledger entries and comments follow them.
    pub fn remove(&mut self, node: NodeId, key: impl Into<Key>) -> Result<Option<Slot>, ContextError> {
        self.remove_entry(node, key.into(), true)
    }

    /// Truncates a sequence to `new_len`, deleting from the tail one index at
    /// a time, then schedules a single `-change` delivery. Returns the number
    /// of removed elements.
    pub fn set_len(&mut self, node: NodeId, new_len: usize) -> Result<usize, ContextError> {
        if self.kind(node)? != NodeKind::Sequence {
            return Err(ContextError::NotSequence);
        }
        let len = self.len(node)?;
        if new_len >= len {
            return Ok(0);
        }
        let mut removed = 0;
        for index in (new_len..len).rev() {
            if self.remove_entry(node, Key::Index(index), false)?.is_some() {
                removed += 1;
            }
        }
        self.emit_to_parent(node, &Channel::Change, &Event::change(node));
        Ok(removed)
    }

    fn is_moved(&self, id: NodeId, parent: NodeId, key: &Key) -> Result<bool, ContextError> {
        let data = self.data(id)?;
        Ok(data.parent != Some(parent) || data.property_name.as_ref() != Some(key))
    }

    pub(crate) fn remove_entry(
        &mut self,
        node: NodeId,
        key: Key,
        notify_change: bool,
    ) -> Result<Option<Slot>, ContextError> {
        let key = match self.normalize_key(node, key) {
            Ok(key) => key,
            Err(ContextError::KeyMismatch(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let data = self.data_mut(node)?;
        let removed = match (&mut data.children, &key) {
            (Children::Record(map), Key::Name(name)) => map.shift_remove(name),
            (Children::Sequence(items), Key::Index(index)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            _ => None,
        };
        let Some(old) = removed else {
            return Ok(None);
        };
        data.is_dirty = true;

        // Whether the element shifting into the freed index carries its own
        // ledger entry, which must survive the eviction below.
        let mut carried = false;
        match key {
            Key::Index(index) => {
                carried = data.modified.contains(&Key::Index(index + 1));
                data.modified = shift_keys(std::mem::take(&mut data.modified), index);
                data.key_metadata = shift_metadata(std::mem::take(&mut data.key_metadata), index);
                self.renumber_from(node, index)?;
            }
            Key::Name(_) => {
                data.key_metadata.shift_remove(&key);
            }
        }

        self.mark_modified(node, key.clone())?;

        let event = Event::mutation(EventKind::Delete, node, key.clone(), Some(old.clone()), None);
        self.emit(node, &Channel::key(&key), &event);
        self.emit_to_parent(node, &Channel::Any, &event);

        if !carried {
            if let Some(data) = self.arena.get_mut(node) {
                data.evict_modified(&key);
            }
        }
        if notify_change {
            self.emit_to_parent(node, &Channel::Change, &event);
        }
        Ok(Some(old))
    }

    /// Points the property names of sequence children at `from..` to their
    /// current positions.
    fn renumber_from(&mut self, node: NodeId, from: usize) -> Result<(), ContextError> {
        let moved: Vec<(usize, NodeId)> = match &self.data(node)?.children {
            Children::Sequence(items) => items
                .iter()
                .enumerate()
                .skip(from)
                .filter_map(|(i, slot)| slot.as_node().map(|id| (i, id)))
                .collect(),
            Children::Record(_) => return Ok(()),
        };
        for (index, child) in moved {
            if let Some(data) = self.arena.get_mut(child) {
                if data.parent == Some(node) {
                    data.property_name = Some(Key::Index(index));
                }
            }
        }
        Ok(())
    }
}

/// Drops `removed` and moves every later index down by one.
fn shift_keys(keys: Vec<Key>, removed: usize) -> Vec<Key> {
    keys.into_iter()
        .filter_map(|key| match key {
            Key::Index(i) if i == removed => None,
            Key::Index(i) if i > removed => Some(Key::Index(i - 1)),
            other => Some(other),
        })
        .collect()
}

fn shift_metadata(
    metadata: IndexMap<Key, Vec<String>>,
    removed: usize,
) -> IndexMap<Key, Vec<String>> {
    metadata
        .into_iter()
        .filter_map(|(key, comments)| match key {
            Key::Index(i) if i == removed => None,
            Key::Index(i) if i > removed => Some((Key::Index(i - 1), comments)),
            other => Some((other, comments)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use crate::events::EventKind;
    use crate::key::Key;
    use crate::node::Slot;
    use crate::{ContextError, DataContext};

    fn record_kinds(ctx: &mut DataContext, node: crate::NodeId) -> Rc<RefCell<Vec<(EventKind, String)>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctx.on(
            node,
            "-",
            move |_, ev| {
                let path = crate::key::format_pointer(&ev.path);
                sink.borrow_mut().push((ev.kind, path));
                true
            },
            true,
        )
        .unwrap();
        seen
    }

    #[test]
    fn writes_classify_new_set_and_noop() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": 1})).unwrap();
        let seen = record_kinds(&mut ctx, root);

        assert_eq!(ctx.write(root, "a", 1i64).unwrap(), None);
        assert_eq!(ctx.write(root, "a", 2i64).unwrap(), Some(EventKind::Set));
        assert_eq!(ctx.write(root, "b", json!({"x": 1})).unwrap(), Some(EventKind::New));

        let b = ctx.child(root, "b").unwrap();
        assert!(ctx.is_dirty(b).unwrap());
        assert_eq!(ctx.parent(b), Some(root));
        assert_eq!(
            seen.borrow().as_slice(),
            &[(EventKind::Set, "/a".to_string()), (EventKind::New, "/b".to_string())]
        );
    }

    #[test]
    fn moving_a_node_reports_reposition() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": {"v": 1}})).unwrap();
        let a = ctx.child(root, "a").unwrap();

        assert_eq!(ctx.write(root, "b", a).unwrap(), Some(EventKind::Reposition));
        assert_eq!(ctx.property_name(a), Some(Key::from("b")));
        // The old slot still references the node but no longer parents it.
        assert_eq!(ctx.write(root, "b", a).unwrap(), None);
    }

    #[test]
    fn sequence_bounds_and_key_forms() {
        let mut ctx = DataContext::new();
        let seq = ctx.wrap_node(json!([1, 2])).unwrap();

        assert_eq!(
            ctx.write(seq, 5usize, 0i64),
            Err(ContextError::IndexOutOfBounds { index: 5, len: 2 })
        );
        assert_eq!(ctx.write(seq, "x", 0i64), Err(ContextError::KeyMismatch(Key::from("x"))));
        assert_eq!(ctx.write(seq, "2", 3i64).unwrap(), Some(EventKind::New));
        assert_eq!(ctx.push(seq, 4i64).unwrap(), 3);
        assert_eq!(ctx.node_value(seq).unwrap(), json!([1, 2, 3, 4]));

        let rec = ctx.wrap_node(json!({})).unwrap();
        ctx.write(rec, 0usize, "zero").unwrap();
        assert_eq!(ctx.node_value(rec).unwrap(), json!({"0": "zero"}));
        assert_eq!(ctx.push(rec, 1i64), Err(ContextError::NotSequence));
    }

    #[test]
    fn writing_a_node_into_its_subtree_fails() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": {"b": {}}})).unwrap();
        let b = ctx.find_pointer(root, "/a/b").unwrap().unwrap().as_node().unwrap();
        assert_eq!(ctx.write(b, "loop", root), Err(ContextError::Cycle));
        assert_eq!(ctx.write(b, "self", b), Err(ContextError::Cycle));
    }

    #[test]
    fn removing_from_a_sequence_shifts_names_and_ledger() {
        let mut ctx = DataContext::new();
        let seq = ctx.wrap_node(json!([{"n": 0}, {"n": 1}, {"n": 2}])).unwrap();
        let second = ctx.child(seq, 1usize).unwrap();
        let third = ctx.child(seq, 2usize).unwrap();
        ctx.write(third, "n", 22i64).unwrap();
        ctx.set_key_metadata(seq, 2usize, vec!["tail".into()]).unwrap();

        let removed = ctx.remove(seq, 0usize).unwrap();
        assert!(matches!(removed, Some(Slot::Node(_))));
        assert_eq!(ctx.property_name(second), Some(Key::Index(0)));
        assert_eq!(ctx.property_name(third), Some(Key::Index(1)));
        assert_eq!(ctx.parent(third), Some(seq));
        assert!(ctx.is_dirty(seq).unwrap());
        assert_eq!(ctx.modified_keys(seq).unwrap(), vec![Key::Index(1)]);
        assert_eq!(ctx.key_metadata(seq, 1usize).unwrap(), &["tail".to_string()]);

        assert_eq!(ctx.remove(seq, 9usize).unwrap(), None);
        assert_eq!(ctx.remove(seq, "x").unwrap(), None);
    }

    #[test]
    fn removing_a_record_key_evicts_it_after_emission() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": 1, "b": 2})).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctx.on(
            root,
            "a",
            move |ctx, ev| {
                sink.borrow_mut()
                    .push((ev.kind, ctx.modified_keys(ev.target).unwrap()));
                true
            },
            true,
        )
        .unwrap();

        assert_eq!(ctx.remove(root, "a").unwrap(), Some(Slot::Scalar(json!(1))));
        assert_eq!(
            seen.borrow().as_slice(),
            &[(EventKind::Delete, vec![Key::from("a")])]
        );
        assert!(ctx.modified_keys(root).unwrap().is_empty());
        assert!(ctx.is_dirty(root).unwrap());
        assert_eq!(ctx.keys(root).unwrap(), vec![Key::from("b")]);
    }

    #[test]
    fn set_len_deletes_from_the_tail() {
        let mut ctx = DataContext::new();
        let seq = ctx.wrap_node(json!([0, 1, 2, 3, 4])).unwrap();
        let seen = record_kinds(&mut ctx, seq);

        assert_eq!(ctx.set_len(seq, 2).unwrap(), 3);
        assert_eq!(ctx.set_len(seq, 7).unwrap(), 0);
        assert_eq!(ctx.node_value(seq).unwrap(), json!([0, 1]));
        assert_eq!(
            seen.borrow().as_slice(),
            &[
                (EventKind::Delete, "/4".to_string()),
                (EventKind::Delete, "/3".to_string()),
                (EventKind::Delete, "/2".to_string()),
            ]
        );
    }
}
