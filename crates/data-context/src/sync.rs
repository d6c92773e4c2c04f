//! Deep merge of plain values into observed trees.

use serde_json::Value;

use crate::context::DataContext;
use crate::error::ContextError;
use crate::key::Key;
use crate::node::{NodeId, NodeKind, Slot};

impl DataContext {
    /// Merges `source` into `target` through the interceptor, so listeners
    /// and the ledger see only the entries that actually differ.
    ///
    /// When the shapes disagree the target is replaced in its parent (or by a
    /// new root) and the replacement is returned. With `remove_unused_keys`,
    /// record keys missing from `source` are removed and sequences are
    /// truncated to its length.
    pub fn sync(
        &mut self,
        target: NodeId,
        source: &Value,
        remove_unused_keys: bool,
    ) -> Result<NodeId, ContextError> {
        let Some(source_kind) = NodeKind::of(source) else {
            return Err(ContextError::NotContainer);
        };
        if self.kind(target)? != source_kind {
            return self.replace_node(target, source.clone());
        }

        match source {
            Value::Object(map) => {
                for (name, value) in map {
                    self.sync_entry(target, Key::Name(name.clone()), value, remove_unused_keys)?;
                }
                if remove_unused_keys {
                    let unused: Vec<Key> = self
                        .keys(target)?
                        .into_iter()
                        .filter(|key| !map.contains_key(&key.as_name()))
                        .collect();
                    for key in unused {
                        self.remove(target, key)?;
                    }
                }
            }
            Value::Array(items) => {
                for (index, value) in items.iter().enumerate() {
                    self.sync_entry(target, Key::Index(index), value, remove_unused_keys)?;
                }
                if remove_unused_keys {
                    self.set_len(target, items.len())?;
                }
            }
            _ => {}
        }
        Ok(target)
    }

    fn sync_entry(
        &mut self,
        node: NodeId,
        key: Key,
        value: &Value,
        remove_unused_keys: bool,
    ) -> Result<(), ContextError> {
        if let (Some(kind), Some(Slot::Node(child))) = (NodeKind::of(value), self.get(node, &key)?) {
            if self.kind(child)? == kind {
                self.sync(child, value, remove_unused_keys)?;
                return Ok(());
            }
        }
        self.write(node, key, value)?;
        Ok(())
    }

    /// Puts a fresh node built from `value` where `target` sits.
    pub(crate) fn replace_node(&mut self, target: NodeId, value: Value) -> Result<NodeId, ContextError> {
        match (self.parent(target), self.property_name(target)) {
            (Some(parent), Some(name)) => {
                self.write(parent, name.clone(), value)?;
                self.child(parent, name).ok_or(ContextError::NotContainer)
            }
            _ => {
                let replacement = self.wrap_node(value)?;
                self.data_mut(replacement)?.is_dirty = true;
                self.release_root(target);
                Ok(replacement)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use crate::key::Key;
    use crate::DataContext;

    #[test]
    fn sync_touches_only_changed_entries() {
        let mut ctx = DataContext::new();
        let root = ctx
            .wrap_node(json!({"title": "a", "doc": {"n": 1, "tags": ["x"]}, "old": true}))
            .unwrap();
        let doc = ctx.child(root, "doc").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctx.on(
            root,
            "-",
            move |_, ev| {
                sink.borrow_mut().push(crate::key::format_pointer(&ev.path));
                true
            },
            true,
        )
        .unwrap();

        let out = ctx
            .sync(root, &json!({"title": "a", "doc": {"n": 2, "tags": ["x", "y"]}}), true)
            .unwrap();

        assert_eq!(out, root);
        assert_eq!(ctx.child(root, "doc"), Some(doc));
        assert_eq!(
            ctx.node_value(root).unwrap(),
            json!({"title": "a", "doc": {"n": 2, "tags": ["x", "y"]}})
        );
        assert_eq!(
            seen.borrow().as_slice(),
            &["/doc/n".to_string(), "/doc/tags/1".to_string(), "/old".to_string()]
        );
    }

    #[test]
    fn sync_keeps_unused_keys_unless_asked() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"a": 1, "list": [1, 2, 3]})).unwrap();
        ctx.sync(root, &json!({"list": [9]}), false).unwrap();
        assert_eq!(ctx.node_value(root).unwrap(), json!({"a": 1, "list": [9, 2, 3]}));
        ctx.sync(root, &json!({"list": [9]}), true).unwrap();
        assert_eq!(ctx.node_value(root).unwrap(), json!({"list": [9]}));
    }

    #[test]
    fn shape_mismatch_replaces_the_target() {
        let mut ctx = DataContext::new();
        let root = ctx.wrap_node(json!({"inner": {"a": 1}})).unwrap();
        let inner = ctx.child(root, "inner").unwrap();

        let replaced = ctx.sync(inner, &json!([1, 2]), true).unwrap();
        assert_ne!(replaced, inner);
        assert_eq!(ctx.child(root, "inner"), Some(replaced));
        assert_eq!(ctx.property_name(replaced), Some(Key::from("inner")));
        assert_eq!(ctx.parent(inner), None);

        let new_root = ctx.sync(root, &json!(["top"]), true).unwrap();
        assert_ne!(new_root, root);
        assert_eq!(ctx.node_value(new_root).unwrap(), json!(["top"]));
        assert!(ctx.is_dirty(new_root).unwrap());
        assert_eq!(ctx.roots().collect::<Vec<_>>(), vec![new_root]);
    }
}
