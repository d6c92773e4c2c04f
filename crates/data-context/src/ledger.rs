//! Change ledger: per-node modified keys plus the dirty flag.

use crate::context::DataContext;
use crate::error::ContextError;
use crate::key::Key;
use crate::node::{NodeId, Slot};

impl DataContext {
    /// Records `key` on `node` and the node's own name on every valid
    /// ancestor.
    pub fn mark_modified(&mut self, node: NodeId, key: impl Into<Key>) -> Result<(), ContextError> {
        let key = self.normalize_key(node, key.into())?;
        self.data_mut(node)?.record_modified(key);

        let mut current = node;
        while let Some(parent) = self.parent(current) {
            let Some(name) = self.property_name(current) else {
                break;
            };
            if let Some(data) = self.arena.get_mut(parent) {
                data.record_modified(name);
            }
            current = parent;
        }
        Ok(())
    }

    /// Clears the ledger of `node` and of every modified descendant.
    pub fn reset_changes(&mut self, node: NodeId) -> Result<(), ContextError> {
        self.data(node)?;
        // Post-order: children listed in a ledger are cleared before their
        // parent forgets them.
        let mut stack = vec![(node, false)];
        while let Some((id, expanded)) = stack.pop() {
            let Some(data) = self.arena.get(id) else {
                continue;
            };
            if expanded {
                if let Some(data) = self.arena.get_mut(id) {
                    data.is_dirty = false;
                    data.modified.clear();
                }
                continue;
            }
            stack.push((id, true));
            for key in &data.modified {
                if let Some(Slot::Node(child)) = data.children.get(key) {
                    stack.push((*child, false));
                }
            }
        }
        Ok(())
    }

    pub fn is_changed(&self, node: NodeId) -> Result<bool, ContextError> {
        let data = self.data(node)?;
        Ok(data.is_dirty || !data.modified.is_empty())
    }

    pub fn is_dirty(&self, node: NodeId) -> Result<bool, ContextError> {
        Ok(self.data(node)?.is_dirty)
    }

    /// Snapshot of the node's ledger in recording order.
    pub fn modified_keys(&self, node: NodeId) -> Result<Vec<Key>, ContextError> {
        Ok(self.data(node)?.modified.clone())
    }
}
