//! Writes a decoded document into the arena.
//!
//! Overwrite mode reuses existing nodes wherever the shape matches and goes
//! through the interceptor, so identity, listeners and the ledger all see the
//! update. Construct mode is the same walk on a fresh, listener-free node.

use std::collections::BTreeSet;

use indexmap::IndexSet;

use super::decoder::{Entry, Parsed};
use crate::config::MismatchPolicy;
use crate::context::DataContext;
use crate::error::ContextError;
use crate::key::Key;
use crate::node::{NodeId, NodeKind, Slot};

impl Parsed {
    pub(crate) fn kind(&self) -> Option<NodeKind> {
        match self {
            Parsed::Scalar(_) => None,
            Parsed::Record { .. } => Some(NodeKind::Record),
            Parsed::Sequence { .. } => Some(NodeKind::Sequence),
        }
    }
}

pub(crate) struct Applier<'c> {
    ctx: &'c mut DataContext,
    keep_metadata: bool,
    mismatch_policy: MismatchPolicy,
    /// Every container acts as if it carried the incremental marker.
    all_marked: bool,
    /// Input comments replace existing ones; a missing comment clears them.
    replace_metadata: bool,
}

impl<'c> Applier<'c> {
    pub fn new(ctx: &'c mut DataContext) -> Self {
        let keep_metadata = !ctx.config().ignore_metadata;
        let mismatch_policy = ctx.config().mismatch_policy;
        Self {
            ctx,
            keep_metadata,
            mismatch_policy,
            all_marked: false,
            replace_metadata: false,
        }
    }

    /// Applies a complete document: comments are authoritative, and so is
    /// membership when `remove_unused_keys` is set.
    pub fn whole_document(mut self, remove_unused_keys: bool) -> Self {
        self.all_marked = remove_unused_keys;
        self.replace_metadata = true;
        self
    }

    fn takes_metadata(&self, meta: &[String]) -> bool {
        self.keep_metadata && (self.replace_metadata || !meta.is_empty())
    }

    /// Merges a container into `node`, which must have the same kind.
    pub fn merge(&mut self, node: NodeId, parsed: Parsed) -> Result<(), ContextError> {
        match parsed {
            Parsed::Scalar(_) => Err(ContextError::NotContainer),
            Parsed::Record { marker, entries } => {
                let mut seen = IndexSet::with_capacity(entries.len());
                for Entry { key, meta, value } in entries {
                    seen.insert(key.clone());
                    self.merge_entry(node, Key::Name(key), meta, value)?;
                }
                if marker || self.all_marked {
                    for key in self.ctx.keys(node)? {
                        if !seen.contains(&key.as_name()) {
                            self.ctx.remove(node, key)?;
                        }
                    }
                }
                Ok(())
            }
            Parsed::Sequence { marker, entries } => {
                let mut seen = BTreeSet::new();
                for (position, Entry { key, meta, value }) in entries.into_iter().enumerate() {
                    let len = self.ctx.len(node)?;
                    let index = key.unwrap_or(position);
                    let index = if index < len { index } else { len };
                    seen.insert(index);
                    self.merge_entry(node, Key::Index(index), meta, value)?;
                }
                if marker || self.all_marked {
                    let len = self.ctx.len(node)?;
                    for index in (0..len).rev() {
                        if !seen.contains(&index) {
                            self.ctx.remove(node, index)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn merge_entry(
        &mut self,
        node: NodeId,
        key: Key,
        meta: Vec<String>,
        value: Parsed,
    ) -> Result<(), ContextError> {
        let Some(kind) = value.kind() else {
            let Parsed::Scalar(scalar) = value else {
                return Err(ContextError::NotContainer);
            };
            if let Some(Slot::Node(_)) = self.ctx.get(node, &key)? {
                self.report_mismatch(&key);
            }
            self.ctx.write(node, key.clone(), scalar)?;
            if self.takes_metadata(&meta) {
                self.ctx.set_key_metadata(node, key, meta)?;
            }
            return Ok(());
        };

        let child = match self.ctx.get(node, &key)? {
            Some(Slot::Node(child)) if self.ctx.kind(child)? == kind => {
                self.merge(child, value)?;
                child
            }
            existing => {
                if existing.is_some() {
                    self.report_mismatch(&key);
                }
                let fresh = self.detached(kind, value)?;
                self.ctx.write(node, key, fresh)?;
                fresh
            }
        };
        if self.takes_metadata(&meta) {
            self.ctx.set_metadata(child, meta)?;
        }
        Ok(())
    }

    /// Builds a parsed container into a new node that is not yet attached.
    pub fn detached(&mut self, kind: NodeKind, value: Parsed) -> Result<NodeId, ContextError> {
        let node = self.ctx.alloc(kind);
        self.merge(node, value)?;
        Ok(node)
    }

    pub fn report_mismatch(&self, key: &Key) {
        if self.mismatch_policy == MismatchPolicy::Warn {
            tracing::warn!(key = %key, "parsed value has a different shape; replacing");
        }
    }

    pub fn set_root_metadata(&mut self, node: NodeId, meta: Vec<String>) -> Result<(), ContextError> {
        if self.takes_metadata(&meta) {
            self.ctx.set_metadata(node, meta)?;
        }
        Ok(())
    }
}
