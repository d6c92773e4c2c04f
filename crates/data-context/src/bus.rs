//! Per-node listener registry and event delivery.

use std::panic::{self, AssertUnwindSafe};

use crate::context::DataContext;
use crate::error::ContextError;
use crate::events::{Channel, Event, Listener, Liveness};
use crate::node::NodeId;

impl DataContext {
    /// Subscribes `callback` to `channel` on `node`.
    ///
    /// The callback returns `false` to unsubscribe itself. `liveness` is
    /// checked before each delivery; `true`/`false` convert to
    /// [`Liveness::Always`]/[`Liveness::Once`].
    pub fn on<F>(
        &mut self,
        node: NodeId,
        channel: impl Into<Channel>,
        callback: F,
        liveness: impl Into<Liveness>,
    ) -> Result<(), ContextError>
    where
        F: FnMut(&mut DataContext, &Event) -> bool + 'static,
    {
        let data = self.data_mut(node)?;
        data.listeners
            .entry(channel.into())
            .or_default()
            .push(Listener {
                callback: Box::new(callback),
                liveness: liveness.into(),
            });
        Ok(())
    }

    pub fn once<F>(
        &mut self,
        node: NodeId,
        channel: impl Into<Channel>,
        callback: F,
    ) -> Result<(), ContextError>
    where
        F: FnMut(&mut DataContext, &Event) -> bool + 'static,
    {
        self.on(node, channel, callback, Liveness::Once)
    }

    /// Drops every listener of `channel`. Returns how many were removed.
    pub fn off(&mut self, node: NodeId, channel: impl Into<Channel>) -> Result<usize, ContextError> {
        let removed = self.data_mut(node)?.listeners.remove(&channel.into());
        Ok(removed.map_or(0, |l| l.len()))
    }

    pub fn listener_count(&self, node: NodeId, channel: impl Into<Channel>) -> usize {
        self.arena
            .get(node)
            .and_then(|data| data.listeners.get(&channel.into()))
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to the listeners of `channel` on `node` only.
    ///
    /// Dead listeners are pruned without being called; listeners added during
    /// the delivery are kept but not invoked by it. Returns whether at least
    /// one listener was invoked.
    ///
    /// A panicking listener unwinds out of `emit` after the channel's
    /// listener list has been restored, uncalled listeners included.
    pub fn emit(&mut self, node: NodeId, channel: &Channel, event: &Event) -> bool {
        let Some(data) = self.arena.get_mut(node) else {
            return false;
        };
        let Some(listeners) = data.listeners.remove(channel) else {
            return false;
        };
        let is_change = *channel == Channel::Change;
        if is_change {
            data.delivering_change = true;
        }

        let mut kept = Vec::with_capacity(listeners.len());
        let mut delivered = false;
        let mut panicked = None;
        let mut pending = listeners.into_iter();
        while let Some(mut listener) = pending.next() {
            if !listener.liveness.is_alive() {
                tracing::trace!(node = ?node, %channel, "pruned dead listener");
                continue;
            }
            delivered = true;
            let callback = &mut listener.callback;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(self, event))) {
                Ok(keep) => {
                    if keep && !matches!(listener.liveness, Liveness::Once) {
                        kept.push(listener);
                    }
                }
                Err(payload) => {
                    // The list goes back untouched from here on.
                    kept.push(listener);
                    kept.extend(pending.by_ref());
                    panicked = Some(payload);
                    break;
                }
            }
        }

        if let Some(data) = self.arena.get_mut(node) {
            if is_change {
                data.delivering_change = false;
            }
            if let Some(added) = data.listeners.remove(channel) {
                kept.extend(added);
            }
            if !kept.is_empty() {
                data.listeners.insert(channel.clone(), kept);
            }
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        delivered
    }

    /// Delivers locally, then bubbles along the valid parent chain.
    ///
    /// On `-` each ancestor receives the event with the child's property name
    /// prepended to `path`. On `-change` every node of the chain with
    /// listeners gets its own debounced delivery instead. Key channels do not
    /// bubble.
    pub fn emit_to_parent(&mut self, node: NodeId, channel: &Channel, event: &Event) -> bool {
        match channel {
            Channel::Key(_) => self.emit(node, channel, event),
            Channel::Change => {
                let mut scheduled = false;
                let mut current = Some(node);
                while let Some(id) = current {
                    scheduled |= self.schedule_change(id);
                    current = self.parent(id);
                }
                scheduled
            }
            Channel::Any => {
                let mut delivered = false;
                let mut event = event.clone();
                let mut current = node;
                loop {
                    delivered |= self.emit(current, channel, &event);
                    let Some(parent) = self.parent(current) else {
                        break;
                    };
                    if let Some(name) = self.property_name(current) {
                        event.path.insert(0, name);
                    }
                    current = parent;
                }
                delivered
            }
        }
    }
}
