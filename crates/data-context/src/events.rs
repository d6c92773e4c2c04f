use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::DataContext;
use crate::key::Key;
use crate::node::{NodeId, Slot};

/// Classification of a mutation, or the debounced aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The key did not exist before the write.
    New,
    /// The value at an existing key was replaced.
    Set,
    /// An existing node was moved here from another key or parent.
    Reposition,
    Delete,
    /// Debounced "something changed" notification; carries no path.
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Set => "set",
            EventKind::Reposition => "reposition",
            EventKind::Delete => "delete",
            EventKind::Change => Channel::CHANGE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Node whose slot was mutated.
    pub target: NodeId,
    /// Path of the mutated slot relative to the node currently receiving the
    /// event; grows at the front while the event bubbles.
    pub path: Vec<Key>,
    pub old_value: Option<Slot>,
    pub new_value: Option<Slot>,
}

impl Event {
    pub(crate) fn mutation(
        kind: EventKind,
        target: NodeId,
        key: Key,
        old_value: Option<Slot>,
        new_value: Option<Slot>,
    ) -> Self {
        Self {
            kind,
            target,
            path: vec![key],
            old_value,
            new_value,
        }
    }

    pub(crate) fn change(target: NodeId) -> Self {
        Self {
            kind: EventKind::Change,
            target,
            path: Vec::new(),
            old_value: None,
            new_value: None,
        }
    }
}

/// Listener channel of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Writes and deletes of one property. Stored in string form so that
    /// sequence indices and numeric names share a channel.
    Key(String),
    /// `-`: every structural event of the node and its descendants.
    Any,
    /// `-change`: debounced aggregate notification.
    Change,
}

impl Channel {
    pub const ANY: &'static str = "-";
    pub const CHANGE: &'static str = "-change";

    pub fn key(key: impl Into<Key>) -> Self {
        Channel::Key(key.into().to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            Channel::Key(name) => name,
            Channel::Any => Self::ANY,
            Channel::Change => Self::CHANGE,
        }
    }

    /// Channels bubble to the parent after local delivery.
    pub fn bubbles(&self) -> bool {
        !matches!(self, Channel::Key(_))
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        match name {
            Self::ANY => Channel::Any,
            Self::CHANGE => Channel::Change,
            other => Channel::Key(other.to_string()),
        }
    }
}

impl From<Key> for Channel {
    fn from(key: Key) -> Self {
        Channel::key(key)
    }
}

impl From<&Key> for Channel {
    fn from(key: &Key) -> Self {
        Channel::key(key)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An external resource whose lifetime bounds a listener.
pub trait LiveHandle {
    fn is_alive(&self) -> bool;
}

impl<T> LiveHandle for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Decides whether a listener is still subscribed, checked before each
/// delivery. Dead listeners are pruned without being invoked.
pub enum Liveness {
    Always,
    /// Delivered once, then removed.
    Once,
    Predicate(Box<dyn Fn() -> bool>),
    Handle(Rc<dyn LiveHandle>),
}

impl Liveness {
    pub fn predicate(f: impl Fn() -> bool + 'static) -> Self {
        Liveness::Predicate(Box::new(f))
    }

    pub fn handle(handle: Rc<dyn LiveHandle>) -> Self {
        Liveness::Handle(handle)
    }

    /// Alive for as long as `owner` has strong references.
    pub fn tied_to<T: 'static>(owner: &Rc<T>) -> Self {
        Liveness::Handle(Rc::new(Rc::downgrade(owner)))
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Liveness::Always | Liveness::Once => true,
            Liveness::Predicate(f) => f(),
            Liveness::Handle(handle) => handle.is_alive(),
        }
    }
}

impl From<bool> for Liveness {
    fn from(alive: bool) -> Self {
        if alive {
            Liveness::Always
        } else {
            Liveness::Once
        }
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Always => f.write_str("Always"),
            Liveness::Once => f.write_str("Once"),
            Liveness::Predicate(_) => f.write_str("Predicate(..)"),
            Liveness::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// Listener callback. Returning `false` unsubscribes it.
pub type Callback = Box<dyn FnMut(&mut DataContext, &Event) -> bool>;

pub(crate) struct Listener {
    pub callback: Callback,
    pub liveness: Liveness,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}
