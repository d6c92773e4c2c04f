//! Observed JSON trees.
//!
//! A [`DataContext`] wraps plain `serde_json` records and arrays into
//! observed nodes. Every write through the context is classified
//! (`new`, `set`, `reposition`, `delete`), recorded in a per-node change
//! ledger, and delivered to listeners that bubble up the parent chain.
//! The [`text`] module reads and writes a JSON superset that keeps block
//! comments as metadata and can emit only what changed since the last
//! flush.
//!
//! Nodes live in an arena and are addressed by generational [`NodeId`]
//! handles instead of references, so parent links never own anything and a
//! reclaimed node shows up as [`ContextError::StaleNode`].
//!
//! # Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`context`] | [`DataContext`]: arena, wrapping, lookups, roots, garbage collection |
//! | [`events`] | [`Event`], [`Channel`], [`Liveness`] |
//! | [`node`] | [`NodeId`], [`Slot`], [`Input`], [`NodeKind`] |
//! | [`key`] | [`Key`] and JSON Pointer helpers |
//! | [`scheduler`] | Cancellable debounced `-change` deliveries |
//! | [`text`] | Parser and serializer |
//! | [`config`] | [`Config`] |
//!
//! Listener registration, the interceptor (`write` / `remove` / `set_len`),
//! the ledger and [`DataContext::sync`] are methods on [`DataContext`].

mod arena;
mod bus;
mod ledger;
mod ops;
mod sync;

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod key;
pub mod node;
pub mod scheduler;
pub mod text;

pub use config::{Config, MismatchPolicy};
pub use context::DataContext;
pub use error::ContextError;
pub use events::{Callback, Channel, Event, EventKind, LiveHandle, Liveness};
pub use key::{format_pointer, parse_pointer, Key};
pub use node::{Input, NodeId, NodeKind, Slot};
pub use text::{
    parse, parse_document_into, parse_into, parse_value, stringify, stringify_to, DecodeError,
    EncodeError, Indent, IoSink, KeyFilter, ParseError, ParseErrorKind, Sink, StringifyOptions,
};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
