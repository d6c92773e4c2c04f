//! Writer for the annotated JSON superset, full and diff mode.

use std::fmt;
use std::io;

use serde_json::{Number, Value};

use super::decoder::MARKER;
use super::error::EncodeError;
use crate::context::DataContext;
use crate::key::Key;
use crate::node::{NodeId, NodeKind, Slot};

const BOM: &str = "\u{feff}";
const MAX_INDENT: usize = 10;

/// Pretty-printing unit, repeated once per nesting level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indent {
    /// Clamped to `1..=10`.
    Spaces(usize),
    /// Cut to 10 characters.
    Text(String),
}

impl Indent {
    pub fn unit(&self) -> String {
        match self {
            Indent::Spaces(n) => " ".repeat((*n).clamp(1, MAX_INDENT)),
            Indent::Text(s) => s.chars().take(MAX_INDENT).collect(),
        }
    }
}

/// Keeps only matching record keys. Sequence elements are never filtered.
pub enum KeyFilter {
    Keys(Vec<String>),
    Predicate(Box<dyn Fn(&str) -> bool>),
}

impl KeyFilter {
    pub fn predicate(f: impl Fn(&str) -> bool + 'static) -> Self {
        KeyFilter::Predicate(Box::new(f))
    }

    pub fn accepts(&self, key: &str) -> bool {
        match self {
            KeyFilter::Keys(keys) => keys.iter().any(|k| k == key),
            KeyFilter::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFilter::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            KeyFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug, Default)]
pub struct StringifyOptions {
    pub key_filter: Option<KeyFilter>,
    pub indent: Option<Indent>,
    /// Write only what the change ledger reports.
    pub diff_only: bool,
    /// In diff mode, evict written keys from the ledger and clear dirty
    /// flags, so an immediate second diff is empty.
    pub apply_and_clear: bool,
    pub include_bom: bool,
}

impl StringifyOptions {
    pub fn pretty(spaces: usize) -> Self {
        Self {
            indent: Some(Indent::Spaces(spaces)),
            ..Self::default()
        }
    }

    /// Diff that flushes the ledger.
    pub fn changes() -> Self {
        Self {
            diff_only: true,
            apply_and_clear: true,
            ..Self::default()
        }
    }

    pub fn with_indent(mut self, indent: Indent) -> Self {
        self.indent = Some(indent);
        self
    }

    pub fn with_key_filter(mut self, filter: KeyFilter) -> Self {
        self.key_filter = Some(filter);
        self
    }
}

/// Destination of encoded text.
pub trait Sink {
    fn write_str(&mut self, s: &str) -> Result<(), EncodeError>;
}

impl Sink for String {
    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        self.push_str(s);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        (**self).write_str(s)
    }
}

/// Adapts any [`io::Write`] into a [`Sink`].
#[derive(Debug)]
pub struct IoSink<W: io::Write>(pub W);

impl<W: io::Write> IoSink<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: io::Write> Sink for IoSink<W> {
    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        self.0.write_all(s.as_bytes())?;
        Ok(())
    }
}

pub(crate) struct Encoder<'a, S: Sink> {
    ctx: &'a mut DataContext,
    options: &'a StringifyOptions,
    sink: S,
    unit: Option<String>,
    keep_metadata: bool,
    started: bool,
}

impl<'a, S: Sink> Encoder<'a, S> {
    pub fn new(ctx: &'a mut DataContext, options: &'a StringifyOptions, sink: S) -> Self {
        let keep_metadata = !ctx.config().ignore_metadata;
        Self {
            ctx,
            unit: options.indent.as_ref().map(Indent::unit),
            options,
            sink,
            keep_metadata,
            started: false,
        }
    }

    /// The BOM goes out with the first non-empty write, so an empty diff
    /// stays empty.
    fn write(&mut self, s: &str) -> Result<(), EncodeError> {
        if s.is_empty() {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            if self.options.include_bom {
                self.sink.write_str(BOM)?;
            }
        }
        self.sink.write_str(s)
    }

    fn newline(&mut self) -> Result<(), EncodeError> {
        if self.unit.is_some() {
            self.write("\n")?;
        }
        Ok(())
    }

    fn indent(&mut self, level: usize) -> Result<(), EncodeError> {
        if let Some(unit) = &self.unit {
            let pad = unit.repeat(level);
            self.write(&pad)?;
        }
        Ok(())
    }

    fn write_comments(&mut self, comments: &[String], level: usize) -> Result<(), EncodeError> {
        for comment in comments {
            self.indent(level)?;
            self.write(&format!("/*{comment}*/"))?;
            self.newline()?;
        }
        Ok(())
    }

    pub fn write_root(&mut self, slot: &Slot) -> Result<(), EncodeError> {
        match slot {
            Slot::Scalar(value) => self.write_scalar(value),
            Slot::Node(id) => {
                let diff = self.options.diff_only;
                if self.keep_metadata && (!diff || self.ctx.is_dirty(*id)?) {
                    let comments = self.ctx.metadata(*id)?.to_vec();
                    self.write_comments(&comments, 0)?;
                }
                self.write_node(*id, 0, false)
            }
        }
    }

    fn write_scalar(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::String(s) => self.write(&format!("\"{s}\"")),
            Value::Number(n) => self.write(&format_number(n)),
            Value::Bool(true) => self.write("true"),
            Value::Bool(false) => self.write("false"),
            // Containers never sit in a scalar slot.
            _ => self.write("null"),
        }
    }

    fn keys_to_write(&self, id: NodeId, full: bool) -> Result<Vec<Key>, EncodeError> {
        let data = self.ctx.data(id)?;
        let mut keys = if full {
            data.children.keys()
        } else {
            let mut keys: Vec<Key> = data
                .modified
                .iter()
                .filter(|key| data.children.get(key).is_some())
                .cloned()
                .collect();
            keys.sort();
            keys
        };
        if let (Some(filter), NodeKind::Record) = (&self.options.key_filter, data.children.kind()) {
            keys.retain(|key| filter.accepts(&key.as_name()));
        }
        Ok(keys)
    }

    fn write_node(&mut self, id: NodeId, level: usize, under_dirty: bool) -> Result<(), EncodeError> {
        let diff = self.options.diff_only;
        let clear = diff && self.options.apply_and_clear;
        let kind = self.ctx.kind(id)?;
        let dirty = self.ctx.is_dirty(id)?;
        let full = !diff || dirty || under_dirty;
        let keys = self.keys_to_write(id, full)?;
        let (open, close) = match kind {
            NodeKind::Record => ("{", "}"),
            NodeKind::Sequence => ("[", "]"),
        };
        let marker = diff && dirty;
        let is_root = level == 0;

        if keys.is_empty() {
            if !(diff && is_root && !dirty) {
                self.write(open)?;
                if marker {
                    self.write(MARKER)?;
                }
                self.write(close)?;
            }
            if clear {
                self.ctx.data_mut(id)?.is_dirty = false;
            }
            return Ok(());
        }

        self.write(open)?;
        if marker {
            self.write(MARKER)?;
        } else {
            self.newline()?;
        }

        let count = keys.len();
        for (n, key) in keys.into_iter().enumerate() {
            let Some(slot) = self.ctx.get(id, &key)? else {
                continue;
            };
            if self.keep_metadata {
                let comments = match &slot {
                    Slot::Node(child) if !diff || self.ctx.is_dirty(*child)? => {
                        self.ctx.metadata(*child)?.to_vec()
                    }
                    Slot::Scalar(_) if !diff || dirty => self.ctx.key_metadata(id, &key)?.to_vec(),
                    _ => Vec::new(),
                };
                self.write_comments(&comments, level + 1)?;
            }

            self.indent(level + 1)?;
            let pad = if self.unit.is_some() { " " } else { "" };
            match kind {
                NodeKind::Record => self.write(&format!("\"{key}\":{pad}"))?,
                NodeKind::Sequence if diff => self.write(&format!("{key}:{pad}"))?,
                NodeKind::Sequence => {}
            }

            match &slot {
                Slot::Scalar(value) => self.write_scalar(value)?,
                Slot::Node(child) => self.write_node(*child, level + 1, under_dirty || dirty)?,
            }
            if n + 1 < count {
                self.write(",")?;
                self.newline()?;
            }
            if clear {
                self.ctx.data_mut(id)?.evict_modified(&key);
            }
        }

        self.newline()?;
        self.indent(level)?;
        self.write(close)?;
        if clear {
            self.ctx.data_mut(id)?.is_dirty = false;
        }
        Ok(())
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Shortest round-trip form. Floats keep their fraction or exponent, so
/// `2.0` and `-0.0` read back as floats.
pub(crate) fn format_number(n: &Number) -> String {
    n.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indent_units_are_clamped() {
        assert_eq!(Indent::Spaces(0).unit(), " ");
        assert_eq!(Indent::Spaces(4).unit(), "    ");
        assert_eq!(Indent::Spaces(40).unit().len(), 10);
        assert_eq!(Indent::Text("\t".into()).unit(), "\t");
        assert_eq!(Indent::Text("-".repeat(12)).unit(), "-".repeat(10));
    }

    #[test]
    fn numbers_use_shortest_form() {
        let n = |v: serde_json::Value| format_number(v.as_number().unwrap());
        assert_eq!(n(json!(3)), "3");
        assert_eq!(n(json!(-7)), "-7");
        assert_eq!(n(json!(2.0)), "2.0");
        assert_eq!(n(json!(-0.0)), "-0.0");
        assert_eq!(n(json!(1e20)), "1e20");
        assert_eq!(n(json!(0.1)), "0.1");
        assert_eq!(n(json!(u64::MAX)), "18446744073709551615");
    }

    #[test]
    fn key_filter_variants() {
        let keys = KeyFilter::Keys(vec!["a".into()]);
        assert!(keys.accepts("a"));
        assert!(!keys.accepts("b"));
        let pred = KeyFilter::predicate(|k| k.starts_with('_'));
        assert!(pred.accepts("_x"));
        assert!(!pred.accepts("x"));
    }

    #[test]
    fn io_sink_writes_bytes() {
        let mut sink = IoSink(Vec::new());
        sink.write_str("{}").unwrap();
        assert_eq!(sink.into_inner(), b"{}".to_vec());
    }
}
