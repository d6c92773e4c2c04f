//! Textual format: JSON plus block-comment metadata, `index:` prefixes on
//! sequence elements, and the `\r\r` incremental marker that makes a
//! container's membership authoritative.
//!
//! | Entry point | Direction |
//! |-------------|-----------|
//! | [`parse`] | text to fresh nodes (registered as a root) |
//! | [`parse_into`] | text merged into an existing node |
//! | [`parse_document_into`] | a whole file merged into an existing node |
//! | [`parse_value`] | text to a plain [`Value`] |
//! | [`stringify`] / [`stringify_to`] | nodes to text, full or diff |

mod apply;
mod decoder;
mod encoder;
mod error;

pub use encoder::{Indent, IoSink, KeyFilter, Sink, StringifyOptions};
pub use error::{DecodeError, EncodeError, ParseError, ParseErrorKind};

use serde_json::Value;

use crate::context::DataContext;
use crate::key::Key;
use crate::node::{NodeId, Slot};
use apply::Applier;
use decoder::{Decoder, Document};
use encoder::Encoder;

/// Parses `text` into new nodes. Incremental markers and index prefixes are
/// accepted; scalars come back as [`Slot::Scalar`].
pub fn parse(ctx: &mut DataContext, text: &str) -> Result<Slot, DecodeError> {
    let doc = Decoder::new(text, false, false).decode()?;
    let Some(kind) = doc.value.kind() else {
        return Ok(Slot::Scalar(doc.value.into_value()));
    };
    let mut applier = Applier::new(ctx);
    let node = applier.detached(kind, doc.value)?;
    applier.set_root_metadata(node, doc.meta)?;
    ctx.add_root(node)?;
    ctx.reset_changes(node)?;
    Ok(Slot::Node(node))
}

/// Merges `text` into `target` through the interceptor.
///
/// Nodes whose shape matches the input are reused, so handles and listeners
/// survive. If the root shape differs, a new node takes the target's place
/// (in its parent, or as a root) and is returned.
pub fn parse_into(ctx: &mut DataContext, text: &str, target: NodeId) -> Result<Slot, DecodeError> {
    let strict = ctx.config().strict_indices;
    let doc = Decoder::new(text, true, strict).decode()?;
    overwrite(ctx, doc, target, None)
}

/// Merges a complete document, such as a file read back from disk, into
/// `target`.
///
/// Unlike [`parse_into`], sequence elements without an index prefix are
/// positional without a warning, comments in `text` replace the tree's
/// comments (a missing comment clears them), and with `remove_unused_keys`
/// every container's membership is authoritative, as if it carried the
/// incremental marker.
pub fn parse_document_into(
    ctx: &mut DataContext,
    text: &str,
    target: NodeId,
    remove_unused_keys: bool,
) -> Result<Slot, DecodeError> {
    let doc = Decoder::new(text, false, false).decode()?;
    overwrite(ctx, doc, target, Some(remove_unused_keys))
}

fn overwrite(
    ctx: &mut DataContext,
    doc: Document,
    target: NodeId,
    whole_document: Option<bool>,
) -> Result<Slot, DecodeError> {
    let target_kind = ctx.kind(target)?;
    let place = (ctx.parent(target), ctx.property_name(target));
    let root_key = place.1.clone().unwrap_or_else(|| Key::Name(String::new()));

    let mut applier = Applier::new(ctx);
    if let Some(remove_unused_keys) = whole_document {
        applier = applier.whole_document(remove_unused_keys);
    }
    let Some(kind) = doc.value.kind() else {
        applier.report_mismatch(&root_key);
        let value = doc.value.into_value();
        if let (Some(parent), Some(name)) = place {
            ctx.write(parent, name, value.clone())?;
        }
        return Ok(Slot::Scalar(value));
    };

    if kind == target_kind {
        applier.merge(target, doc.value)?;
        applier.set_root_metadata(target, doc.meta)?;
        return Ok(Slot::Node(target));
    }

    applier.report_mismatch(&root_key);
    let fresh = applier.detached(kind, doc.value)?;
    applier.set_root_metadata(fresh, doc.meta)?;
    match place {
        (Some(parent), Some(name)) => {
            ctx.write(parent, name, fresh)?;
        }
        _ => {
            ctx.data_mut(fresh)?.is_dirty = true;
            ctx.add_root(fresh)?;
            ctx.release_root(target);
        }
    }
    Ok(Slot::Node(fresh))
}

/// Parses `text` into a plain value without touching any arena. Comments
/// are discarded.
pub fn parse_value(text: &str) -> Result<Value, ParseError> {
    Ok(Decoder::new(text, false, false).decode()?.value.into_value())
}

/// Serializes `slot` into a string. See [`StringifyOptions`] for full vs
/// diff output.
pub fn stringify(
    ctx: &mut DataContext,
    slot: &Slot,
    options: &StringifyOptions,
) -> Result<String, EncodeError> {
    let mut out = String::new();
    stringify_to(ctx, slot, options, &mut out)?;
    Ok(out)
}

/// Streams the serialization of `slot` into `sink`.
pub fn stringify_to<S: Sink>(
    ctx: &mut DataContext,
    slot: &Slot,
    options: &StringifyOptions,
    sink: S,
) -> Result<S, EncodeError> {
    let mut encoder = Encoder::new(ctx, options, sink);
    encoder.write_root(slot)?;
    Ok(encoder.into_sink())
}
