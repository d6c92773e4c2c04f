use thiserror::Error;

use crate::key::Key;

/// Errors returned by tree operations on a [`DataContext`](crate::DataContext).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("node handle is stale")]
    StaleNode,
    #[error("value is not a record or sequence")]
    NotContainer,
    #[error("node is not a sequence")]
    NotSequence,
    #[error("key `{0}` cannot address a sequence")]
    KeyMismatch(Key),
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("path not found")]
    NotFound,
    #[error("json pointer must be absolute or empty: `{0}`")]
    InvalidPointer(String),
    #[error("node cannot be placed inside its own subtree")]
    Cycle,
}
