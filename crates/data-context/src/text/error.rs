use std::fmt;

use thiserror::Error;

use crate::error::ContextError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    IncorrectObjectSeparator,
    IncorrectArraySeparator,
    InvalidObjectKey,
    InvalidArrayIndex,
    UnterminatedString,
    UnterminatedComment,
    InvalidNumber,
    UnexpectedEnd,
    UnexpectedCharacter,
    TrailingCharacters,
    /// The cursor failed to advance inside a container.
    IncorrectEntry,
    /// Overwrite-mode sequence element without an `index:` prefix while
    /// strict indices are on.
    MissingArrayIndex,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseErrorKind::IncorrectObjectSeparator => "Incorrect object separator.",
            ParseErrorKind::IncorrectArraySeparator => "Incorrect array separator.",
            ParseErrorKind::InvalidObjectKey => "Invalid object key.",
            ParseErrorKind::InvalidArrayIndex => "Invalid array index.",
            ParseErrorKind::UnterminatedString => "Unterminated string.",
            ParseErrorKind::UnterminatedComment => "Unterminated comment.",
            ParseErrorKind::InvalidNumber => "Invalid number.",
            ParseErrorKind::UnexpectedEnd => "Unexpected end of input.",
            ParseErrorKind::UnexpectedCharacter => "Unexpected character.",
            ParseErrorKind::TrailingCharacters => "Trailing characters.",
            ParseErrorKind::IncorrectEntry => "Incorrect entry.",
            ParseErrorKind::MissingArrayIndex => "Overwriting data -> array index must be.",
        })
    }
}

/// Fatal syntax error with the byte offset and a window of the input around
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[ ERROR ] {kind} In parsing position: {offset} '{found}' => {snippet}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
    /// Character at `offset`, empty at the end of input.
    pub found: String,
    /// Up to 10 bytes either side of `offset`, with CR and LF escaped.
    pub snippet: String,
}

const WINDOW: usize = 10;

impl ParseError {
    pub(crate) fn at(kind: ParseErrorKind, text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let found = text[floor_boundary(text, offset)..]
            .chars()
            .next()
            .map(String::from)
            .unwrap_or_default();
        let start = floor_boundary(text, offset.saturating_sub(WINDOW));
        let end = ceil_boundary(text, offset.saturating_add(WINDOW));
        let snippet = text[start..end].replace('\r', "\\r").replace('\n', "\\n");
        Self {
            kind,
            offset,
            found,
            snippet,
        }
    }
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, i: usize) -> usize {
    let mut i = i.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Failure of a parse that writes into a [`DataContext`](crate::DataContext).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Syntax(#[from] ParseError),
    #[error("tree update failed: {0}")]
    Context(#[from] ContextError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("tree read failed: {0}")]
    Context(#[from] ContextError),
}
