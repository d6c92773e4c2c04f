use std::fmt;

use crate::error::ContextError;

/// Position of a child inside an observed node.
///
/// Records are addressed by name, sequences by index. Events and text render
/// both as strings (`"3"` for index 3), so a numeric name and the matching
/// index address the same sequence slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    /// Index form of the key, parsing numeric names.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(name) => name.parse().ok(),
        }
    }

    /// Record form of the key.
    pub fn as_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Name(value.clone())
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Index(value)
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

/// Unescapes one JSON Pointer token component.
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes one JSON Pointer token component.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse an RFC 6901 pointer into keys.
///
/// Numeric tokens become [`Key::Index`]; lookups on records convert them back
/// to names, so `"/items/0"` and `"/map/0"` both resolve.
///
/// - `"" -> []`
/// - `"/a~1b/0" -> [Name("a/b"), Index(0)]`
pub fn parse_pointer(pointer: &str) -> Result<Vec<Key>, ContextError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(ContextError::InvalidPointer(pointer.to_string()));
    }
    Ok(pointer
        .split('/')
        .skip(1)
        .map(|token| match token.parse::<usize>() {
            Ok(i) if token == i.to_string() => Key::Index(i),
            _ => Key::Name(unescape_component(token)),
        })
        .collect())
}

/// Format keys into an RFC 6901 pointer.
pub fn format_pointer(path: &[Key]) -> String {
    let mut out = String::new();
    for key in path {
        out.push('/');
        out.push_str(&escape_component(&key.to_string()));
    }
    out
}
