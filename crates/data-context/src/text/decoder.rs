//! Recursive-descent reader for the annotated JSON superset.
//!
//! The decoder produces a [`Parsed`] tree first; nothing is written into a
//! [`DataContext`](crate::DataContext) until the whole input is accepted, so
//! a syntax error never leaves a half-applied update behind.

use serde_json::{Map, Number, Value};

use super::error::{ParseError, ParseErrorKind};

const BOM: &str = "\u{feff}";

/// Incremental marker written right after `{` or `[`.
pub(crate) const MARKER: &str = "\r\r";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry<K> {
    pub key: K,
    /// Block comments found before the key and before the value.
    pub meta: Vec<String>,
    pub value: Parsed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Parsed {
    Scalar(Value),
    Record {
        marker: bool,
        entries: Vec<Entry<String>>,
    },
    Sequence {
        marker: bool,
        entries: Vec<Entry<Option<usize>>>,
    },
}

impl Parsed {
    /// Plain value, applying sequence indices the way overwrite mode does on
    /// an empty target.
    pub fn into_value(self) -> Value {
        match self {
            Parsed::Scalar(v) => v,
            Parsed::Record { entries, .. } => {
                let mut map = Map::with_capacity(entries.len());
                for entry in entries {
                    map.insert(entry.key, entry.value.into_value());
                }
                Value::Object(map)
            }
            Parsed::Sequence { entries, .. } => {
                let mut items: Vec<Value> = Vec::with_capacity(entries.len());
                for (position, entry) in entries.into_iter().enumerate() {
                    let index = entry.key.unwrap_or(position);
                    let value = entry.value.into_value();
                    match items.get_mut(index) {
                        Some(slot) => *slot = value,
                        None => items.push(value),
                    }
                }
                Value::Array(items)
            }
        }
    }
}

/// Root of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Document {
    pub meta: Vec<String>,
    pub value: Parsed,
}

pub(crate) struct Decoder<'a> {
    text: &'a str,
    data: &'a [u8],
    x: usize,
    /// Overwrite mode: unprefixed sequence elements are reported.
    overwrite: bool,
    strict_indices: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(text: &'a str, overwrite: bool, strict_indices: bool) -> Self {
        let text = text.strip_prefix(BOM).unwrap_or(text);
        Self {
            text,
            data: text.as_bytes(),
            x: 0,
            overwrite,
            strict_indices,
        }
    }

    pub fn decode(mut self) -> Result<Document, ParseError> {
        let meta = self.read_whitespace()?;
        let value = self.read_any()?;
        self.read_whitespace()?;
        if self.x < self.data.len() {
            return Err(self.error(ParseErrorKind::TrailingCharacters));
        }
        Ok(Document { meta, value })
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::at(kind, self.text, self.x)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.x).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.data[self.x..].starts_with(s.as_bytes())
    }

    /// Skips whitespace and comments, returning the non-blank block comments.
    fn read_whitespace(&mut self) -> Result<Vec<String>, ParseError> {
        let mut meta = Vec::new();
        loop {
            while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
                self.x += 1;
            }
            if self.starts_with("/*") {
                let body = self.x + 2;
                let Some(len) = self.text[body..].find("*/") else {
                    return Err(self.error(ParseErrorKind::UnterminatedComment));
                };
                let comment = &self.text[body..body + len];
                if !comment.trim().is_empty() {
                    meta.push(comment.to_string());
                }
                self.x = body + len + 2;
            } else if self.starts_with("//") {
                while !matches!(self.peek(), None | Some(b'\r' | b'\n')) {
                    self.x += 1;
                }
            } else {
                return Ok(meta);
            }
        }
    }

    fn read_any(&mut self) -> Result<Parsed, ParseError> {
        match self.peek() {
            None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
            Some(b'{') => self.read_obj(),
            Some(b'[') => self.read_arr(),
            Some(b'"') => Ok(Parsed::Scalar(Value::String(self.read_str()?))),
            Some(b't') => self.read_literal("true", Value::Bool(true)),
            Some(b'f') => self.read_literal("false", Value::Bool(false)),
            Some(b'n') => self.read_literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => Ok(Parsed::Scalar(Value::Number(self.read_num()?))),
            Some(_) => Err(self.error(ParseErrorKind::UnexpectedCharacter)),
        }
    }

    fn read_literal(&mut self, word: &str, value: Value) -> Result<Parsed, ParseError> {
        if !self.starts_with(word) {
            return Err(self.error(ParseErrorKind::UnexpectedCharacter));
        }
        self.x += word.len();
        Ok(Parsed::Scalar(value))
    }

    /// Strings are taken verbatim up to the next quote; there are no escapes.
    fn read_str(&mut self) -> Result<String, ParseError> {
        let start = self.x + 1;
        let Some(len) = self.text[start..].find('"') else {
            return Err(self.error(ParseErrorKind::UnterminatedString));
        };
        self.x = start + len + 1;
        Ok(self.text[start..start + len].to_string())
    }

    fn read_digits(&mut self) -> usize {
        let from = self.x;
        while let Some(b'0'..=b'9') = self.peek() {
            self.x += 1;
        }
        self.x - from
    }

    fn read_num(&mut self) -> Result<Number, ParseError> {
        let start = self.x;
        if self.peek() == Some(b'-') {
            self.x += 1;
        }
        // A leading zero is the whole integer part.
        if self.peek() == Some(b'0') {
            self.x += 1;
        } else if self.read_digits() == 0 {
            return Err(self.error(ParseErrorKind::InvalidNumber));
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.x += 1;
            if self.read_digits() == 0 {
                return Err(self.error(ParseErrorKind::InvalidNumber));
            }
        }
        if let Some(b'e' | b'E') = self.peek() {
            is_float = true;
            self.x += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.x += 1;
            }
            if self.read_digits() == 0 {
                return Err(self.error(ParseErrorKind::InvalidNumber));
            }
        }

        let s = &self.text[start..self.x];
        let invalid = || ParseError::at(ParseErrorKind::InvalidNumber, self.text, start);
        if !is_float {
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Number::from(i));
            }
            if let Ok(u) = s.parse::<u64>() {
                return Ok(Number::from(u));
            }
        }
        let f: f64 = s.parse().map_err(|_| invalid())?;
        Number::from_f64(f).ok_or_else(invalid)
    }

    fn read_marker(&mut self) -> bool {
        if self.starts_with(MARKER) {
            self.x += MARKER.len();
            return true;
        }
        false
    }

    fn read_obj(&mut self) -> Result<Parsed, ParseError> {
        self.x += 1;
        let marker = self.read_marker();
        let mut entries = Vec::new();
        loop {
            let before = self.x;
            let mut meta = self.read_whitespace()?;
            match self.peek() {
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(b'}') => {
                    self.x += 1;
                    return Ok(Parsed::Record { marker, entries });
                }
                Some(b'"') => {}
                Some(_) => return Err(self.error(ParseErrorKind::InvalidObjectKey)),
            }
            let key = self.read_str()?;
            meta.extend(self.read_whitespace()?);
            if self.peek() != Some(b':') {
                return Err(self.error(ParseErrorKind::InvalidObjectKey));
            }
            self.x += 1;
            meta.extend(self.read_whitespace()?);
            let value = self.read_any()?;
            self.read_whitespace()?;
            match self.peek() {
                Some(b',') => self.x += 1,
                Some(b'}') => {}
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(_) => return Err(self.error(ParseErrorKind::IncorrectObjectSeparator)),
            }
            if self.x == before {
                return Err(self.error(ParseErrorKind::IncorrectEntry));
            }
            entries.push(Entry { key, meta, value });
        }
    }

    fn read_arr(&mut self) -> Result<Parsed, ParseError> {
        self.x += 1;
        let marker = self.read_marker();
        let mut entries = Vec::new();
        let mut warned = false;
        loop {
            let before = self.x;
            let mut meta = self.read_whitespace()?;
            match self.peek() {
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(b']') => {
                    self.x += 1;
                    return Ok(Parsed::Sequence { marker, entries });
                }
                Some(_) => {}
            }
            let key = self.read_index()?;
            if key.is_none() && self.overwrite {
                if self.strict_indices {
                    return Err(self.error(ParseErrorKind::MissingArrayIndex));
                }
                if !warned {
                    tracing::warn!(
                        offset = self.x,
                        "overwriting sequence element without index prefix; using its position"
                    );
                    warned = true;
                }
            }
            meta.extend(self.read_whitespace()?);
            let value = self.read_any()?;
            self.read_whitespace()?;
            match self.peek() {
                Some(b',') => self.x += 1,
                Some(b']') => {}
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(_) => return Err(self.error(ParseErrorKind::IncorrectArraySeparator)),
            }
            if self.x == before {
                return Err(self.error(ParseErrorKind::IncorrectEntry));
            }
            entries.push(Entry { key, meta, value });
        }
    }

    /// Reads an optional `<integer>:` prefix, rewinding when the number turns
    /// out to be the element itself.
    fn read_index(&mut self) -> Result<Option<usize>, ParseError> {
        if self.peek() == Some(b':') {
            return Err(self.error(ParseErrorKind::InvalidArrayIndex));
        }
        if !matches!(self.peek(), Some(b'-' | b'0'..=b'9')) {
            return Ok(None);
        }
        let start = self.x;
        let number = self.read_num()?;
        let after = self.x;
        self.read_whitespace()?;
        if self.peek() != Some(b':') {
            self.x = start;
            return Ok(None);
        }
        let Some(index) = number.as_u64().and_then(|n| usize::try_from(n).ok()) else {
            self.x = after;
            return Err(self.error(ParseErrorKind::InvalidArrayIndex));
        };
        self.x += 1;
        Ok(Some(index))
    }
}
