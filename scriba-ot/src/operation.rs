//! Text operations and their application to a document.
//!
//! An [`Operation`] is an immutable value object: a single insert or a
//! single delete, positioned by Unicode scalar value (codepoint) index.
//! The serde representation matches the wire shape used by the sync
//! protocol: `{"type":"insert","position":5,"value":" World"}` /
//! `{"type":"delete","position":5,"length":6}`.

use serde::{Deserialize, Serialize};

/// A single edit against one document revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Insert `value` before the codepoint at `position`.
    Insert { position: usize, value: String },
    /// Remove `length` codepoints starting at `position`.
    Delete { position: usize, length: usize },
}

impl Operation {
    /// Number of codepoints this operation adds (insert) or removes (delete).
    pub fn span(&self) -> usize {
        match self {
            Operation::Insert { value, .. } => value.chars().count(),
            Operation::Delete { length, .. } => *length,
        }
    }

    /// Codepoint position the operation acts at.
    pub fn position(&self) -> usize {
        match self {
            Operation::Insert { position, .. } => *position,
            Operation::Delete { position, .. } => *position,
        }
    }

    /// Whether the operation leaves any document unchanged.
    pub fn is_noop(&self) -> bool {
        self.span() == 0
    }
}

/// Errors produced by the transform engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The operation is structurally malformed (unparseable wire payload,
    /// missing fields). The engine never guesses a correction.
    Invalid(String),
    /// The operation addresses codepoints beyond the document's end.
    OutOfRange {
        position: usize,
        length: usize,
        doc_len: usize,
    },
}

impl std::fmt::Display for OtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(reason) => write!(f, "invalid operation: {reason}"),
            Self::OutOfRange {
                position,
                length,
                doc_len,
            } => write!(
                f,
                "operation out of range: position {position} + length {length} \
                 exceeds document length {doc_len}"
            ),
        }
    }
}

impl std::error::Error for OtError {}

/// Byte offset of the codepoint at `char_pos`, or the string's end when
/// `char_pos` equals the codepoint count.
fn byte_offset(s: &str, char_pos: usize) -> Option<usize> {
    if char_pos == 0 {
        return Some(0);
    }
    s.char_indices()
        .nth(char_pos)
        .map(|(byte, _)| byte)
        .or_else(|| (char_pos == s.chars().count()).then_some(s.len()))
}

/// Apply `op` to `document`, returning the new document text.
///
/// Pure: the input is never mutated and identical inputs always produce
/// identical outputs. Fails with [`OtError::OutOfRange`] if the operation
/// addresses positions past the document's end.
pub fn apply(document: &str, op: &Operation) -> Result<String, OtError> {
    match op {
        Operation::Insert { position, value } => {
            let at = byte_offset(document, *position).ok_or(OtError::OutOfRange {
                position: *position,
                length: 0,
                doc_len: document.chars().count(),
            })?;
            let mut out = String::with_capacity(document.len() + value.len());
            out.push_str(&document[..at]);
            out.push_str(value);
            out.push_str(&document[at..]);
            Ok(out)
        }
        Operation::Delete { position, length } => {
            let out_of_range = || OtError::OutOfRange {
                position: *position,
                length: *length,
                doc_len: document.chars().count(),
            };
            let start = byte_offset(document, *position).ok_or_else(out_of_range)?;
            let end = byte_offset(document, position + length).ok_or_else(out_of_range)?;
            let mut out = String::with_capacity(document.len() - (end - start));
            out.push_str(&document[..start]);
            out.push_str(&document[end..]);
            Ok(out)
        }
    }
}
