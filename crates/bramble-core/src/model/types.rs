//! Identifier types for annotation: revisions, origin keys, and lines.
//!
//! Revision ids are opaque, totally ordered tokens. Ordering matters: the
//! default annotation tie-break picks the smallest competing origin, so
//! `Ord` on [`TextKey`] is part of the determinism contract.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved revision id for uncommitted working-tree content.
pub const CURRENT_REVISION: &str = "current:";

/// Reserved revision id for the empty ancestor of every root revision.
pub const NULL_REVISION: &str = "null:";

// ---------------------------------------------------------------------------
// RevisionId
// ---------------------------------------------------------------------------

/// An opaque revision identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Wrap a revision id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The working-tree sentinel ([`CURRENT_REVISION`]).
    #[must_use]
    pub fn current() -> Self {
        Self(CURRENT_REVISION.to_owned())
    }

    /// The root sentinel ([`NULL_REVISION`]).
    #[must_use]
    pub fn null() -> Self {
        Self(NULL_REVISION.to_owned())
    }

    /// Whether this is the working-tree sentinel.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.0 == CURRENT_REVISION
    }

    /// Whether this is the root sentinel.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == NULL_REVISION
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({})", self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ---------------------------------------------------------------------------
// TextKey
// ---------------------------------------------------------------------------

/// Origin key: the `(file, revision)` pair that owns a line.
///
/// Ordered by file first, then revision.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextKey {
    /// Path or file identifier the text belongs to.
    pub file: String,
    /// Revision that produced this version of the text.
    pub revision: RevisionId,
}

impl TextKey {
    #[must_use]
    pub fn new(file: impl Into<String>, revision: impl Into<RevisionId>) -> Self {
        Self {
            file: file.into(),
            revision: revision.into(),
        }
    }

    /// Whether this key points at the root sentinel revision.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.revision.is_null()
    }
}

impl fmt::Debug for TextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextKey({}@{})", self.file, self.revision)
    }
}

impl fmt::Display for TextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file, self.revision)
    }
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

/// One line of text, line terminator included. Compared byte-exactly.
pub type Line = Vec<u8>;

/// Split bytes into lines, keeping each `\n` with its line.
///
/// A trailing fragment without a newline becomes the last line.
#[must_use]
pub fn split_lines(bytes: &[u8]) -> Vec<Line> {
    bytes
        .split_inclusive(|&b| b == b'\n')
        .map(<[u8]>::to_vec)
        .collect()
}

/// Concatenate lines back into a byte buffer.
#[must_use]
pub fn join_lines(lines: &[Line]) -> Vec<u8> {
    lines.concat()
}
