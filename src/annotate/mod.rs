//! Line annotation ("blame") across a merge DAG.
//!
//! - [`merge`]: per-revision annotation merging against 0..N parents.
//! - [`tiebreak`]: strategies for attribution conflicts ancestry cannot decide.
//! - [`store`]: the storage collaborator the walker reads from.
//! - [`walker`]: [`Annotator`], which annotates a key by walking its ancestry
//!   in topological order with refcounted caches.

pub mod merge;
pub mod store;
pub mod tiebreak;
pub mod walker;

use std::fmt;

use bramble_core::graph::GraphError;
use bramble_core::model::types::{Line, TextKey};

pub use merge::AnnotationMerger;
pub use store::{ContentRecord, MemoryStore, RecordOrdering, StoreError, TextStore};
pub use tiebreak::{LexicographicTieBreak, TieBreak};
pub use walker::{Annotator, KeyState};

// ---------------------------------------------------------------------------
// AnnotatedLine
// ---------------------------------------------------------------------------

/// A line paired with the origin that last modified it.
///
/// Field order is significant: the derived `Ord` compares the origin first,
/// which is the order the lexicographic tie-break relies on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotatedLine<K> {
    pub origin: K,
    pub line: Line,
}

impl<K> AnnotatedLine<K> {
    #[must_use]
    pub const fn new(origin: K, line: Line) -> Self {
        Self { origin, line }
    }
}

/// Attribute every line to one origin.
#[must_use]
pub fn annotate_all<K: Clone>(origin: &K, lines: &[Line]) -> Vec<AnnotatedLine<K>> {
    lines
        .iter()
        .map(|line| AnnotatedLine::new(origin.clone(), line.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Origins
// ---------------------------------------------------------------------------

/// The candidate origins still claiming one line: sorted, deduplicated,
/// never empty.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Origins<K>(Vec<K>);

impl<K: Ord + Clone> Origins<K> {
    /// A resolved slot with exactly one origin.
    #[must_use]
    pub fn single(key: K) -> Self {
        Self(vec![key])
    }

    /// Sorted union of two candidate sets.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut keys: Vec<K> = self.0.iter().chain(other.0.iter()).cloned().collect();
        keys.sort();
        keys.dedup();
        Self(keys)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[K] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.0.binary_search(key).is_ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AnnotateError
// ---------------------------------------------------------------------------

/// Errors from annotating a key.
#[derive(Debug)]
pub enum AnnotateError {
    /// The store cannot produce the text for `key`.
    RevisionNotPresent { key: TextKey },
    /// The storage collaborator failed.
    Store(StoreError),
    /// The fetched parent map is not a DAG.
    Graph(GraphError),
}

impl fmt::Display for AnnotateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevisionNotPresent { key } => write!(f, "revision not present: {key}"),
            Self::Store(e) => write!(f, "text store error: {e}"),
            Self::Graph(e) => write!(f, "ancestry error: {e}"),
        }
    }
}

impl std::error::Error for AnnotateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RevisionNotPresent { .. } => None,
            Self::Store(e) => Some(e),
            Self::Graph(e) => Some(e),
        }
    }
}

impl From<StoreError> for AnnotateError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<GraphError> for AnnotateError {
    fn from(value: GraphError) -> Self {
        Self::Graph(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_union_is_sorted_and_deduplicated() {
        let a = Origins(vec!["b", "d"]);
        let b = Origins(vec!["a", "b"]);
        assert_eq!(a.union(&b).as_slice(), &["a", "b", "d"]);
    }

    #[test]
    fn revision_not_present_names_the_key() {
        let err = AnnotateError::RevisionNotPresent {
            key: TextKey::new("f", "r9"),
        };
        assert!(err.to_string().contains("f@r9"));
    }
}
