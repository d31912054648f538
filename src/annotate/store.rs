//! The storage collaborator consumed by the annotation walker.
//!
//! A [`TextStore`] answers two questions: the parents of a set of keys, and
//! the full text of a set of keys. How texts are physically stored is the
//! store's business; [`MemoryStore`] keeps everything in a map.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

use bramble_core::graph::KnownGraph;
use bramble_core::model::types::{Line, TextKey, split_lines};

/// Requested order for [`TextStore::get_record_stream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOrdering {
    /// Parents before children.
    Topological,
    /// Whatever order the store finds cheapest.
    Unordered,
}

/// One text as produced by a store. `lines` is `None` when the store has
/// no record of `key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentRecord {
    pub key: TextKey,
    pub lines: Option<Vec<Line>>,
}

impl ContentRecord {
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        self.lines.is_none()
    }

    #[must_use]
    pub fn line_count(&self) -> Option<usize> {
        self.lines.as_ref().map(Vec::len)
    }
}

/// Errors a store may raise. Absent keys are not errors at this layer; they
/// are reported through [`ContentRecord::lines`] being `None`.
#[derive(Debug)]
pub enum StoreError {
    /// The backing storage failed.
    Backend { message: String },
    /// Stored data for `key` could not be decoded.
    Corrupt { key: TextKey, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "store backend failure: {message}"),
            Self::Corrupt { key, message } => write!(f, "corrupt record for {key}: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Boxed stream of content records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<ContentRecord, StoreError>> + 'a>;

/// Read access to per-file text history.
pub trait TextStore {
    /// Parents of each known key. Unknown keys are left out of the result.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails.
    fn get_parent_map(&self, keys: &[TextKey]) -> Result<BTreeMap<TextKey, Vec<TextKey>>, StoreError>;

    /// Stream the texts of `keys`, one record per key.
    fn get_record_stream<'a>(&'a self, keys: &[TextKey], ordering: RecordOrdering) -> RecordStream<'a>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct StoredText {
    parents: Vec<TextKey>,
    lines: Vec<Line>,
}

/// An in-memory [`TextStore`].
///
/// Counts how many records it has streamed, so tests can observe which
/// texts a walk actually fetched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    texts: BTreeMap<TextKey, StoredText>,
    records_streamed: Cell<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a text given as lines.
    pub fn add_lines(&mut self, key: TextKey, parents: Vec<TextKey>, lines: Vec<Line>) {
        self.texts.insert(key, StoredText { parents, lines });
    }

    /// Store a text given as bytes; it is split on `\n`.
    pub fn add_text(&mut self, key: TextKey, parents: Vec<TextKey>, text: &[u8]) {
        self.add_lines(key, parents, split_lines(text));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Total records (present or absent) streamed so far.
    #[must_use]
    pub fn records_streamed(&self) -> usize {
        self.records_streamed.get()
    }
}

impl TextStore for MemoryStore {
    fn get_parent_map(&self, keys: &[TextKey]) -> Result<BTreeMap<TextKey, Vec<TextKey>>, StoreError> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.texts
                    .get(key)
                    .map(|stored| (key.clone(), stored.parents.clone()))
            })
            .collect())
    }

    fn get_record_stream<'a>(&'a self, keys: &[TextKey], ordering: RecordOrdering) -> RecordStream<'a> {
        let mut ordered: Vec<TextKey> = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        if ordering == RecordOrdering::Topological {
            let present = ordered.iter().filter_map(|key| {
                self.texts
                    .get(key)
                    .map(|stored| (key.clone(), stored.parents.clone()))
            });
            let graph = KnownGraph::new(present);
            match graph.topo_sort() {
                Ok(mut topo) => {
                    topo.extend(ordered.into_iter().filter(|k| !graph.contains(k)));
                    ordered = topo;
                }
                Err(e) => {
                    return Box::new(std::iter::once(Err(StoreError::Backend {
                        message: e.to_string(),
                    })));
                }
            }
        }
        Box::new(ordered.into_iter().map(move |key| {
            self.records_streamed.set(self.records_streamed.get() + 1);
            let lines = self.texts.get(&key).map(|stored| stored.lines.clone());
            Ok(ContentRecord { key, lines })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(rev: &str) -> TextKey {
        TextKey::new("f", rev)
    }

    #[test]
    fn parent_map_omits_unknown_keys() {
        let mut store = MemoryStore::new();
        store.add_text(key("r1"), vec![], b"a\n");
        let map = store.get_parent_map(&[key("r1"), key("missing")]).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&key("r1")));
    }

    #[test]
    fn topological_stream_puts_parents_first_and_absent_last() {
        let mut store = MemoryStore::new();
        store.add_text(key("b"), vec![key("a")], b"x\ny\n");
        store.add_text(key("a"), vec![], b"x\n");
        let records: Vec<ContentRecord> = store
            .get_record_stream(&[key("b"), key("zz"), key("a")], RecordOrdering::Topological)
            .collect::<Result<_, _>>()
            .unwrap();
        let order: Vec<&str> = records.iter().map(|r| r.key.revision.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "zz"]);
        assert_eq!(records[1].line_count(), Some(2));
        assert!(records[2].is_absent());
        assert_eq!(store.records_streamed(), 3);
    }
}
