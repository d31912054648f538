//! Annotate one key by walking its ancestry.
//!
//! [`Annotator`] fetches exactly the texts a walk needs, annotates them
//! parents-first, and evicts a parent's text and annotation as soon as the
//! last child that needed it has been annotated. Peak memory follows the
//! active frontier of the graph, not the whole history.
//!
//! Per-key lifecycle, as reported by [`Annotator::state`]:
//!
//! ```text
//! unneeded -> fetch-pending -> text-cached -> annotated -> evicted
//!                   ^                                        |
//!                   +---------------- re-walk ---------------+
//! ```
//!
//! Reference counts and the evicted set only describe the current (or most
//! recent) walk, so a long-lived annotator's bookkeeping stays bounded by
//! one walk; only the parent map and the requested keys' results persist.

use std::collections::{BTreeMap, BTreeSet};

use bramble_core::diff::matching_blocks;
use bramble_core::graph::KnownGraph;
use bramble_core::model::types::{Line, TextKey, split_lines};
use tracing::{debug, trace};

use super::merge::{AnnotationMerger, update_from_first_parent, update_from_other_parent};
use super::store::{RecordOrdering, TextStore};
use super::tiebreak::{LexicographicTieBreak, TieBreak};
use super::{AnnotateError, AnnotatedLine, Origins};

/// Where a key is in the walker's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// Never seen by a walk.
    Unneeded,
    /// Known to the graph, text not fetched yet.
    FetchPending,
    /// Text cached, not annotated yet.
    TextCached,
    /// Text and annotation cached.
    Annotated,
    /// Dropped by the most recent walk once no child needed it.
    Evicted,
}

/// Cache occupancy, for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub texts: usize,
    pub annotations: usize,
    pub known_keys: usize,
}

/// Texts to fetch and texts already cached but not yet annotated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeededKeys {
    pub fetch: BTreeSet<TextKey>,
    pub annotate_cached: BTreeSet<TextKey>,
}

/// Annotation graph walker over a [`TextStore`].
pub struct Annotator<'s, S: TextStore + ?Sized> {
    store: &'s S,
    tie_break: &'s dyn TieBreak<TextKey>,
    parent_map: BTreeMap<TextKey, Vec<TextKey>>,
    text_cache: BTreeMap<TextKey, Vec<Line>>,
    annotations_cache: BTreeMap<TextKey, Vec<Origins<TextKey>>>,
    num_needed_children: BTreeMap<TextKey, usize>,
    evicted: BTreeSet<TextKey>,
    // Only valid while `parent_map` is unchanged.
    heads: Option<KnownGraph<TextKey>>,
}

fn without_null(parents: Vec<TextKey>) -> Vec<TextKey> {
    parents.into_iter().filter(|p| !p.is_null()).collect()
}

impl<'s, S: TextStore + ?Sized> Annotator<'s, S> {
    /// A walker over `store` using the lexicographic tie-break.
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            tie_break: &LexicographicTieBreak,
            parent_map: BTreeMap::new(),
            text_cache: BTreeMap::new(),
            annotations_cache: BTreeMap::new(),
            num_needed_children: BTreeMap::new(),
            evicted: BTreeSet::new(),
            heads: None,
        }
    }

    /// Replace the tie-break used by [`annotate_flat`](Self::annotate_flat).
    #[must_use]
    pub fn with_tie_break(mut self, tie_break: &'s dyn TieBreak<TextKey>) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Inject a text that the store does not have, such as uncommitted
    /// working-tree content under [`RevisionId::current`].
    ///
    /// [`RevisionId::current`]: bramble_core::model::types::RevisionId::current
    pub fn add_special_text(&mut self, key: TextKey, parents: Vec<TextKey>, text: &[u8]) {
        self.parent_map.insert(key.clone(), without_null(parents));
        self.text_cache.insert(key.clone(), split_lines(text));
        self.annotations_cache.remove(&key);
        self.evicted.remove(&key);
        self.heads = None;
    }

    #[must_use]
    pub fn state(&self, key: &TextKey) -> KeyState {
        if self.annotations_cache.contains_key(key) {
            KeyState::Annotated
        } else if self.text_cache.contains_key(key) {
            KeyState::TextCached
        } else if self.evicted.contains(key) {
            KeyState::Evicted
        } else if self.parent_map.contains_key(key) {
            KeyState::FetchPending
        } else {
            KeyState::Unneeded
        }
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            texts: self.text_cache.len(),
            annotations: self.annotations_cache.len(),
            known_keys: self.parent_map.len(),
        }
    }

    /// Work out which texts annotating `key` requires, and count how many
    /// children will read each parent's annotation.
    ///
    /// `key` itself gets one extra reference so it survives the walk. Keys
    /// that were evicted by an earlier walk are fetched again, and their
    /// parents are walked again too.
    ///
    /// # Errors
    /// Returns [`AnnotateError::Store`] if the parent lookup fails.
    pub fn get_needed_keys(&mut self, key: &TextKey) -> Result<NeededKeys, AnnotateError> {
        self.num_needed_children.insert(key.clone(), 1);
        let mut needed = NeededKeys::default();
        let mut visited: BTreeSet<TextKey> = BTreeSet::new();
        let mut frontier: BTreeSet<TextKey> = BTreeSet::from([key.clone()]);

        while !frontier.is_empty() {
            let mut lookup = Vec::new();
            let mut next_parent_map: BTreeMap<TextKey, Vec<TextKey>> = BTreeMap::new();
            for k in std::mem::take(&mut frontier) {
                if !visited.insert(k.clone()) || self.annotations_cache.contains_key(&k) {
                    continue;
                }
                if let Some(parents) = self.parent_map.get(&k) {
                    next_parent_map.insert(k.clone(), parents.clone());
                    if self.text_cache.contains_key(&k) {
                        needed.annotate_cached.insert(k);
                    } else {
                        needed.fetch.insert(k);
                    }
                } else {
                    lookup.push(k.clone());
                    needed.fetch.insert(k);
                }
            }

            if !lookup.is_empty() {
                for (k, parents) in self.store.get_parent_map(&lookup)? {
                    next_parent_map.insert(k, without_null(parents));
                }
            }

            for parents in next_parent_map.values() {
                for parent in parents {
                    *self.num_needed_children.entry(parent.clone()).or_insert(0) += 1;
                    if !visited.contains(parent) {
                        frontier.insert(parent.clone());
                    }
                }
            }
            if !next_parent_map.is_empty() {
                self.parent_map.extend(next_parent_map);
                self.heads = None;
            }
        }
        Ok(needed)
    }

    /// Annotate `key`, returning the candidate origins for each line and the
    /// lines themselves.
    ///
    /// Lines that more than one unrelated parent claims carry every claimant;
    /// use [`annotate_flat`](Self::annotate_flat) for one origin per line.
    ///
    /// # Errors
    /// Returns [`AnnotateError::RevisionNotPresent`] if `key` or one of its
    /// non-null ancestors is missing from the store.
    pub fn annotate(&mut self, key: &TextKey) -> Result<(Vec<Origins<TextKey>>, Vec<Line>), AnnotateError> {
        let _span = tracing::info_span!("annotate", %key).entered();
        self.num_needed_children.clear();
        self.evicted.clear();
        let needed = self.get_needed_keys(key)?;
        debug!(
            fetch = needed.fetch.len(),
            cached = needed.annotate_cached.len(),
            "annotation walk planned"
        );

        let mut pending = needed.annotate_cached;
        if !needed.fetch.is_empty() {
            let store = self.store;
            let fetch: Vec<TextKey> = needed.fetch.into_iter().collect();
            for record in store.get_record_stream(&fetch, RecordOrdering::Topological) {
                let record = record?;
                let Some(lines) = record.lines else {
                    return Err(AnnotateError::RevisionNotPresent { key: record.key });
                };
                self.evicted.remove(&record.key);
                self.text_cache.insert(record.key.clone(), lines);
                pending.insert(record.key);
            }
        }

        let order = KnownGraph::new(pending.iter().map(|k| {
            let parents = self.parent_map.get(k).cloned().unwrap_or_default();
            (k.clone(), parents)
        }))
        .topo_sort()?;
        for k in &order {
            self.annotate_one(k)?;
        }

        let annotations = self
            .annotations_cache
            .get(key)
            .cloned()
            .ok_or_else(|| AnnotateError::RevisionNotPresent { key: key.clone() })?;
        // Drop the walk's own reference; the result stays cached until a
        // later walk consumes it as a parent.
        self.num_needed_children.remove(key);
        let lines = self
            .text_cache
            .get(key)
            .cloned()
            .ok_or_else(|| AnnotateError::RevisionNotPresent { key: key.clone() })?;
        Ok((annotations, lines))
    }

    /// Annotate `key` with exactly one origin per line.
    ///
    /// Multi-candidate lines are reduced to their ancestry heads; if more
    /// than one head remains, the tie-break is folded over them pairwise.
    ///
    /// # Errors
    /// Same as [`annotate`](Self::annotate).
    pub fn annotate_flat(&mut self, key: &TextKey) -> Result<Vec<AnnotatedLine<TextKey>>, AnnotateError> {
        let (annotations, lines) = self.annotate(key)?;
        let tie_break = self.tie_break;
        let graph = self.heads_provider();
        let merger = AnnotationMerger::new().with_heads(graph).with_tie_break(tie_break);
        Ok(annotations
            .into_iter()
            .zip(lines)
            .map(|(origins, line)| {
                let origin = match origins.as_slice() {
                    [only] => only.clone(),
                    [first, rest @ ..] => merger.resolve(&line, first, rest),
                    // Unclaimed: the line is new in `key`.
                    [] => key.clone(),
                };
                AnnotatedLine::new(origin, line)
            })
            .collect())
    }

    fn heads_provider(&mut self) -> &KnownGraph<TextKey> {
        self.heads
            .get_or_insert_with(|| KnownGraph::new(self.parent_map.clone()))
    }

    fn annotate_one(&mut self, key: &TextKey) -> Result<(), AnnotateError> {
        let parents = self.parent_map.get(key).cloned().unwrap_or_default();
        let lines = self
            .text_cache
            .get(key)
            .ok_or_else(|| AnnotateError::RevisionNotPresent { key: key.clone() })?;
        let this = Origins::single(key.clone());
        let mut annotations = vec![this.clone(); lines.len()];

        for (idx, parent) in parents.iter().enumerate() {
            let missing = || AnnotateError::RevisionNotPresent { key: parent.clone() };
            let parent_annotations = self.annotations_cache.get(parent).ok_or_else(missing)?;
            let parent_lines = self.text_cache.get(parent).ok_or_else(missing)?;
            let blocks = matching_blocks(parent_lines, lines);
            if idx == 0 {
                update_from_first_parent(&mut annotations, parent_annotations, &blocks);
            } else {
                update_from_other_parent(&mut annotations, parent_annotations, &blocks, &this);
            }
        }

        self.record_annotation(key, &parents, annotations);
        Ok(())
    }

    fn record_annotation(&mut self, key: &TextKey, parents: &[TextKey], annotations: Vec<Origins<TextKey>>) {
        self.annotations_cache.insert(key.clone(), annotations);
        for parent in parents {
            let remaining = self
                .num_needed_children
                .get(parent)
                .copied()
                .unwrap_or(0)
                .saturating_sub(1);
            if remaining > 0 {
                self.num_needed_children.insert(parent.clone(), remaining);
            } else {
                self.num_needed_children.remove(parent);
                self.text_cache.remove(parent);
                self.annotations_cache.remove(parent);
                self.evicted.insert(parent.clone());
                trace!(%parent, "evicted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::store::MemoryStore;

    fn key(rev: &str) -> TextKey {
        TextKey::new("file.txt", rev)
    }

    fn flat_revs(out: &[AnnotatedLine<TextKey>]) -> Vec<&str> {
        out.iter().map(|a| a.origin.revision.as_str()).collect()
    }

    fn linear_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.add_text(key("r1"), vec![TextKey::new("file.txt", "null:")], b"a\nb\n");
        store.add_text(key("r2"), vec![key("r1")], b"a\nb\nc\n");
        store.add_text(key("r3"), vec![key("r2")], b"a\nx\nc\n");
        store
    }

    #[test]
    fn linear_history_attributes_each_line() {
        let store = linear_store();
        let mut annotator = Annotator::new(&store);
        let out = annotator.annotate_flat(&key("r3")).unwrap();
        assert_eq!(flat_revs(&out), vec!["r1", "r3", "r2"]);
        assert_eq!(out[1].line, b"x\n");
    }

    #[test]
    fn parents_are_evicted_after_last_child() {
        let store = linear_store();
        let mut annotator = Annotator::new(&store);
        annotator.annotate(&key("r3")).unwrap();
        assert_eq!(annotator.state(&key("r3")), KeyState::Annotated);
        assert_eq!(annotator.state(&key("r2")), KeyState::Evicted);
        assert_eq!(annotator.state(&key("r1")), KeyState::Evicted);
        assert_eq!(annotator.state(&key("r9")), KeyState::Unneeded);
        let stats = annotator.cache_stats();
        assert_eq!((stats.texts, stats.annotations), (1, 1));
    }

    #[test]
    fn evicted_keys_can_be_annotated_again() {
        let store = linear_store();
        let mut annotator = Annotator::new(&store);
        annotator.annotate(&key("r3")).unwrap();
        let again = annotator.annotate_flat(&key("r2")).unwrap();
        let fresh = Annotator::new(&store).annotate_flat(&key("r2")).unwrap();
        assert_eq!(again, fresh);
        assert_eq!(flat_revs(&again), vec!["r1", "r1", "r2"]);
    }

    #[test]
    fn bookkeeping_is_bounded_by_one_walk() {
        let mut store = linear_store();
        let other = |rev: &str| TextKey::new("other.txt", rev);
        store.add_text(other("o1"), vec![], b"p\n");
        store.add_text(other("o2"), vec![other("o1")], b"p\nq\n");
        let mut annotator = Annotator::new(&store);

        annotator.annotate(&key("r2")).unwrap();
        assert!(annotator.num_needed_children.is_empty());
        // The earlier result is consumed as a parent and evicted.
        annotator.annotate(&key("r3")).unwrap();
        assert!(annotator.num_needed_children.is_empty());
        assert_eq!(annotator.state(&key("r2")), KeyState::Evicted);
        assert_eq!(annotator.cache_stats().texts, 1);

        annotator.annotate(&other("o2")).unwrap();
        assert!(annotator.num_needed_children.is_empty());
        assert_eq!(annotator.evicted, BTreeSet::from([other("o1")]));
        assert_eq!(annotator.state(&key("r3")), KeyState::Annotated);
    }

    #[test]
    fn cached_annotation_is_not_refetched() {
        let store = linear_store();
        let mut annotator = Annotator::new(&store);
        annotator.annotate(&key("r3")).unwrap();
        let fetched = store.records_streamed();
        annotator.annotate(&key("r3")).unwrap();
        assert_eq!(store.records_streamed(), fetched);
    }

    /// Parent A = a b c, parent B = a B2 c, merge text = a b c.
    #[test]
    fn merge_matching_left_parent_keeps_left_attribution() {
        let mut store = MemoryStore::new();
        store.add_text(key("A"), vec![], b"a\nb\nc\n");
        store.add_text(key("B"), vec![], b"a\nB2\nc\n");
        store.add_text(key("M"), vec![key("A"), key("B")], b"a\nb\nc\n");
        let out = Annotator::new(&store).annotate_flat(&key("M")).unwrap();
        assert_eq!(flat_revs(&out), vec!["A", "A", "A"]);
    }

    #[test]
    fn unrelated_claims_are_kept_until_flattened() {
        let mut store = MemoryStore::new();
        store.add_text(key("base"), vec![], b"x\n");
        store.add_text(key("A"), vec![key("base")], b"x\nc\n");
        store.add_text(key("B"), vec![key("base")], b"x\nc\n");
        store.add_text(key("M1"), vec![key("A"), key("B")], b"x\nc\n");
        store.add_text(key("M2"), vec![key("B"), key("A")], b"x\nc\n");

        let mut annotator = Annotator::new(&store);
        let (annotations, _) = annotator.annotate(&key("M1")).unwrap();
        assert_eq!(annotations[0], Origins::single(key("base")));
        assert_eq!(annotations[1].as_slice(), &[key("A"), key("B")]);

        let m1 = annotator.annotate_flat(&key("M1")).unwrap();
        let m2 = Annotator::new(&store).annotate_flat(&key("M2")).unwrap();
        assert_eq!(flat_revs(&m1), vec!["base", "A"]);
        assert_eq!(flat_revs(&m1), flat_revs(&m2));
    }

    #[test]
    fn descendant_claim_beats_ancestor_when_flattening() {
        let mut store = MemoryStore::new();
        store.add_text(key("A"), vec![], b"x\nc\n");
        store.add_text(key("A2"), vec![key("A")], b"x\n");
        // X re-adds the line A2 removed, so X claims it itself.
        store.add_text(key("X"), vec![key("A2")], b"x\nc\n");
        store.add_text(key("Z"), vec![key("X"), key("A")], b"x\nc\n");

        let mut annotator = Annotator::new(&store);
        let (annotations, _) = annotator.annotate(&key("Z")).unwrap();
        assert_eq!(annotations[1].as_slice(), &[key("A"), key("X")]);
        // The tie-break alone would pick A; ancestry says X supersedes it.
        let out = annotator.annotate_flat(&key("Z")).unwrap();
        assert_eq!(flat_revs(&out), vec!["A", "X"]);
    }

    #[test]
    fn special_text_is_annotated_against_real_history() {
        let store = linear_store();
        let mut annotator = Annotator::new(&store);
        let current = TextKey::new("file.txt", "current:");
        annotator.add_special_text(current.clone(), vec![key("r3")], b"a\nx\nc\nnew\n");
        let out = annotator.annotate_flat(&current).unwrap();
        assert_eq!(flat_revs(&out), vec!["r1", "r3", "r2", "current:"]);
    }

    #[test]
    fn missing_key_is_revision_not_present() {
        let store = linear_store();
        let err = Annotator::new(&store).annotate(&key("nope")).unwrap_err();
        assert!(matches!(err, AnnotateError::RevisionNotPresent { key: k } if k == key("nope")));
    }

    #[test]
    fn missing_parent_is_revision_not_present() {
        let mut store = MemoryStore::new();
        store.add_text(key("child"), vec![key("ghost")], b"a\n");
        let err = Annotator::new(&store).annotate(&key("child")).unwrap_err();
        assert!(matches!(err, AnnotateError::RevisionNotPresent { key: k } if k == key("ghost")));
    }

    #[test]
    fn custom_tie_break_applies_to_flattening() {
        let mut store = MemoryStore::new();
        store.add_text(key("A"), vec![], b"c\n");
        store.add_text(key("B"), vec![], b"c\n");
        store.add_text(key("M"), vec![key("A"), key("B")], b"c\n");
        let last = |_: &[u8], _: &TextKey, larger: &TextKey| larger.clone();
        let out = Annotator::new(&store)
            .with_tie_break(&last)
            .annotate_flat(&key("M"))
            .unwrap();
        assert_eq!(flat_revs(&out), vec!["B"]);
    }
}
