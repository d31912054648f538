//! Ancestry graph: heads, ancestry queries, and topological order.
//!
//! [`KnownGraph`] is built from a fully known parent map. Parents that are
//! referenced but absent from the map ("ghosts") are treated as roots.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;

use thiserror::Error;

/// Computes which candidates are not superseded by another candidate.
pub trait HeadsProvider<K> {
    /// Return the subset of `keys` that is not an ancestor of any other key
    /// in `keys`. Duplicates collapse.
    fn heads(&self, keys: &[K]) -> BTreeSet<K>;
}

/// Errors from graph traversal.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The parent map contains a cycle through the named key.
    #[error("ancestry cycle detected involving {key}")]
    Cycle {
        /// Debug rendering of one key on the cycle.
        key: String,
    },
}

/// An in-memory ancestry graph over keys of type `K`.
#[derive(Clone, Debug, Default)]
pub struct KnownGraph<K: Ord> {
    parents: BTreeMap<K, Vec<K>>,
}

impl<K: Ord + Clone + Debug> KnownGraph<K> {
    /// Build a graph from `(key, parents)` pairs. Parent order is preserved.
    pub fn new(parent_map: impl IntoIterator<Item = (K, Vec<K>)>) -> Self {
        Self {
            parents: parent_map.into_iter().collect(),
        }
    }

    /// Parents of `key`, or `None` for keys not in the graph.
    #[must_use]
    pub fn parents(&self, key: &K) -> Option<&[K]> {
        self.parents.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.parents.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// All strict ancestors of `key` (ghosts included, `key` excluded).
    #[must_use]
    pub fn ancestors(&self, key: &K) -> BTreeSet<K> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&K> = self.parents(key).unwrap_or_default().iter().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(grand) = self.parents.get(next) {
                queue.extend(grand.iter());
            }
        }
        seen
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &K, descendant: &K) -> bool {
        ancestor == descendant || self.ancestors(descendant).contains(ancestor)
    }

    /// Keys ordered so that every parent precedes its children.
    ///
    /// Ties are broken by key order, so the result is deterministic.
    /// Ghost parents do not appear in the output.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] if the parent map is not acyclic.
    pub fn topo_sort(&self) -> Result<Vec<K>, GraphError> {
        let mut pending: BTreeMap<&K, usize> = BTreeMap::new();
        let mut children: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
        for (key, parents) in &self.parents {
            let known: BTreeSet<&K> = parents.iter().filter(|p| self.contains(p)).collect();
            pending.insert(key, known.len());
            for parent in known {
                children.entry(parent).or_default().push(key);
            }
        }

        let mut ready: BTreeSet<&K> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut order = Vec::with_capacity(self.parents.len());
        while let Some(key) = ready.pop_first() {
            order.push(key.clone());
            for child in children.get(key).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }

        if order.len() != self.parents.len() {
            let stuck = pending
                .iter()
                .find(|(_, count)| **count > 0)
                .map(|(key, _)| format!("{key:?}"))
                .unwrap_or_default();
            return Err(GraphError::Cycle { key: stuck });
        }
        Ok(order)
    }
}

impl<K: Ord + Clone + Debug> HeadsProvider<K> for KnownGraph<K> {
    fn heads(&self, keys: &[K]) -> BTreeSet<K> {
        let candidates: BTreeSet<K> = keys.iter().cloned().collect();
        if candidates.len() < 2 {
            return candidates;
        }
        let mut dominated = BTreeSet::new();
        for candidate in &candidates {
            let ancestors = self.ancestors(candidate);
            dominated.extend(
                candidates
                    .iter()
                    .filter(|other| *other != candidate && ancestors.contains(*other))
                    .cloned(),
            );
        }
        candidates.difference(&dominated).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ```text
    ///   r1
    ///  /  \
    /// a    b
    ///  \  /
    ///   m
    /// ```
    fn diamond() -> KnownGraph<&'static str> {
        KnownGraph::new([
            ("r1", vec![]),
            ("a", vec!["r1"]),
            ("b", vec!["r1"]),
            ("m", vec!["a", "b"]),
        ])
    }

    #[test]
    fn heads_drop_ancestors() {
        let g = diamond();
        assert_eq!(g.heads(&["r1", "a"]), BTreeSet::from(["a"]));
        assert_eq!(g.heads(&["a", "b"]), BTreeSet::from(["a", "b"]));
        assert_eq!(g.heads(&["a", "b", "m"]), BTreeSet::from(["m"]));
    }

    #[test]
    fn heads_collapse_duplicates() {
        let g = diamond();
        assert_eq!(g.heads(&["a", "a"]), BTreeSet::from(["a"]));
    }

    #[test]
    fn is_ancestor_is_reflexive() {
        let g = diamond();
        assert!(g.is_ancestor(&"r1", &"m"));
        assert!(g.is_ancestor(&"m", &"m"));
        assert!(!g.is_ancestor(&"a", &"b"));
    }

    #[test]
    fn topo_sort_puts_parents_first() {
        let order = diamond().topo_sort().unwrap();
        assert_eq!(order, vec!["r1", "a", "b", "m"]);
    }

    #[test]
    fn ghost_parents_are_roots() {
        let g = KnownGraph::new([("child", vec!["ghost"])]);
        assert_eq!(g.topo_sort().unwrap(), vec!["child"]);
        assert!(g.is_ancestor(&"ghost", &"child"));
    }

    #[test]
    fn cycle_is_reported() {
        let g = KnownGraph::new([("x", vec!["y"]), ("y", vec!["x"])]);
        assert!(matches!(g.topo_sort(), Err(GraphError::Cycle { .. })));
    }
}
