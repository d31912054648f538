//! Annotation merging: attribute the lines of a new text given the
//! annotations of its parents.
//!
//! Two families of operations live here:
//!
//! - [`AnnotationMerger::reannotate`] works on fully resolved annotations
//!   (one origin per line) and always returns resolved output. It has
//!   separate algorithms for 0, 1, 2 and more than 2 parents.
//! - [`update_from_first_parent`] / [`update_from_other_parent`] work on
//!   candidate sets ([`Origins`]) and defer conflict resolution to
//!   [`AnnotationMerger::resolve`]; the graph walker builds on these.

use std::collections::BTreeSet;
use std::hash::Hash;
use std::ops::Range;

use bramble_core::diff::{MatchingBlock, matching_blocks};
use bramble_core::graph::HeadsProvider;
use bramble_core::model::types::Line;

use super::tiebreak::{LexicographicTieBreak, TieBreak, fold_pairwise};
use super::{AnnotatedLine, Origins, annotate_all};

/// Merges parent annotations into the annotation of a new text.
///
/// Holds the two policies a merge can consult: an optional heads provider
/// (ancestry) and a tie-break strategy. Without a heads provider every
/// genuine conflict goes straight to the tie-break.
pub struct AnnotationMerger<'a, K> {
    heads: Option<&'a dyn HeadsProvider<K>>,
    tie_break: &'a dyn TieBreak<K>,
}

impl<K> Clone for AnnotationMerger<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for AnnotationMerger<'_, K> {}

impl<K: Ord + Clone> Default for AnnotationMerger<'_, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> AnnotationMerger<'_, K> {
    /// A merger with no ancestry information and the lexicographic tie-break.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heads: None,
            tie_break: &LexicographicTieBreak,
        }
    }
}

impl<'a, K: Ord + Clone + Hash> AnnotationMerger<'a, K> {
    /// Use `heads` to let a descendant origin beat its ancestor.
    #[must_use]
    pub fn with_heads(mut self, heads: &'a dyn HeadsProvider<K>) -> Self {
        self.heads = Some(heads);
        self
    }

    /// Replace the tie-break strategy.
    #[must_use]
    pub fn with_tie_break(mut self, tie_break: &'a dyn TieBreak<K>) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Annotate `new_lines` given the annotations of each parent.
    ///
    /// Lines not matched in any parent are attributed to `new_origin`.
    /// `left_blocks` optionally supplies precomputed matching blocks between
    /// the first parent's lines and `new_lines`.
    #[must_use]
    pub fn reannotate(
        &self,
        parents: &[Vec<AnnotatedLine<K>>],
        new_lines: &[Line],
        new_origin: &K,
        left_blocks: Option<&[MatchingBlock]>,
    ) -> Vec<AnnotatedLine<K>> {
        match parents {
            [] => annotate_all(new_origin, new_lines),
            [only] => reannotate_one(only, new_lines, new_origin, left_blocks),
            [left, right] => {
                let left = reannotate_one(left, new_lines, new_origin, left_blocks);
                self.reannotate_annotated(right, new_lines, new_origin, &left)
            }
            [first, rest @ ..] => self.reannotate_many(first, rest, new_lines, new_origin, left_blocks),
        }
    }

    /// Pick one origin for `line` from the competing candidates `first`
    /// and `rest`.
    ///
    /// A single distinct candidate wins outright. Otherwise the heads
    /// provider (if any) drops superseded candidates, and whatever remains
    /// is folded pairwise through the tie-break in sorted order.
    #[must_use]
    pub fn resolve(&self, line: &[u8], first: &K, rest: &[K]) -> K {
        if rest.iter().all(|k| k == first) {
            return first.clone();
        }
        if let Some(provider) = self.heads {
            let mut distinct: Vec<K> = std::iter::once(first).chain(rest).cloned().collect();
            distinct.sort();
            distinct.dedup();
            let heads: Vec<K> = provider.heads(&distinct).into_iter().collect();
            if let [head, others @ ..] = heads.as_slice() {
                return fold_pairwise(self.tie_break, line, head, others);
            }
        }
        fold_pairwise(self.tie_break, line, first, rest)
    }

    // -----------------------------------------------------------------------
    // Two parents: chained reannotation
    // -----------------------------------------------------------------------

    /// Reconcile `left` (the annotation of `new_lines` against the first
    /// parent) with the full annotation of the second parent.
    fn reannotate_annotated(
        &self,
        right: &[AnnotatedLine<K>],
        new_lines: &[Line],
        new_origin: &K,
        left: &[AnnotatedLine<K>],
    ) -> Vec<AnnotatedLine<K>> {
        debug_assert_eq!(new_lines.len(), left.len());
        let mut out = Vec::with_capacity(left.len());
        let mut last_right = 0;
        let mut last_left = 0;
        for block in matching_blocks(right, left) {
            if last_right == block.a_start || last_left == block.b_start {
                // One side of the gap is empty: a pure insertion.
                out.extend_from_slice(&left[last_left..block.b_start]);
            } else {
                self.match_unannotated(
                    &mut out,
                    new_lines,
                    left,
                    last_left..block.b_start,
                    right,
                    last_right..block.a_start,
                    new_origin,
                );
            }
            last_right = block.a_end();
            last_left = block.b_end();
            out.extend_from_slice(&left[block.b_start..block.b_end()]);
        }
        out
    }

    /// Sub-match the raw lines of an overlapping gap and settle each
    /// matched pair of claims.
    #[allow(clippy::too_many_arguments)]
    fn match_unannotated(
        &self,
        out: &mut Vec<AnnotatedLine<K>>,
        new_lines: &[Line],
        left: &[AnnotatedLine<K>],
        child: Range<usize>,
        right: &[AnnotatedLine<K>],
        right_range: Range<usize>,
        new_origin: &K,
    ) {
        let plain_right: Vec<&Line> = right[right_range.clone()].iter().map(|a| &a.line).collect();
        let plain_child: Vec<&Line> = new_lines[child.clone()].iter().collect();
        let mut last_child = 0;
        for block in matching_blocks(&plain_right, &plain_child) {
            if block.b_start > last_child {
                out.extend_from_slice(&left[child.start + last_child..child.start + block.b_start]);
            }
            for offset in 0..block.len {
                let l = &left[child.start + block.b_start + offset];
                let r = &right[right_range.start + block.a_start + offset];
                if l.origin == r.origin {
                    out.push(l.clone());
                } else if l.origin == *new_origin {
                    // Looked new from the left, but the right parent has it.
                    out.push(r.clone());
                } else {
                    let origin = self.resolve(&l.line, &l.origin, std::slice::from_ref(&r.origin));
                    out.push(AnnotatedLine::new(origin, l.line.clone()));
                }
            }
            last_child = block.b_end();
        }
    }

    // -----------------------------------------------------------------------
    // More than two parents: independent passes, then reduce
    // -----------------------------------------------------------------------

    fn reannotate_many(
        &self,
        first: &[AnnotatedLine<K>],
        rest: &[Vec<AnnotatedLine<K>>],
        new_lines: &[Line],
        new_origin: &K,
        left_blocks: Option<&[MatchingBlock]>,
    ) -> Vec<AnnotatedLine<K>> {
        let mut passes = Vec::with_capacity(rest.len() + 1);
        passes.push(reannotate_one(first, new_lines, new_origin, left_blocks));
        passes.extend(
            rest.iter()
                .map(|parent| reannotate_one(parent, new_lines, new_origin, None)),
        );

        new_lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let mut origins: BTreeSet<&K> = passes.iter().map(|pass| &pass[idx].origin).collect();
                if origins.len() == 2 && origins.contains(new_origin) {
                    origins.remove(new_origin);
                }
                let mut candidates = origins.into_iter();
                let origin = match candidates.next() {
                    Some(first) => {
                        let rest: Vec<K> = candidates.cloned().collect();
                        self.resolve(line, first, &rest)
                    }
                    None => new_origin.clone(),
                };
                AnnotatedLine::new(origin, line.clone())
            })
            .collect()
    }
}

/// Annotate `new_lines` against a single parent: matched lines keep the
/// parent's origin verbatim, everything else goes to `new_origin`.
#[must_use]
pub fn reannotate_one<K: Clone + Eq + Hash + Ord>(
    parent: &[AnnotatedLine<K>],
    new_lines: &[Line],
    new_origin: &K,
    blocks: Option<&[MatchingBlock]>,
) -> Vec<AnnotatedLine<K>> {
    let computed;
    let blocks = if let Some(blocks) = blocks {
        blocks
    } else {
        let plain_parent: Vec<&Line> = parent.iter().map(|a| &a.line).collect();
        let plain_new: Vec<&Line> = new_lines.iter().collect();
        computed = matching_blocks(&plain_parent, &plain_new);
        &computed
    };

    let mut out = Vec::with_capacity(new_lines.len());
    let mut new_cur = 0;
    for block in blocks {
        out.extend(annotate_all(new_origin, &new_lines[new_cur..block.b_start]));
        out.extend_from_slice(&parent[block.a_start..block.a_end()]);
        new_cur = block.b_end();
    }
    // A caller-supplied hint may omit the sentinel.
    out.extend(annotate_all(new_origin, &new_lines[new_cur..]));
    out
}

// ---------------------------------------------------------------------------
// Candidate-set updates (graph walker)
// ---------------------------------------------------------------------------

/// Copy the first parent's candidate sets onto every matched line.
pub fn update_from_first_parent<K: Clone>(
    annotations: &mut [Origins<K>],
    parent_annotations: &[Origins<K>],
    blocks: &[MatchingBlock],
) {
    for block in blocks {
        annotations[block.b_start..block.b_end()]
            .clone_from_slice(&parent_annotations[block.a_start..block.a_end()]);
    }
}

/// Fold a further parent's candidate sets into `annotations`.
///
/// Lines still claimed only by `this` (the revision being annotated) are
/// taken over by the parent. Lines where both sides disagree keep the union
/// of both candidate sets for later flattening.
pub fn update_from_other_parent<K: Ord + Clone>(
    annotations: &mut [Origins<K>],
    parent_annotations: &[Origins<K>],
    blocks: &[MatchingBlock],
    this: &Origins<K>,
) {
    // Long runs of the same disagreement are common after a merge; reuse
    // the last union instead of recomputing it per line.
    let mut last: Option<(Origins<K>, Origins<K>, Origins<K>)> = None;
    for block in blocks {
        let ann_range = block.b_start..block.b_end();
        let par_sub = &parent_annotations[block.a_start..block.a_end()];
        if annotations[ann_range.clone()] == *par_sub {
            continue;
        }
        for (slot, par_ann) in annotations[ann_range].iter_mut().zip(par_sub) {
            if slot == par_ann {
                continue;
            }
            if slot == this {
                slot.clone_from(par_ann);
                continue;
            }
            let reuse = matches!(&last, Some((ann, par, _)) if *ann == *slot && *par == *par_ann);
            if !reuse {
                let res = slot.union(par_ann);
                last = Some((slot.clone(), par_ann.clone(), res));
            }
            if let Some((_, _, res)) = &last {
                slot.clone_from(res);
            }
        }
    }
}
