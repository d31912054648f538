//! Patience matching blocks.
//!
//! [`matching_blocks`] returns the runs of identical elements shared by two
//! sequences, found with the patience algorithm: unique lines anchor the
//! match first, so repeated short lines (`}`, blank lines) do not pull
//! unrelated regions into alignment.
//!
//! Blocks are non-overlapping, strictly ascending in both sequences,
//! coalesced (no two blocks are adjacent in both `a` and `b`), and always
//! end with the sentinel `(a.len(), b.len(), 0)`.

use std::hash::Hash;

use similar::{Algorithm, DiffOp, capture_diff_slices};

/// A maximal run of `len` equal elements at `a[a_start..]` and `b[b_start..]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchingBlock {
    pub a_start: usize,
    pub b_start: usize,
    pub len: usize,
}

impl MatchingBlock {
    #[must_use]
    pub const fn new(a_start: usize, b_start: usize, len: usize) -> Self {
        Self {
            a_start,
            b_start,
            len,
        }
    }

    /// One past the last matched index in `a`.
    #[must_use]
    pub const fn a_end(&self) -> usize {
        self.a_start + self.len
    }

    /// One past the last matched index in `b`.
    #[must_use]
    pub const fn b_end(&self) -> usize {
        self.b_start + self.len
    }

    /// Whether this is the zero-length terminator.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.len == 0
    }
}

/// Compute patience matching blocks between `a` and `b`.
#[must_use]
pub fn matching_blocks<T: Eq + Hash + Ord>(a: &[T], b: &[T]) -> Vec<MatchingBlock> {
    let mut blocks: Vec<MatchingBlock> = Vec::new();
    for op in capture_diff_slices(Algorithm::Patience, a, b) {
        let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        else {
            continue;
        };
        if len == 0 {
            continue;
        }
        if let Some(last) = blocks.last_mut()
            && last.a_end() == old_index
            && last.b_end() == new_index
        {
            last.len += len;
            continue;
        }
        blocks.push(MatchingBlock::new(old_index, new_index, len));
    }
    blocks.push(MatchingBlock::new(a.len(), b.len(), 0));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<&str> {
        s.split(' ').filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn identical_sequences_are_one_block() {
        let a = lines("a b c");
        assert_eq!(
            matching_blocks(&a, &a),
            vec![MatchingBlock::new(0, 0, 3), MatchingBlock::new(3, 3, 0)]
        );
    }

    #[test]
    fn empty_inputs_yield_only_sentinel() {
        let empty: Vec<&str> = Vec::new();
        assert_eq!(matching_blocks(&empty, &empty), vec![MatchingBlock::new(0, 0, 0)]);
        let b = lines("x y");
        assert_eq!(matching_blocks(&empty, &b), vec![MatchingBlock::new(0, 2, 0)]);
    }

    #[test]
    fn changed_middle_line_splits_blocks() {
        let a = lines("a b c");
        let b = lines("a B2 c");
        assert_eq!(
            matching_blocks(&a, &b),
            vec![
                MatchingBlock::new(0, 0, 1),
                MatchingBlock::new(2, 2, 1),
                MatchingBlock::new(3, 3, 0),
            ]
        );
    }

    #[test]
    fn insertion_keeps_alignment() {
        let a = lines("a b c");
        let b = lines("a b new c");
        assert_eq!(
            matching_blocks(&a, &b),
            vec![
                MatchingBlock::new(0, 0, 2),
                MatchingBlock::new(2, 3, 1),
                MatchingBlock::new(3, 4, 0),
            ]
        );
    }

    #[test]
    fn blocks_are_ascending_and_terminated() {
        let a = lines("x } y } z } w");
        let b = lines("x } z } q } w }");
        let blocks = matching_blocks(&a, &b);
        let last = blocks.last().copied().unwrap();
        assert!(last.is_sentinel());
        assert_eq!((last.a_start, last.b_start), (a.len(), b.len()));
        for pair in blocks.windows(2) {
            assert!(pair[0].a_end() <= pair[1].a_start);
            assert!(pair[0].b_end() <= pair[1].b_start);
        }
        for block in &blocks {
            assert_eq!(
                a[block.a_start..block.a_end()],
                b[block.b_start..block.b_end()]
            );
        }
    }
}
