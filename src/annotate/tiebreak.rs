//! Tie-break strategies for attribution conflicts.
//!
//! A tie-break is consulted only when two or more origins claim the same
//! line and ancestry does not show one superseding the others. The result
//! must be a pure function of the candidate *set*: re-merging the same
//! criss-cross history has to reattribute identically every time.
//! Strategies only ever see a sorted pair; [`fold_pairwise`] reduces larger
//! head sets.

/// Picks one origin from two competing candidates for a single line.
pub trait TieBreak<K> {
    /// Choose between `smaller` and `larger` (`smaller < larger`) for
    /// `line`.
    fn break_tie(&self, line: &[u8], smaller: &K, larger: &K) -> K;
}

/// Default strategy: the smallest origin wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LexicographicTieBreak;

impl<K: Ord + Clone> TieBreak<K> for LexicographicTieBreak {
    fn break_tie(&self, _line: &[u8], smaller: &K, larger: &K) -> K {
        smaller.min(larger).clone()
    }
}

impl<K, F> TieBreak<K> for F
where
    F: Fn(&[u8], &K, &K) -> K,
{
    fn break_tie(&self, line: &[u8], smaller: &K, larger: &K) -> K {
        self(line, smaller, larger)
    }
}

/// Reduce the heads `first` and `rest` to one origin by folding the
/// strategy over sorted pairs, smallest first.
pub fn fold_pairwise<K: Ord + Clone>(
    strategy: &dyn TieBreak<K>,
    line: &[u8],
    first: &K,
    rest: &[K],
) -> K {
    let smallest = rest.iter().fold(first, |min, k| if k < min { k } else { min });
    let mut challengers: Vec<&K> = std::iter::once(first)
        .chain(rest)
        .filter(|k| *k != smallest)
        .collect();
    challengers.sort();
    challengers.dedup();
    let mut winner = smallest.clone();
    for challenger in challengers {
        winner = if winner <= *challenger {
            strategy.break_tie(line, &winner, challenger)
        } else {
            strategy.break_tie(line, challenger, &winner)
        };
    }
    winner
}
