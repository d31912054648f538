//! Memoized final-path computation.

use std::collections::BTreeMap;

use super::{TransId, TransformError, TreeTransform, join_path};
use crate::tree::MutableTree;

/// Computes the tree-relative path each id will have after apply.
///
/// Results are cached for the lifetime of the value, so build a fresh one
/// after editing the transform.
pub struct FinalPaths<'a, 't, T: MutableTree> {
    transform: &'a TreeTransform<'t, T>,
    known: BTreeMap<TransId, String>,
}

impl<'a, 't, T: MutableTree> FinalPaths<'a, 't, T> {
    pub fn new(transform: &'a TreeTransform<'t, T>) -> Self {
        Self {
            transform,
            known: BTreeMap::new(),
        }
    }

    /// The final path of `trans_id`. The root (and its parent) is `""`.
    ///
    /// # Errors
    /// Returns `NoFinalPath` / `NotInTree` when some ancestor has no known
    /// name or parent. Parent loops are not detected here; run conflict
    /// detection first.
    pub fn get_path(&mut self, trans_id: TransId) -> Result<String, TransformError> {
        if trans_id.is_root_parent() || trans_id == self.transform.root() {
            return Ok(String::new());
        }
        if let Some(path) = self.known.get(&trans_id) {
            return Ok(path.clone());
        }
        // Walk up to the first ancestor with a known path, then fill down.
        let mut chain = vec![trans_id];
        let mut cursor = self.transform.final_parent(trans_id)?;
        let mut base = loop {
            if cursor.is_root_parent() || cursor == self.transform.root() {
                break String::new();
            }
            if let Some(path) = self.known.get(&cursor) {
                break path.clone();
            }
            if chain.contains(&cursor) {
                return Err(TransformError::NoFinalPath { trans_id });
            }
            chain.push(cursor);
            cursor = self.transform.final_parent(cursor)?;
        };
        for &id in chain.iter().rev() {
            base = join_path(&base, self.transform.final_name(id)?);
            self.known.insert(id, base.clone());
        }
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    #[test]
    fn final_paths_follow_scheduled_moves() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = WorkingTree::init(dir.path()).unwrap();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let a = tt.trans_id_tree_path("a");
        let ab = tt.trans_id_tree_path("a/b");
        let fresh = tt.create_path("c", ab).unwrap();
        let target = tt.create_path("z", root).unwrap();
        tt.adjust_path("a2", target, a).unwrap();

        let mut paths = FinalPaths::new(&tt);
        assert_eq!(paths.get_path(root).unwrap(), "");
        assert_eq!(paths.get_path(fresh).unwrap(), "z/a2/b/c");
        assert_eq!(paths.get_path(ab).unwrap(), "z/a2/b");
        assert_eq!(paths.get_path(target).unwrap(), "z");
    }

    #[test]
    fn loops_have_no_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = WorkingTree::init(dir.path()).unwrap();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let a = tt.trans_id_tree_path("a");
        let ab = tt.trans_id_tree_path("a/b");
        tt.adjust_path("a", ab, a).unwrap();
        let mut paths = FinalPaths::new(&tt);
        assert!(paths.get_path(ab).is_err());
    }
}
