//! Comparing a transform's final state with the tree as it is now.

use std::collections::BTreeSet;

use super::{FinalPaths, Kind, TransId, TransformError, TreeTransform};
use crate::tree::MutableTree;

/// One entry's change between the current tree and the transform's result.
///
/// Pairs are `(before, after)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeChange {
    pub trans_id: TransId,
    pub path: (Option<String>, Option<String>),
    /// Content differs: kind changed, or a file/symlink got new contents.
    pub changed_content: bool,
    pub versioned: (bool, bool),
    pub parent: (Option<TransId>, Option<TransId>),
    pub name: (Option<String>, Option<String>),
    pub kind: (Option<Kind>, Option<Kind>),
    /// Only meaningful for files; `None` for other kinds.
    pub executable: (Option<bool>, Option<bool>),
}

impl TreeChange {
    /// Whether the entry is newly versioned.
    #[must_use]
    pub const fn is_added(&self) -> bool {
        !self.versioned.0 && self.versioned.1
    }

    /// Whether the entry stops being versioned.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.versioned.0 && !self.versioned.1
    }

    /// Whether the entry ends up at a different path.
    #[must_use]
    pub fn is_renamed(&self) -> bool {
        self.versioned.0 && self.versioned.1 && self.path.0 != self.path.1
    }
}

impl<T: MutableTree> TreeTransform<'_, T> {
    /// Changes to versioned entries, sorted by (old path, new path) with
    /// missing paths sorting as `""`.
    ///
    /// Entries unversioned both before and after are not reported. Results
    /// are only meaningful for a transform without conflicts.
    ///
    /// # Errors
    /// Returns `NoFinalPath` if an entry's final path cannot be computed.
    pub fn iter_changes(&self) -> Result<Vec<TreeChange>, TransformError> {
        let mut final_paths = FinalPaths::new(self);
        let mut ids: BTreeSet<TransId> = self.tree_id_paths.keys().copied().collect();
        ids.extend(self.new_name.keys());
        ids.extend(self.new_versioned.iter());
        ids.remove(&self.root);

        let mut changes = Vec::new();
        for id in ids {
            let from_versioned = self.tree_is_versioned(id);
            let to_versioned = self.final_is_versioned(id);
            if !from_versioned && !to_versioned {
                continue;
            }
            let from_path = if from_versioned {
                self.tree_id_paths.get(&id).cloned()
            } else {
                None
            };
            let to_path = if to_versioned {
                Some(final_paths.get_path(id)?)
            } else {
                None
            };

            let (from_name, from_parent, from_kind, from_executable) = if from_versioned {
                let kind = self.tree_kind(id);
                let executable = (kind == Some(Kind::File)).then(|| {
                    from_path
                        .as_deref()
                        .and_then(|p| self.tree.entry(p))
                        .is_some_and(|e| e.executable)
                });
                (
                    self.tree_id_paths.get(&id).map(|p| base_name(p).to_owned()),
                    self.get_tree_parent(id).ok(),
                    kind,
                    executable,
                )
            } else {
                (None, None, None, None)
            };

            let to_kind = self.final_kind(id);
            let to_executable = (to_kind == Some(Kind::File)).then(|| self.final_is_executable(id));
            let to_name = self.final_name(id).ok().map(str::to_owned);
            let to_parent = self.final_parent(id).ok();

            let changed_content = if from_kind == to_kind {
                to_kind.is_some_and(Kind::has_text) && self.new_contents.contains_key(&id)
            } else {
                true
            };
            if !changed_content
                && from_versioned == to_versioned
                && from_parent == to_parent
                && from_name == to_name
                && from_executable == to_executable
            {
                continue;
            }
            changes.push(TreeChange {
                trans_id: id,
                path: (from_path, to_path),
                changed_content,
                versioned: (from_versioned, to_versioned),
                parent: (from_parent, to_parent),
                name: (from_name, to_name),
                kind: (from_kind, to_kind),
                executable: (from_executable, to_executable),
            });
        }
        changes.sort_by(|a, b| {
            let key = |c: &TreeChange| {
                (
                    c.path.0.clone().unwrap_or_default(),
                    c.path.1.clone().unwrap_or_default(),
                )
            };
            key(a).cmp(&key(b))
        });
        Ok(changes)
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    fn tree_with(files: &[&str], dirs: &[&str]) -> (tempfile::TempDir, WorkingTree) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = WorkingTree::init(dir.path()).unwrap();
        for d in dirs {
            std::fs::create_dir(dir.path().join(d)).unwrap();
            tree.add(d).unwrap();
        }
        for f in files {
            std::fs::write(dir.path().join(f), format!("{f}\n")).unwrap();
            tree.add(f).unwrap();
        }
        (dir, tree)
    }

    #[test]
    fn empty_transform_has_no_changes() {
        let (_dir, mut tree) = tree_with(&["a"], &["d"]);
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        tt.trans_id_tree_path("a");
        tt.trans_id_tree_path("d");
        assert!(tt.iter_changes().unwrap().is_empty());
    }

    #[test]
    fn reports_add_rename_remove_and_modify_sorted() {
        let (_dir, mut tree) = tree_with(&["edit", "old", "zap"], &[]);
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let edit = tt.trans_id_tree_path("edit");
        tt.delete_contents(edit).unwrap();
        tt.create_file(b"edited\n", edit, None).unwrap();
        let old = tt.trans_id_tree_path("old");
        tt.adjust_path("new", root, old).unwrap();
        let zap = tt.trans_id_tree_path("zap");
        tt.delete_versioned(zap).unwrap();
        let added = tt.new_file("added", root, b"+\n", None).unwrap();

        let changes = tt.iter_changes().unwrap();
        let paths: Vec<_> = changes.iter().map(|c| c.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                (None, Some("added".to_owned())),
                (Some("edit".to_owned()), Some("edit".to_owned())),
                (Some("old".to_owned()), Some("new".to_owned())),
                (Some("zap".to_owned()), None),
            ]
        );
        assert_eq!(changes[0].trans_id, added);
        assert!(changes[0].is_added());
        assert!(changes[1].changed_content);
        assert!(!changes[2].changed_content);
        assert!(changes[2].is_renamed());
        assert!(changes[3].is_removed());
        assert_eq!(changes[3].kind, (Some(Kind::File), None));
    }

    #[test]
    fn executability_change_is_reported() {
        let (_dir, mut tree) = tree_with(&["run"], &[]);
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let run = tt.trans_id_tree_path("run");
        tt.set_executability(Some(true), run).unwrap();
        let changes = tt.iter_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].executable, (Some(false), Some(true)));
        assert!(!changes[0].changed_content);
    }

    #[test]
    fn children_of_moved_directories_are_not_reported() {
        let (_dir, mut tree) = tree_with(&["d/f"], &["d"]);
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let d = tt.trans_id_tree_path("d");
        tt.trans_id_tree_path("d/f");
        tt.adjust_path("e", root, d).unwrap();
        let changes = tt.iter_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, (Some("d".to_owned()), Some("e".to_owned())));
    }
}
