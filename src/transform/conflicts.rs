//! Structural validation of a transform.
//!
//! Every check reads only the transform's final state and the tree as it is
//! now, so all conflicts are found before anything on disk moves. Checks
//! collect every problem rather than stopping at the first.

use std::collections::{BTreeMap, BTreeSet};

use super::{Conflict, Kind, ROOT_PARENT, TransId, TransformError, TreeTransform};
use crate::tree::MutableTree;

type ByParent = BTreeMap<TransId, BTreeSet<TransId>>;

impl<T: MutableTree> TreeTransform<'_, T> {
    /// Find every structural conflict, sorted.
    ///
    /// Registers the on-disk children of every affected directory first, so
    /// untouched siblings take part in duplicate and parent checks.
    ///
    /// # Errors
    /// Returns an I/O error if a directory cannot be listed.
    pub fn find_raw_conflicts(&mut self) -> Result<Vec<Conflict>, TransformError> {
        self.add_tree_children()?;
        let by_parent = self.by_parent();
        let mut conflicts = Vec::new();
        self.unversioned_parents(&by_parent, &mut conflicts);
        self.parent_loops(&mut conflicts);
        self.duplicate_entries(&by_parent, &mut conflicts);
        self.parent_type_conflicts(&by_parent, &mut conflicts);
        self.improper_versioning(&mut conflicts);
        self.executability_conflicts(&mut conflicts);
        self.overwrite_conflicts(&mut conflicts);
        conflicts.sort();
        conflicts.dedup();
        tracing::debug!(count = conflicts.len(), "found conflicts");
        Ok(conflicts)
    }

    /// Fail with `Malformed` if any conflict exists.
    ///
    /// # Errors
    /// Returns `Malformed` listing every conflict, or an I/O error.
    pub fn check_malformed(&mut self) -> Result<(), TransformError> {
        let conflicts = self.find_raw_conflicts()?;
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(TransformError::Malformed { conflicts })
        }
    }

    /// Register the tree children of parents that gain or lose entries and
    /// of directories being deleted or unversioned.
    fn add_tree_children(&mut self) -> Result<(), TransformError> {
        let mut parents: BTreeSet<TransId> = self.by_parent().into_keys().collect();
        parents.extend(
            self.removed_contents
                .iter()
                .copied()
                .filter(|&t| self.tree_kind(t) == Some(Kind::Directory)),
        );
        for &t in &self.removed_versioned {
            let stored_dir = self
                .tree_id_paths
                .get(&t)
                .and_then(|p| self.tree.entry(p))
                .map(|e| e.kind == Kind::Directory);
            let is_dir = stored_dir.unwrap_or_else(|| self.tree_kind(t) == Some(Kind::Directory));
            if is_dir {
                parents.insert(t);
            }
        }
        for parent in parents {
            self.iter_tree_children(parent)?;
        }
        Ok(())
    }

    fn unversioned_parents(&self, by_parent: &ByParent, out: &mut Vec<Conflict>) {
        for (&parent, children) in by_parent {
            if parent == ROOT_PARENT || self.final_is_versioned(parent) {
                continue;
            }
            if children.iter().any(|&c| self.final_is_versioned(c)) {
                out.push(Conflict::UnversionedParent { parent });
            }
        }
    }

    fn parent_loops(&self, out: &mut Vec<Conflict>) {
        for &trans_id in self.new_parent.keys() {
            let mut seen = BTreeSet::new();
            let mut parent = trans_id;
            while parent != ROOT_PARENT {
                seen.insert(parent);
                let Ok(next) = self.final_parent(parent) else {
                    break;
                };
                parent = next;
                if parent == trans_id {
                    out.push(Conflict::ParentLoop { trans_id });
                }
                if seen.contains(&parent) {
                    break;
                }
            }
        }
    }

    fn duplicate_entries(&self, by_parent: &ByParent, out: &mut Vec<Conflict>) {
        if self.new_name.is_empty() && self.new_parent.is_empty() {
            return;
        }
        for children in by_parent.values() {
            let mut name_ids: Vec<(String, TransId)> = children
                .iter()
                .filter_map(|&c| {
                    let name = self.final_name(c).ok()?;
                    let name = if self.case_sensitive {
                        name.to_owned()
                    } else {
                        name.to_lowercase()
                    };
                    Some((name, c))
                })
                .collect();
            name_ids.sort();
            let mut last: Option<(String, TransId)> = None;
            for (name, trans_id) in name_ids {
                // Entries that will be gone entirely do not occupy a name.
                if self.final_kind(trans_id).is_none() && !self.final_is_versioned(trans_id) {
                    continue;
                }
                if let Some((last_name, last_id)) = &last
                    && *last_name == name
                {
                    out.push(Conflict::Duplicate {
                        name: name.clone(),
                        existing: *last_id,
                        new: trans_id,
                    });
                }
                last = Some((name, trans_id));
            }
        }
    }

    fn parent_type_conflicts(&self, by_parent: &ByParent, out: &mut Vec<Conflict>) {
        for (&parent, children) in by_parent {
            if parent == ROOT_PARENT {
                continue;
            }
            if children.iter().all(|&c| self.final_kind(c).is_none()) {
                continue;
            }
            match self.final_kind(parent) {
                None => out.push(Conflict::MissingParent { parent }),
                Some(Kind::Directory | Kind::TreeReference) => {}
                Some(_) => out.push(Conflict::NonDirectoryParent { parent }),
            }
        }
    }

    fn improper_versioning(&self, out: &mut Vec<Conflict>) {
        for &trans_id in &self.new_versioned {
            let kind = self.final_kind(trans_id);
            if kind == Some(Kind::Symlink) && !self.symlinks_supported {
                continue;
            }
            match kind {
                None => out.push(Conflict::VersioningNoContents { trans_id }),
                Some(k) if !self.tree.versionable_kind(k) => {
                    out.push(Conflict::VersioningBadKind { trans_id });
                }
                Some(_) => {}
            }
        }
    }

    fn executability_conflicts(&self, out: &mut Vec<Conflict>) {
        for &trans_id in self.new_executability.keys() {
            if !self.final_is_versioned(trans_id) {
                out.push(Conflict::UnversionedExecutability { trans_id });
            } else if self.final_kind(trans_id) != Some(Kind::File) {
                out.push(Conflict::NonFileExecutability { trans_id });
            }
        }
    }

    fn overwrite_conflicts(&self, out: &mut Vec<Conflict>) {
        for &trans_id in self.new_contents.keys() {
            if self.tree_kind(trans_id).is_none() || self.removed_contents.contains(&trans_id) {
                continue;
            }
            let name = self.final_name(trans_id).unwrap_or_default().to_owned();
            out.push(Conflict::Overwrite { name, trans_id });
        }
    }
}
