//! Two-phase apply.
//!
//! 1. Removal: tree paths in reverse sorted order (children first). Deleted
//!    entries are parked in pending-deletion; moved entries go to limbo.
//! 2. Insertion: final paths in sorted order (parents first). Entries staged
//!    at flat limbo paths are renamed into place; executability is set.
//! 3. Index: the delta, observed content hashes included, is written in one
//!    atomic step.
//!
//! Renames and mode changes go through the [`Mover`] journal. Any failure up
//! to and including the index write rolls the journal back before the error
//! is returned, so disk and index are left as they were. Parked deletions
//! are removed only after the index is written; a failure there leaves the
//! transform applied and the leftovers in pending-deletion.

use std::collections::BTreeSet;
use std::path::Path;

use super::{
    FileMover, FinalPaths, Kind, Mover, Phase, TransId, TransformError, TreeTransform, fp_transform,
};
use crate::failpoints::{
    FP_TRANSFORM_AFTER_REMOVALS, FP_TRANSFORM_BEFORE_INDEX_UPDATE, FP_TRANSFORM_INSERTION,
};
use crate::tree::{IndexChange, IndexEntry, MutableTree};

/// Options for [`TreeTransform::apply`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Skip conflict detection. The caller asserts the transform is clean.
    pub no_conflicts: bool,
}

/// What an apply did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformResults {
    /// Final paths of every entry that received new contents, sorted.
    pub modified_paths: Vec<String>,
    /// Number of renames performed between the tree and limbo.
    pub rename_count: usize,
}

impl<T: MutableTree> TreeTransform<'_, T> {
    /// Apply the transform to the tree, then finalize it.
    ///
    /// # Errors
    /// Returns `Malformed` (before touching disk) if conflicts exist, or the
    /// first filesystem error after rolling every rename back.
    pub fn apply(&mut self, options: ApplyOptions) -> Result<TransformResults, TransformError> {
        self.apply_with_mover(options, &mut FileMover::new())
    }

    /// [`apply`](Self::apply) with a caller-supplied [`Mover`].
    ///
    /// # Errors
    /// As for [`apply`](Self::apply).
    pub fn apply_with_mover(
        &mut self,
        options: ApplyOptions,
        mover: &mut dyn Mover,
    ) -> Result<TransformResults, TransformError> {
        self.ensure_building()?;
        let _span = tracing::info_span!("apply", no_conflicts = options.no_conflicts).entered();
        if !options.no_conflicts {
            self.check_malformed()?;
        }
        self.register_versioned_descendants();
        let delta = self.generate_index_delta()?;
        let modified_paths = self.modified_paths()?;

        let mut rename_count = 0;
        let committed = self
            .apply_renames(mover, &mut rename_count)
            .and_then(|()| self.tree.apply_index_delta(&delta).map_err(TransformError::from));
        if let Err(e) = committed {
            tracing::warn!(error = %e, "apply failed, rolling back");
            self.phase = Phase::Finalized;
            match mover.rollback() {
                Ok(()) => {
                    if let Err(cleanup) = self.finalize() {
                        tracing::warn!(error = %cleanup, "cleanup after rollback failed");
                    }
                }
                Err(rollback) => {
                    // Limbo may hold tree content now; leave it for recovery.
                    tracing::error!(error = %rollback, "rollback failed, limbo left in place");
                    self.limbo.closed = true;
                }
            }
            return Err(e);
        }
        tracing::debug!(rename_count, rows = delta.len(), "renames and index committed");
        self.phase = Phase::Applied;
        // Staged content now lives in the tree.
        self.limbo.files.clear();
        self.new_contents.clear();

        let deleted = mover.apply_deletions();
        if let Err(e) = &deleted {
            tracing::warn!(error = %e, "removing parked deletions failed");
        }
        let finalized = self.finalize();
        deleted?;
        finalized?;
        Ok(TransformResults {
            modified_paths,
            rename_count,
        })
    }

    fn apply_renames(
        &mut self,
        mover: &mut dyn Mover,
        rename_count: &mut usize,
    ) -> Result<(), TransformError> {
        self.apply_removals(mover, rename_count)?;
        fp_transform(FP_TRANSFORM_AFTER_REMOVALS)?;
        self.apply_insertions(mover, rename_count)?;
        fp_transform(FP_TRANSFORM_BEFORE_INDEX_UPDATE)
    }

    fn apply_removals(
        &mut self,
        mover: &mut dyn Mover,
        rename_count: &mut usize,
    ) -> Result<(), TransformError> {
        let tree_paths: Vec<(String, TransId)> = self
            .tree_path_ids
            .iter()
            .rev()
            .map(|(path, &id)| (path.clone(), id))
            .collect();
        for (path, trans_id) in tree_paths {
            // The root never moves.
            if path.is_empty() {
                continue;
            }
            let full_path = self.tree.abspath(&path);
            if self.removed_contents.contains(&trans_id) {
                let parked = self.deletion_dir.join(trans_id.to_string());
                mover.pre_delete(&full_path, &parked)?;
            } else if self.path_changed(trans_id) {
                let limbo_path = self.limbo_name(trans_id);
                match mover.rename(&full_path, &limbo_path) {
                    Ok(()) => *rename_count += 1,
                    Err(TransformError::RenameFailed { source, .. })
                        if source.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn apply_insertions(
        &mut self,
        mover: &mut dyn Mover,
        rename_count: &mut usize,
    ) -> Result<(), TransformError> {
        let new_paths = self.new_paths(true)?;
        for (path, trans_id) in &new_paths {
            let full_path = self.tree.abspath(path);
            if self.limbo.needs_rename.contains(trans_id) {
                fp_transform(FP_TRANSFORM_INSERTION)?;
                let limbo_path = self.limbo_name(*trans_id);
                match mover.rename(&limbo_path, &full_path) {
                    Ok(()) => *rename_count += 1,
                    // A versioned entry with no contents has nothing to move.
                    Err(TransformError::RenameFailed { source, .. })
                        if source.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
            if let Some(&executable) = self.new_executability.get(trans_id) {
                self.set_executable_bits(mover, &full_path, executable)?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn set_executable_bits(
        &self,
        mover: &mut dyn Mover,
        path: &Path,
        executable: bool,
    ) -> Result<(), TransformError> {
        use std::os::unix::fs::PermissionsExt as _;

        if !self.tree.supports_executable() {
            return Ok(());
        }
        let mode = std::fs::metadata(path)
            .map_err(super::io_err(path))?
            .permissions()
            .mode();
        let to_mode = if executable {
            // Others and group gain execute only if they can read.
            let mut m = mode | 0o100;
            if mode & 0o004 != 0 {
                m |= 0o001;
            }
            if mode & 0o040 != 0 {
                m |= 0o010;
            }
            m
        } else {
            mode & !0o111
        };
        mover.set_mode(path, to_mode)
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn set_executable_bits(
        &self,
        _mover: &mut dyn Mover,
        _path: &Path,
        _executable: bool,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    /// Final paths of new and changed entries, sorted by path.
    ///
    /// With `filesystem_only`, only entries that need their own rename out
    /// of limbo or an executable-bit change are listed.
    ///
    /// # Errors
    /// Returns `NoFinalPath` if an entry's path cannot be computed.
    pub fn new_paths(&self, filesystem_only: bool) -> Result<Vec<(String, TransId)>, TransformError> {
        let mut ids: BTreeSet<TransId> = BTreeSet::new();
        if filesystem_only {
            ids.extend(self.limbo.needs_rename.iter().copied().filter(|id| {
                self.new_name.contains_key(id)
                    || self.new_parent.contains_key(id)
                    || self.new_contents.contains_key(id)
                    || self.new_versioned.contains(id)
            }));
        } else {
            ids.extend(self.new_name.keys());
            ids.extend(self.new_parent.keys());
            ids.extend(self.new_contents.keys());
            ids.extend(self.new_versioned.iter());
        }
        ids.extend(self.new_executability.keys());
        let mut final_paths = FinalPaths::new(self);
        let mut out = ids
            .into_iter()
            .map(|id| Ok((final_paths.get_path(id)?, id)))
            .collect::<Result<Vec<_>, TransformError>>()?;
        out.sort();
        Ok(out)
    }

    fn modified_paths(&self) -> Result<Vec<String>, TransformError> {
        let mut final_paths = FinalPaths::new(self);
        let mut out = self
            .new_contents
            .keys()
            .map(|&id| final_paths.get_path(id))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort();
        Ok(out)
    }

    /// Whether anything about `trans_id` itself is scheduled to change.
    fn touched(&self, trans_id: TransId) -> bool {
        self.path_changed(trans_id)
            || self.new_contents.contains_key(&trans_id)
            || self.removed_contents.contains(&trans_id)
            || self.new_executability.contains_key(&trans_id)
            || self.new_reference.contains_key(&trans_id)
            || self.new_versioned.contains(&trans_id)
            || self.removed_versioned.contains(&trans_id)
    }

    /// The index changes apply will make, computed from the pre-apply tree.
    ///
    /// The index is keyed by path, so versioned descendants of a moved
    /// directory appear as remove-and-add rows too.
    ///
    /// # Errors
    /// Returns `NoFinalPath` if an entry's path cannot be computed.
    pub fn generate_index_delta(&self) -> Result<Vec<IndexChange>, TransformError> {
        let mut final_paths = FinalPaths::new(self);
        let mut ids: BTreeSet<TransId> = self.tree_id_paths.keys().copied().collect();
        ids.extend(self.new_name.keys());
        ids.extend(self.new_versioned.iter());
        ids.remove(&self.root);

        let mut delta = Vec::new();
        for id in ids {
            let old_path = self
                .tree_id_paths
                .get(&id)
                .filter(|p| self.tree.is_versioned(p))
                .cloned();
            let new_path = if self.final_is_versioned(id) {
                Some(final_paths.get_path(id)?)
            } else {
                None
            };
            if old_path.is_none() && new_path.is_none() {
                continue;
            }
            if old_path == new_path && !self.touched(id) {
                continue;
            }
            let old_entry = old_path.as_deref().and_then(|p| self.tree.entry(p));
            let entry = new_path
                .as_ref()
                .map(|_| self.final_entry(id, old_entry.as_ref()));
            if old_path == new_path && old_entry == entry {
                continue;
            }
            delta.push(IndexChange {
                old_path,
                new_path,
                entry,
            });
        }
        tracing::debug!(rows = delta.len(), "computed index delta");
        Ok(delta)
    }

    fn final_entry(&self, trans_id: TransId, old: Option<&IndexEntry>) -> IndexEntry {
        let new_contents = self.new_contents.contains_key(&trans_id);
        let kind = match (self.final_kind(trans_id), old) {
            _ if self.new_reference.contains_key(&trans_id) => Kind::TreeReference,
            (Some(Kind::Directory), Some(e)) if e.kind == Kind::TreeReference && !new_contents => {
                Kind::TreeReference
            }
            (Some(k), _) => k,
            (None, Some(e)) => e.kind,
            (None, None) => Kind::File,
        };
        let reference = if kind == Kind::TreeReference {
            self.new_reference
                .get(&trans_id)
                .cloned()
                .or_else(|| old.and_then(|e| e.reference.clone()))
        } else {
            None
        };
        let content_hash = if new_contents {
            self.observed_hashes.get(&trans_id).cloned()
        } else {
            old.and_then(|e| e.content_hash.clone())
        };
        IndexEntry {
            kind,
            executable: kind == Kind::File && self.final_is_executable(trans_id),
            reference,
            content_hash,
        }
    }
}
