//! Automatic conflict resolution.
//!
//! Each pass finds the current conflicts and applies a fix for every kind
//! that has one. Fixes can expose new conflicts (a renamed backup may
//! collide again), so passes repeat until the transform is clean or the
//! configured pass budget runs out.

use std::fmt;

use super::{Conflict, TransId, TransformError, TreeTransform, join_path};
use crate::config::OrphanPolicy;
use crate::tree::MutableTree;

/// Directory at the tree root that receives orphans under
/// [`OrphanPolicy::Move`].
pub const ORPHAN_DIR: &str = "bramble-orphans";

/// What conflict resolution did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Renamed the untouched entry of a duplicate pair out of the way.
    MovedExisting {
        existing: TransId,
        new: TransId,
        new_name: String,
    },
    /// Broke a parent loop by putting `trans_id` back under its tree parent.
    CancelledMove { trans_id: TransId, parent: TransId },
    /// Kept a directory scheduled for deletion because it holds entries
    /// that cannot be orphaned.
    NotDeleting { trans_id: TransId },
    /// Moved an unversioned entry out of a deleted directory.
    Orphaned { trans_id: TransId, name: String },
    /// Created a missing parent directory.
    CreatedDirectory { trans_id: TransId },
    /// Versioned an unversioned parent directory.
    VersionedDirectory { trans_id: TransId },
    /// Replaced a non-directory parent with a new `<name>.new` directory.
    CreatedReplacementDirectory {
        old_parent: TransId,
        new_parent: TransId,
    },
    /// Stopped versioning an entry that has no contents.
    CancelledVersioning { trans_id: TransId },
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MovedExisting { new_name, .. } => {
                write!(f, "duplicate: moved existing file to {new_name}")
            }
            Self::CancelledMove { trans_id, .. } => {
                write!(f, "parent loop: cancelled move of {trans_id}")
            }
            Self::NotDeleting { trans_id } => write!(f, "deleting parent: not deleting {trans_id}"),
            Self::Orphaned { name, .. } => write!(f, "orphaned {name} in {ORPHAN_DIR}"),
            Self::CreatedDirectory { trans_id } => {
                write!(f, "missing parent: created directory {trans_id}")
            }
            Self::VersionedDirectory { trans_id } => {
                write!(f, "unversioned parent: versioned directory {trans_id}")
            }
            Self::CreatedReplacementDirectory { new_parent, .. } => {
                write!(f, "non-directory parent: created directory {new_parent}")
            }
            Self::CancelledVersioning { trans_id } => {
                write!(f, "versioning no contents: cancelled versioning of {trans_id}")
            }
        }
    }
}

/// Fix conflicts until none remain.
///
/// # Errors
/// Returns `Malformed` with the remaining conflicts if the pass budget runs
/// out, or any error raised while applying a fix.
pub fn resolve_conflicts<T: MutableTree>(
    tt: &mut TreeTransform<'_, T>,
) -> Result<Vec<Resolution>, TransformError> {
    let _span = tracing::info_span!("resolve_conflicts", passes = tt.resolution_passes).entered();
    let mut resolutions = Vec::new();
    let mut conflicts = Vec::new();
    for pass in 0..tt.resolution_passes {
        conflicts = tt.find_raw_conflicts()?;
        if conflicts.is_empty() {
            tracing::debug!(pass, resolved = resolutions.len(), "transform is clean");
            return Ok(resolutions);
        }
        for resolution in conflict_pass(tt, &conflicts)? {
            if !resolutions.contains(&resolution) {
                resolutions.push(resolution);
            }
        }
    }
    Err(TransformError::Malformed { conflicts })
}

/// Apply one round of fixes for `conflicts`.
///
/// Kinds with no automatic fix (overwrite, executability, bad kind) are
/// left for the caller.
///
/// # Errors
/// Returns any error raised while editing the transform.
pub fn conflict_pass<T: MutableTree>(
    tt: &mut TreeTransform<'_, T>,
    conflicts: &[Conflict],
) -> Result<Vec<Resolution>, TransformError> {
    let mut out = Vec::new();
    for conflict in conflicts {
        match conflict {
            Conflict::Duplicate { existing, new, .. } => {
                // Whichever side was moved here keeps the name.
                let (existing, new) = if tt.path_changed(*existing) {
                    (*new, *existing)
                } else {
                    (*existing, *new)
                };
                let parent = tt.final_parent(existing)?;
                let new_name = format!("{}.moved", tt.final_name(existing)?);
                tt.adjust_path(&new_name, parent, existing)?;
                out.push(Resolution::MovedExisting {
                    existing,
                    new,
                    new_name,
                });
            }
            Conflict::ParentLoop { trans_id } => {
                let mut cur = *trans_id;
                while !tt.path_changed(cur) {
                    cur = tt.final_parent(cur)?;
                }
                let parent = tt.get_tree_parent(cur).unwrap_or_else(|_| tt.root());
                let name = tt.final_name(cur)?.to_owned();
                tt.adjust_path(&name, parent, cur)?;
                out.push(Resolution::CancelledMove {
                    trans_id: cur,
                    parent,
                });
            }
            Conflict::MissingParent { parent } => {
                resolve_missing_parent(tt, *parent, &mut out)?;
            }
            Conflict::UnversionedParent { parent } => {
                tt.version_file(*parent)?;
                out.push(Resolution::VersionedDirectory { trans_id: *parent });
            }
            Conflict::NonDirectoryParent { parent } => {
                let grandparent = tt.final_parent(*parent)?;
                let name = format!("{}.new", tt.final_name(*parent)?);
                let replacement = tt.create_path(&name, grandparent)?;
                tt.create_directory(replacement)?;
                let versioned = tt.final_is_versioned(*parent);
                if versioned {
                    tt.version_file(replacement)?;
                }
                let children: Vec<TransId> = tt
                    .by_parent()
                    .get(parent)
                    .map(|c| c.iter().copied().collect())
                    .unwrap_or_default();
                for child in children {
                    let child_name = tt.final_name(child)?.to_owned();
                    tt.adjust_path(&child_name, replacement, child)?;
                }
                if versioned {
                    tt.unversion_file(*parent)?;
                }
                out.push(Resolution::CreatedReplacementDirectory {
                    old_parent: *parent,
                    new_parent: replacement,
                });
            }
            Conflict::VersioningNoContents { trans_id } => {
                tt.cancel_versioning(*trans_id)?;
                out.push(Resolution::CancelledVersioning {
                    trans_id: *trans_id,
                });
            }
            Conflict::VersioningBadKind { .. }
            | Conflict::UnversionedExecutability { .. }
            | Conflict::NonFileExecutability { .. }
            | Conflict::Overwrite { .. } => {}
        }
    }
    Ok(out)
}

fn resolve_missing_parent<T: MutableTree>(
    tt: &mut TreeTransform<'_, T>,
    parent: TransId,
    out: &mut Vec<Resolution>,
) -> Result<(), TransformError> {
    if !tt.removed_contents.contains(&parent) {
        // Nothing to create when the parent has no name at all.
        if tt.final_name(parent).is_ok() {
            tt.create_directory(parent)?;
            out.push(Resolution::CreatedDirectory { trans_id: parent });
        }
        return Ok(());
    }
    let keep = match (tt.potential_orphans(parent), tt.orphan_policy) {
        (Some(orphans), OrphanPolicy::Move) => {
            for orphan in orphans {
                let name = tt.move_orphan(orphan, parent)?;
                out.push(Resolution::Orphaned {
                    trans_id: orphan,
                    name,
                });
            }
            false
        }
        // Versioned children, or orphaning refused.
        _ => true,
    };
    if keep {
        tt.cancel_deletion(parent)?;
        out.push(Resolution::NotDeleting { trans_id: parent });
    }
    Ok(())
}

impl<T: MutableTree> TreeTransform<'_, T> {
    /// Unversioned live children of `dir`, or `None` when a versioned child
    /// means the directory must stay.
    fn potential_orphans(&self, dir: TransId) -> Option<Vec<TransId>> {
        let by_parent = self.by_parent();
        let mut orphans = Vec::new();
        for &child in by_parent.get(&dir).into_iter().flatten() {
            if self.removed_contents.contains(&child) {
                continue;
            }
            if self.final_is_versioned(child) {
                return None;
            }
            orphans.push(child);
        }
        Some(orphans)
    }

    /// Move `orphan` into [`ORPHAN_DIR`] under a free name. Returns the
    /// orphan's original path.
    fn move_orphan(&mut self, orphan: TransId, parent: TransId) -> Result<String, TransformError> {
        let orphan_dir = self.trans_id_tree_path(ORPHAN_DIR);
        if self.final_kind(orphan_dir).is_none() {
            self.create_directory(orphan_dir)?;
        }
        let actual_name = self.final_name(orphan)?.to_owned();
        let new_name = self.available_backup_name(&actual_name, orphan_dir);
        self.adjust_path(&new_name, orphan_dir, orphan)?;
        let parent_path = self.tree_id_paths.get(&parent).cloned().unwrap_or_default();
        let original = join_path(&parent_path, &actual_name);
        tracing::warn!(path = %original, dir = ORPHAN_DIR, "orphaned unversioned entry");
        Ok(original)
    }

    /// `name`, or the first free `name.~N~`, under `target`.
    pub(crate) fn available_backup_name(&self, name: &str, target: TransId) -> String {
        if !self.has_named_child(name, target) {
            return name.to_owned();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{name}.~{n}~");
            if !self.has_named_child(&candidate, target) {
                return candidate;
            }
            n += 1;
        }
    }

    fn has_named_child(&self, name: &str, parent: TransId) -> bool {
        let by_parent = self.by_parent();
        if by_parent
            .get(&parent)
            .into_iter()
            .flatten()
            .any(|&c| self.final_name(c).is_ok_and(|n| n == name) && self.final_kind(c).is_some())
        {
            return true;
        }
        // Untracked entries on disk occupy names too. A registered one that
        // was moved or deleted has already been accounted for above.
        let Some(parent_path) = self.tree_id_paths.get(&parent) else {
            return false;
        };
        let child = join_path(parent_path, name);
        !self.tree_path_ids.contains_key(&child)
            && std::fs::symlink_metadata(self.tree.abspath(&child)).is_ok()
    }
}
