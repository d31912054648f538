//! Staging new content in the limbo directory.
//!
//! New files, directories and symlinks are created under
//! `.bramble/limbo/` before `apply` moves them into place. A child of a
//! new directory is created directly inside its parent's limbo directory
//! when its name is free there, so whole new subtrees move into the tree
//! with a single rename. Everything else gets a flat `limbo/<trans-id>`
//! path and is recorded as needing its own rename.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest as _, Sha256};

use super::{FinalPaths, Kind, Phase, TransId, TransformError, TreeTransform, io_err};
use crate::tree::MutableTree;

/// Limbo bookkeeping for one transform.
#[derive(Debug)]
pub(crate) struct Limbo {
    pub(crate) dir: PathBuf,
    /// Current limbo path of every staged id.
    pub(crate) files: BTreeMap<TransId, PathBuf>,
    /// Paths that may still hold content after a failed or skipped rename.
    pub(crate) possibly_stale: BTreeSet<PathBuf>,
    /// Ids staged directly inside a parent's limbo directory.
    pub(crate) children: BTreeMap<TransId, BTreeSet<TransId>>,
    pub(crate) children_names: BTreeMap<TransId, BTreeMap<String, TransId>>,
    /// Ids staged at a flat `limbo/<trans-id>` path.
    pub(crate) needs_rename: BTreeSet<TransId>,
    /// Shared mtime stamped on every new file, set by the first creation.
    pub(crate) creation_mtime: Option<SystemTime>,
    pub(crate) closed: bool,
}

impl Limbo {
    pub(crate) const fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: BTreeMap::new(),
            possibly_stale: BTreeSet::new(),
            children: BTreeMap::new(),
            children_names: BTreeMap::new(),
            needs_rename: BTreeSet::new(),
            creation_mtime: None,
            closed: false,
        }
    }
}

/// Hex SHA-256 of `data`.
pub(crate) fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Remove a file, symlink or empty directory.
pub(crate) fn delete_any(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    }
}

impl<T: MutableTree> TreeTransform<'_, T> {
    /// The limbo path for `trans_id`, assigning one on first use.
    pub(crate) fn limbo_name(&mut self, trans_id: TransId) -> PathBuf {
        if let Some(path) = self.limbo.files.get(&trans_id) {
            return path.clone();
        }
        let path = self.generate_limbo_path(trans_id);
        self.limbo.files.insert(trans_id, path.clone());
        path
    }

    fn generate_limbo_path(&mut self, trans_id: TransId) -> PathBuf {
        if let (Some(&parent), Some(filename)) =
            (self.new_parent.get(&trans_id), self.new_name.get(&trans_id))
            && self.new_contents.get(&parent) == Some(&Kind::Directory)
            && let Some(parent_path) = self.limbo.files.get(&parent)
        {
            let names = self.limbo.children_names.entry(parent).or_default();
            let free = if self.case_sensitive {
                names.get(filename).is_none_or(|&t| t == trans_id)
            } else {
                let wanted = filename.to_lowercase();
                names
                    .iter()
                    .all(|(n, &t)| t == trans_id || n.to_lowercase() != wanted)
            };
            if free {
                names.insert(filename.clone(), trans_id);
                self.limbo.children.entry(parent).or_default().insert(trans_id);
                return parent_path.join(filename);
            }
        }
        self.limbo.needs_rename.insert(trans_id);
        self.limbo.dir.join(trans_id.to_string())
    }

    /// Ids staged (transitively) inside `trans_id`'s limbo directory.
    fn limbo_descendants(&self, trans_id: TransId) -> BTreeSet<TransId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![trans_id];
        while let Some(id) = stack.pop() {
            for &child in self.limbo.children.get(&id).into_iter().flatten() {
                if out.insert(child) {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Move staged content to the limbo path its current name and parent
    /// call for, carrying staged descendants along.
    pub(crate) fn rename_in_limbo(&mut self, trans_ids: &[TransId]) -> Result<(), TransformError> {
        for &trans_id in trans_ids {
            let Some(old_path) = self.limbo.files.remove(&trans_id) else {
                continue;
            };
            self.limbo.possibly_stale.insert(old_path.clone());
            let Some(&kind) = self.new_contents.get(&trans_id) else {
                continue;
            };
            let new_path = self.limbo_name(trans_id);
            match std::fs::rename(&old_path, &new_path) {
                Ok(()) => {}
                // Unsupported symlinks are recorded without a limbo file.
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound
                        && kind == Kind::Symlink
                        && !self.symlinks_supported => {}
                Err(source) => {
                    return Err(TransformError::RenameFailed {
                        from: old_path,
                        to: new_path,
                        source,
                    });
                }
            }
            self.limbo.possibly_stale.remove(&old_path);
            for descendant in self.limbo_descendants(trans_id) {
                if let Some(path) = self.limbo.files.get_mut(&descendant)
                    && let Ok(rest) = path.strip_prefix(&old_path)
                {
                    *path = new_path.join(rest);
                }
            }
        }
        Ok(())
    }

    fn claim_contents(&self, trans_id: TransId) -> Result<(), TransformError> {
        if self.new_contents.contains_key(&trans_id) {
            return Err(TransformError::AlreadySet {
                trans_id,
                what: "contents",
            });
        }
        Ok(())
    }

    /// Stage a regular file with `contents` for `trans_id`.
    ///
    /// Permissions are copied from the tree file at `mode_id`'s path (or
    /// `trans_id`'s own path) when that is a regular file.
    ///
    /// # Errors
    /// Returns `AlreadySet` if contents were already staged, or an I/O error.
    pub fn create_file(
        &mut self,
        contents: &[u8],
        trans_id: TransId,
        mode_id: Option<TransId>,
    ) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.claim_contents(trans_id)?;
        let path = self.limbo_name(trans_id);
        let mut file = File::create(&path).map_err(io_err(&path))?;
        file.write_all(contents).map_err(io_err(&path))?;
        self.new_contents.insert(trans_id, Kind::File);
        let mtime = *self.limbo.creation_mtime.get_or_insert_with(SystemTime::now);
        file.set_modified(mtime).map_err(io_err(&path))?;
        drop(file);
        self.copy_mode(trans_id, mode_id.unwrap_or(trans_id), &path)?;
        self.observed_hashes.insert(trans_id, content_hash(contents));
        Ok(())
    }

    #[cfg(unix)]
    fn copy_mode(&self, _trans_id: TransId, mode_id: TransId, target: &Path) -> Result<(), TransformError> {
        use std::os::unix::fs::PermissionsExt as _;

        let Some(old_path) = self.tree_id_paths.get(&mode_id) else {
            return Ok(());
        };
        let source = self.tree.abspath(old_path);
        let meta = match std::fs::metadata(&source) {
            Ok(meta) => meta,
            // Missing now, or under something that is not a directory yet.
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(());
            }
            Err(e) => return Err(io_err(&source)(e)),
        };
        if meta.is_file() {
            let mode = meta.permissions().mode();
            std::fs::set_permissions(target, std::fs::Permissions::from_mode(mode))
                .map_err(io_err(target))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn copy_mode(&self, _trans_id: TransId, _mode_id: TransId, _target: &Path) -> Result<(), TransformError> {
        Ok(())
    }

    /// Stage a new directory for `trans_id`.
    ///
    /// # Errors
    /// Returns `AlreadySet` if contents were already staged, or an I/O error.
    pub fn create_directory(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.claim_contents(trans_id)?;
        let path = self.limbo_name(trans_id);
        std::fs::create_dir(&path).map_err(io_err(&path))?;
        self.new_contents.insert(trans_id, Kind::Directory);
        Ok(())
    }

    /// Stage a symlink to `target` for `trans_id`.
    ///
    /// On trees without symlink support nothing is written, a warning is
    /// logged, and the kind is still recorded.
    ///
    /// # Errors
    /// Returns `AlreadySet` if contents were already staged, or an I/O error.
    pub fn create_symlink(&mut self, target: &str, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.claim_contents(trans_id)?;
        let path = self.limbo_name(trans_id);
        if self.symlinks_supported {
            make_symlink(target, &path).map_err(io_err(&path))?;
        } else {
            let final_path = FinalPaths::new(self).get_path(trans_id).ok();
            tracing::warn!(
                path = final_path.as_deref().unwrap_or("<unknown>"),
                "unable to create symlink on this filesystem"
            );
        }
        self.new_contents.insert(trans_id, Kind::Symlink);
        Ok(())
    }

    /// Stage `trans_id` as a hard link to the existing file at `source`.
    ///
    /// # Errors
    /// Returns `HardLinkNotSupported` when the filesystem refuses the link,
    /// `AlreadySet` if contents were already staged, or an I/O error.
    pub fn create_hardlink(&mut self, source: &Path, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.claim_contents(trans_id)?;
        let path = self.limbo_name(trans_id);
        if let Err(e) = std::fs::hard_link(source, &path) {
            return Err(match e.kind() {
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::Unsupported => {
                    TransformError::HardLinkNotSupported {
                        path: source.to_owned(),
                    }
                }
                _ => io_err(&path)(e),
            });
        }
        self.new_contents.insert(trans_id, Kind::File);
        Ok(())
    }

    /// Discard staged contents for `trans_id`. Staged children of a new
    /// directory are moved to flat limbo paths first.
    ///
    /// # Errors
    /// Returns `NothingToCancel` if no contents were staged, or an I/O error.
    pub fn cancel_creation(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        if self.new_contents.remove(&trans_id).is_none() {
            return Err(TransformError::NothingToCancel {
                trans_id,
                what: "contents",
            });
        }
        self.observed_hashes.remove(&trans_id);
        if let Some(children) = self.limbo.children.remove(&trans_id) {
            self.limbo.children_names.remove(&trans_id);
            let children: Vec<TransId> = children.into_iter().collect();
            self.rename_in_limbo(&children)?;
        }
        if let Some(path) = self.limbo.files.remove(&trans_id) {
            match delete_any(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        Ok(())
    }

    /// Delete everything left in limbo and remove the scratch directories.
    ///
    /// Runs at most once; later calls do nothing. After finalize the
    /// transform refuses further edits.
    ///
    /// # Errors
    /// Returns `ImmortalLimbo` / `ImmortalPendingDeletion` when a scratch
    /// directory cannot be removed, or an I/O error.
    pub fn finalize(&mut self) -> Result<(), TransformError> {
        if self.limbo.closed {
            return Ok(());
        }
        self.limbo.closed = true;
        if self.phase == Phase::Building {
            self.phase = Phase::Finalized;
        }
        let mut paths: Vec<PathBuf> = self
            .limbo
            .files
            .values()
            .chain(self.limbo.possibly_stale.iter())
            .cloned()
            .collect();
        // Reverse order deletes children before their directories.
        paths.sort_by(|a, b| b.cmp(a));
        for path in &paths {
            match delete_any(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path)(e)),
            }
        }
        if std::fs::remove_dir(&self.limbo.dir).is_err() {
            return Err(TransformError::ImmortalLimbo {
                path: self.limbo.dir.clone(),
            });
        }
        if std::fs::remove_dir(&self.deletion_dir).is_err() {
            return Err(TransformError::ImmortalPendingDeletion {
                path: self.deletion_dir.clone(),
            });
        }
        Ok(())
    }

    /// The staged symlink target for `trans_id`, when it was written.
    pub(crate) fn limbo_symlink_target(&self, trans_id: TransId) -> Option<String> {
        let path = self.limbo.files.get(&trans_id)?;
        std::fs::read_link(path)
            .ok()
            .and_then(|t| t.to_str().map(str::to_owned))
    }

    /// The staged file bytes for `trans_id`.
    pub(crate) fn limbo_file_bytes(&self, trans_id: TransId) -> Option<Vec<u8>> {
        let path = self.limbo.files.get(&trans_id)?;
        std::fs::read(path).ok()
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    fn fresh() -> (tempfile::TempDir, WorkingTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::init(dir.path()).unwrap();
        (dir, tree)
    }

    #[test]
    fn children_of_new_directories_use_direct_paths() {
        let (dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let d = tt.new_directory("d", root).unwrap();
        let f = tt.new_file("f", d, b"hello\n", None).unwrap();
        let limbo = dir.path().join(".bramble/limbo");
        assert_eq!(tt.limbo.files[&d], limbo.join(d.to_string()));
        assert_eq!(tt.limbo.files[&f], limbo.join(d.to_string()).join("f"));
        assert!(tt.limbo.needs_rename.contains(&d));
        assert!(!tt.limbo.needs_rename.contains(&f));
        assert_eq!(std::fs::read(&tt.limbo.files[&f]).unwrap(), b"hello\n");
    }

    #[test]
    fn taken_names_fall_back_to_flat_paths() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let d = tt.new_directory("d", root).unwrap();
        let first = tt.new_file("x", d, b"1", None).unwrap();
        let second = tt.new_file("x", d, b"2", None).unwrap();
        assert!(!tt.limbo.needs_rename.contains(&first));
        assert!(tt.limbo.needs_rename.contains(&second));
    }

    #[test]
    fn case_insensitive_names_collide_in_limbo() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        tt.case_sensitive = false;
        let root = tt.root();
        let d = tt.new_directory("d", root).unwrap();
        tt.new_file("Readme", d, b"1", None).unwrap();
        let other = tt.new_file("README", d, b"2", None).unwrap();
        assert!(tt.limbo.needs_rename.contains(&other));
    }

    #[test]
    fn renaming_a_staged_directory_carries_descendants() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let outer = tt.new_directory("outer", root).unwrap();
        let inner = tt.new_directory("inner", outer).unwrap();
        let leaf = tt.new_file("leaf", inner, b"x", None).unwrap();
        let old_leaf = tt.limbo.files[&leaf].clone();

        tt.adjust_path("renamed", outer, inner).unwrap();

        let new_leaf = tt.limbo.files[&leaf].clone();
        assert_ne!(old_leaf, new_leaf);
        assert!(new_leaf.ends_with("renamed/leaf"));
        assert_eq!(std::fs::read(&new_leaf).unwrap(), b"x");
        assert!(!old_leaf.exists());
    }

    #[test]
    fn cancel_creation_moves_children_out() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let d = tt.new_directory("d", root).unwrap();
        let f = tt.new_file("f", d, b"keep", None).unwrap();
        let old_dir = tt.limbo.files[&d].clone();
        tt.cancel_creation(d).unwrap();
        assert!(!old_dir.exists());
        let moved = tt.limbo.files[&f].clone();
        assert_eq!(moved, tt.limbo.dir.join(f.to_string()));
        assert_eq!(std::fs::read(moved).unwrap(), b"keep");
        assert!(matches!(
            tt.cancel_creation(d),
            Err(TransformError::NothingToCancel { .. })
        ));
    }

    #[test]
    fn contents_cannot_be_created_twice() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let f = tt.new_file("f", root, b"1", None).unwrap();
        assert!(matches!(
            tt.create_file(b"2", f, None),
            Err(TransformError::AlreadySet { .. })
        ));
    }

    #[test]
    fn new_files_share_a_creation_mtime() {
        let (_dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let a = tt.new_file("a", root, b"1", None).unwrap();
        let b = tt.new_file("b", root, b"2", None).unwrap();
        let ma = std::fs::metadata(&tt.limbo.files[&a]).unwrap().modified().unwrap();
        let mb = std::fs::metadata(&tt.limbo.files[&b]).unwrap().modified().unwrap();
        assert_eq!(ma, mb);
        assert_eq!(
            tt.observed_hashes[&a],
            "6b86b273ff34fce19e6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
        );
    }

    #[test]
    fn finalize_removes_scratch_and_is_idempotent() {
        let (dir, mut tree) = fresh();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let d = tt.new_directory("d", root).unwrap();
        tt.new_file("f", d, b"x", None).unwrap();
        tt.finalize().unwrap();
        tt.finalize().unwrap();
        assert!(!dir.path().join(".bramble/limbo").exists());
        assert!(!dir.path().join(".bramble/pending-deletion").exists());
        assert!(matches!(
            tt.create_path("late", root),
            Err(TransformError::ReusingTransform)
        ));
    }

    #[test]
    fn dropping_a_transform_cleans_limbo() {
        let (dir, mut tree) = fresh();
        {
            let mut tt = TreeTransform::new(&mut tree).unwrap();
            let root = tt.root();
            tt.new_file("f", root, b"x", None).unwrap();
        }
        assert!(!dir.path().join(".bramble/limbo").exists());
        // A fresh transform can start again.
        let tt = TreeTransform::new(&mut tree).unwrap();
        drop(tt);
    }

    #[test]
    fn hardlinks_share_content() {
        let (dir, mut tree) = fresh();
        let source = dir.path().join("src.txt");
        std::fs::write(&source, "linked").unwrap();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let id = tt.create_path("copy", root).unwrap();
        tt.create_hardlink(&source, id).unwrap();
        assert_eq!(tt.final_kind(id), Some(Kind::File));
        assert_eq!(std::fs::read(&tt.limbo.files[&id]).unwrap(), b"linked");
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_copied_from_mode_id() {
        use std::os::unix::fs::PermissionsExt as _;
        let (dir, mut tree) = fresh();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut tt = TreeTransform::new(&mut tree).unwrap();
        let root = tt.root();
        let old = tt.trans_id_tree_path("run.sh");
        let id = tt.create_path("run2.sh", root).unwrap();
        tt.create_file(b"#!/bin/sh\necho\n", id, Some(old)).unwrap();
        let mode = std::fs::metadata(&tt.limbo.files[&id]).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
