//! The rename journal used by `apply`.
//!
//! Every rename and permission change performed during apply goes through a
//! [`Mover`], which remembers it so a failure can be undone in reverse
//! order. Deletions are
//! renames into the pending-deletion directory and only become real in
//! [`Mover::apply_deletions`], after every rename has succeeded.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt as _;

use super::TransformError;
use super::limbo::delete_any;

/// Filesystem moves with rollback.
pub trait Mover {
    /// Rename `from` to `to`, recording it for rollback.
    ///
    /// # Errors
    /// Returns `FileExists` when `to` is occupied, or `RenameFailed`.
    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), TransformError>;

    /// Rename `from` to `to` and schedule `to` for deletion.
    ///
    /// # Errors
    /// As for [`rename`](Self::rename).
    fn pre_delete(&mut self, from: &Path, to: &Path) -> Result<(), TransformError>;

    /// Set the permission bits of `path` to `mode`, recording the old mode
    /// for rollback.
    ///
    /// # Errors
    /// Returns an I/O error if the mode cannot be read or written.
    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<(), TransformError>;

    /// Undo every recorded rename and mode change, newest first.
    ///
    /// # Errors
    /// Returns the error for the first step that cannot be reversed.
    fn rollback(&mut self) -> Result<(), TransformError>;

    /// Delete everything scheduled by [`pre_delete`](Self::pre_delete).
    ///
    /// # Errors
    /// Returns an I/O error for the first path that cannot be deleted.
    fn apply_deletions(&mut self) -> Result<(), TransformError>;
}

#[derive(Debug)]
enum Undo {
    Rename { from: PathBuf, to: PathBuf },
    Mode { path: PathBuf, mode: u32 },
}

/// The real-filesystem [`Mover`].
#[derive(Debug, Default)]
pub struct FileMover {
    journal: Vec<Undo>,
    pending_deletions: Vec<PathBuf>,
}

impl FileMover {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mover for FileMover {
    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), TransformError> {
        if let Err(e) = std::fs::rename(from, to) {
            return Err(match e.kind() {
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty => {
                    TransformError::FileExists {
                        path: to.to_owned(),
                    }
                }
                _ => TransformError::RenameFailed {
                    from: from.to_owned(),
                    to: to.to_owned(),
                    source: e,
                },
            });
        }
        self.journal.push(Undo::Rename {
            from: from.to_owned(),
            to: to.to_owned(),
        });
        Ok(())
    }

    fn pre_delete(&mut self, from: &Path, to: &Path) -> Result<(), TransformError> {
        self.rename(from, to)?;
        self.pending_deletions.push(to.to_owned());
        Ok(())
    }

    #[cfg(unix)]
    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<(), TransformError> {
        let old = std::fs::metadata(path)
            .map_err(super::io_err(path))?
            .permissions()
            .mode();
        if old == mode {
            return Ok(());
        }
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(super::io_err(path))?;
        self.journal.push(Undo::Mode {
            path: path.to_owned(),
            mode: old,
        });
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_mode(&mut self, _path: &Path, _mode: u32) -> Result<(), TransformError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TransformError> {
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Rename { from, to } => {
                    std::fs::rename(&to, &from).map_err(|source| TransformError::RenameFailed {
                        from: to.clone(),
                        to: from.clone(),
                        source,
                    })?;
                }
                Undo::Mode { path, mode } => restore_mode(&path, mode)?,
            }
        }
        self.pending_deletions.clear();
        Ok(())
    }

    fn apply_deletions(&mut self) -> Result<(), TransformError> {
        for path in self.pending_deletions.drain(..) {
            let result = match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => delete_any(&path),
                Err(e) => Err(e),
            };
            result.map_err(super::io_err(&path))?;
        }
        self.journal.clear();
        Ok(())
    }
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: u32) -> Result<(), TransformError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(super::io_err(path))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restore_mode(_path: &Path, _mode: u32) -> Result<(), TransformError> {
    Ok(())
}
