//! Staged, atomic edits to a [`MutableTree`].
//!
//! A [`TreeTransform`] records intended changes (names, parents, contents,
//! versioning, executability) against opaque [`TransId`]s. New content is
//! staged in a limbo directory. Nothing in the tree moves until
//! [`apply`](TreeTransform::apply), which runs a removal phase and an
//! insertion phase and rolls back every rename on failure.
//!
//! - [`limbo`]: staging new content and cleaning up scratch directories.
//! - [`conflicts`]: structural validation.
//! - [`resolve`]: automatic conflict fixing.
//! - [`mover`]: the rename journal used by `apply`.
//! - [`apply`]: the two-phase apply.
//! - [`changes`]: comparing the transform's final state with the tree.
//! - [`preview`]: a read-only view of the tree as it would be after apply.
//! - [`commit`]: apply and record a new revision on a branch.

pub mod apply;
pub mod changes;
pub mod commit;
pub mod conflicts;
pub mod final_paths;
pub mod limbo;
pub mod mover;
pub mod preview;
pub mod resolve;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use bramble_core::model::types::RevisionId;

use crate::config::OrphanPolicy;
use crate::tree::{MutableTree, TreeError};

pub use apply::{ApplyOptions, TransformResults};
pub use changes::TreeChange;
pub use commit::{Branch, MemoryBranch, Revision};
pub use final_paths::FinalPaths;
pub use mover::{FileMover, Mover};
pub use preview::PreviewTree;
pub use resolve::{ORPHAN_DIR, Resolution, conflict_pass, resolve_conflicts};
pub use types::{Conflict, Kind, ROOT_PARENT, TransId};

use limbo::Limbo;

// ---------------------------------------------------------------------------
// TransformError
// ---------------------------------------------------------------------------

/// Errors from building, applying, or finalizing a transform.
#[derive(Debug)]
pub enum TransformError {
    /// `apply` found structural conflicts.
    Malformed { conflicts: Vec<Conflict> },
    /// The transform was already applied or finalized.
    ReusingTransform,
    /// A per-id fact was recorded twice (e.g. contents created twice).
    AlreadySet { trans_id: TransId, what: &'static str },
    /// Nothing was scheduled for `trans_id`, so nothing can be cancelled.
    NothingToCancel { trans_id: TransId, what: &'static str },
    /// The root cannot be renamed or reparented.
    CantMoveRoot,
    /// The id has neither a scheduled nor a tree name/parent.
    NoFinalPath { trans_id: TransId },
    /// The id does not correspond to a tree path.
    NotInTree { trans_id: TransId },
    /// Deletion was requested for a path with nothing on disk.
    NoSuchFile { path: String },
    /// A limbo directory is left over from an earlier transform.
    ExistingLimbo { path: PathBuf },
    /// A pending-deletion directory is left over from an earlier transform.
    ExistingPendingDeletion { path: PathBuf },
    /// The limbo directory could not be removed during finalize.
    ImmortalLimbo { path: PathBuf },
    /// The pending-deletion directory could not be removed during finalize.
    ImmortalPendingDeletion { path: PathBuf },
    /// Hard links are not permitted between these locations.
    HardLinkNotSupported { path: PathBuf },
    /// A rename target already exists.
    FileExists { path: PathBuf },
    /// A rename failed for another reason.
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    /// Other filesystem failure.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The tree's index or revision could not be updated.
    Tree(TreeError),
    /// The branch refused an update.
    Branch { message: String },
    /// Strict commit found unversioned new content.
    StrictCommitFailed,
    /// The tree's last revision is not the branch tip.
    NotBasedOnBranchTip {
        tree: RevisionId,
        branch: RevisionId,
    },
    /// Merge parents were given for a branch with no revisions.
    MergeParentsOnFirstCommit,
    /// Injected failpoint fired.
    #[cfg(feature = "failpoints")]
    Failpoint(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { conflicts } => {
                write!(f, "transform has {} conflict(s)", conflicts.len())?;
                for c in conflicts {
                    write!(f, "\n  {c}")?;
                }
                Ok(())
            }
            Self::ReusingTransform => {
                write!(f, "transform was already applied or finalized")
            }
            Self::AlreadySet { trans_id, what } => {
                write!(f, "{what} already set for {trans_id}")
            }
            Self::NothingToCancel { trans_id, what } => {
                write!(f, "no {what} scheduled for {trans_id}")
            }
            Self::CantMoveRoot => write!(f, "the tree root cannot be moved"),
            Self::NoFinalPath { trans_id } => write!(f, "no final path for {trans_id}"),
            Self::NotInTree { trans_id } => write!(f, "{trans_id} is not a tree path"),
            Self::NoSuchFile { path } => write!(f, "no such file: {path}"),
            Self::ExistingLimbo { path } => write!(
                f,
                "limbo directory {} is not empty; an earlier transform was interrupted",
                path.display()
            ),
            Self::ExistingPendingDeletion { path } => write!(
                f,
                "pending-deletion directory {} is not empty; an earlier transform was interrupted",
                path.display()
            ),
            Self::ImmortalLimbo { path } => {
                write!(f, "unable to delete limbo directory {}", path.display())
            }
            Self::ImmortalPendingDeletion { path } => write!(
                f,
                "unable to delete pending-deletion directory {}",
                path.display()
            ),
            Self::HardLinkNotSupported { path } => {
                write!(f, "hard links are not supported for {}", path.display())
            }
            Self::FileExists { path } => write!(f, "{} already exists", path.display()),
            Self::RenameFailed { from, to, source } => write!(
                f,
                "could not rename {} => {}: {source}",
                from.display(),
                to.display()
            ),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Tree(e) => write!(f, "{e}"),
            Self::Branch { message } => write!(f, "branch update failed: {message}"),
            Self::StrictCommitFailed => {
                write!(f, "strict commit refused: new content is not versioned")
            }
            Self::NotBasedOnBranchTip { tree, branch } => write!(
                f,
                "tree is based on {tree} but the branch tip is {branch}"
            ),
            Self::MergeParentsOnFirstCommit => {
                write!(f, "cannot commit merge parents on a branch with no revisions")
            }
            #[cfg(feature = "failpoints")]
            Self::Failpoint(msg) => write!(f, "failpoint: {msg}"),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RenameFailed { source, .. } | Self::Io { source, .. } => Some(source),
            Self::Tree(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TreeError> for TransformError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

pub(crate) fn io_err(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> TransformError + '_ {
    move |source| TransformError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Invoke a failpoint and convert the result to [`TransformError`].
///
/// Without the `failpoints` feature this compiles to a no-op.
#[allow(clippy::unnecessary_wraps)]
fn fp_transform(_name: &str) -> Result<(), TransformError> {
    #[cfg(feature = "failpoints")]
    {
        crate::fp!(_name).map_err(|e| TransformError::Failpoint(e.to_string()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// TreeTransform
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Building,
    Applied,
    Finalized,
}

/// A staged set of changes to a tree.
///
/// Holds the tree mutably for its whole lifetime, so no other writer can
/// interleave. Dropping an unfinalized transform finalizes it.
pub struct TreeTransform<'t, T: MutableTree> {
    tree: &'t mut T,
    next_id: u32,
    root: TransId,

    new_name: BTreeMap<TransId, String>,
    new_parent: BTreeMap<TransId, TransId>,
    new_contents: BTreeMap<TransId, Kind>,
    removed_contents: BTreeSet<TransId>,
    new_executability: BTreeMap<TransId, bool>,
    new_reference: BTreeMap<TransId, RevisionId>,
    new_versioned: BTreeSet<TransId>,
    removed_versioned: BTreeSet<TransId>,
    observed_hashes: BTreeMap<TransId, String>,

    tree_path_ids: BTreeMap<String, TransId>,
    tree_id_paths: BTreeMap<TransId, String>,

    limbo: Limbo,
    deletion_dir: PathBuf,
    case_sensitive: bool,
    symlinks_supported: bool,
    orphan_policy: OrphanPolicy,
    resolution_passes: u32,
    phase: Phase,
}

impl<T: MutableTree> fmt::Debug for TreeTransform<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeTransform")
            .field("root", &self.root)
            .field("phase", &self.phase)
            .field("new_name", &self.new_name)
            .field("new_parent", &self.new_parent)
            .field("new_contents", &self.new_contents)
            .field("removed_contents", &self.removed_contents)
            .finish_non_exhaustive()
    }
}

impl<'t, T: MutableTree> TreeTransform<'t, T> {
    /// Start a transform on `tree`, creating its limbo and pending-deletion
    /// directories.
    ///
    /// # Errors
    /// Returns `ExistingLimbo` / `ExistingPendingDeletion` when an earlier
    /// transform left scratch content behind, or an I/O error.
    pub fn new(tree: &'t mut T) -> Result<Self, TransformError> {
        let control = tree.control_dir();
        let limbo_dir = control.join("limbo");
        let deletion_dir = control.join("pending-deletion");
        ensure_empty_dir(&limbo_dir, |path| TransformError::ExistingLimbo { path })?;
        if let Err(e) = ensure_empty_dir(&deletion_dir, |path| {
            TransformError::ExistingPendingDeletion { path }
        }) {
            let _ = std::fs::remove_dir(&limbo_dir);
            return Err(e);
        }
        let config = tree.transform_config();
        let case_sensitive = tree.case_sensitive();
        let symlinks_supported = tree.supports_symlinks();
        let mut tt = Self {
            tree,
            next_id: 0,
            root: ROOT_PARENT,
            new_name: BTreeMap::new(),
            new_parent: BTreeMap::new(),
            new_contents: BTreeMap::new(),
            removed_contents: BTreeSet::new(),
            new_executability: BTreeMap::new(),
            new_reference: BTreeMap::new(),
            new_versioned: BTreeSet::new(),
            removed_versioned: BTreeSet::new(),
            observed_hashes: BTreeMap::new(),
            tree_path_ids: BTreeMap::new(),
            tree_id_paths: BTreeMap::new(),
            limbo: Limbo::new(limbo_dir),
            deletion_dir,
            case_sensitive,
            symlinks_supported,
            orphan_policy: config.orphan_policy,
            resolution_passes: config.resolution_passes,
            phase: Phase::Building,
        };
        tt.root = tt.trans_id_tree_path("");
        Ok(tt)
    }

    /// The tree being transformed.
    pub fn tree(&self) -> &T {
        &*self.tree
    }

    /// The id of the tree root.
    pub const fn root(&self) -> TransId {
        self.root
    }

    /// Override the orphan policy read from the tree's config.
    pub const fn set_orphan_policy(&mut self, policy: OrphanPolicy) {
        self.orphan_policy = policy;
    }

    pub(crate) const fn ensure_building(&self) -> Result<(), TransformError> {
        match self.phase {
            Phase::Building => Ok(()),
            Phase::Applied | Phase::Finalized => Err(TransformError::ReusingTransform),
        }
    }

    fn assign_id(&mut self) -> TransId {
        let id = TransId::new(self.next_id);
        self.next_id += 1;
        id
    }

    // -- identity -----------------------------------------------------------

    /// The id for an existing tree path, registering it (and its ancestors)
    /// on first use. The same path always yields the same id.
    pub fn trans_id_tree_path(&mut self, path: &str) -> TransId {
        let path = path.trim_matches('/');
        if let Some(&id) = self.tree_path_ids.get(path) {
            return id;
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.trans_id_tree_path(parent);
        } else if !path.is_empty() {
            self.trans_id_tree_path("");
        }
        let id = self.assign_id();
        self.tree_path_ids.insert(path.to_owned(), id);
        self.tree_id_paths.insert(id, path.to_owned());
        id
    }

    /// Register a brand-new path named `name` under `parent`.
    ///
    /// # Errors
    /// Returns `ReusingTransform` after apply or finalize.
    pub fn create_path(&mut self, name: &str, parent: TransId) -> Result<TransId, TransformError> {
        self.ensure_building()?;
        let id = self.assign_id();
        self.new_name.insert(id, name.to_owned());
        self.new_parent.insert(id, parent);
        Ok(id)
    }

    /// Schedule `trans_id` to be named `name` under `parent`.
    ///
    /// # Errors
    /// Returns `CantMoveRoot` for the root, or `ReusingTransform`.
    pub fn adjust_path(
        &mut self,
        name: &str,
        parent: TransId,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        self.ensure_building()?;
        if trans_id == self.root {
            return Err(TransformError::CantMoveRoot);
        }
        let previous_parent = self.new_parent.get(&trans_id).copied();
        let previous_name = self.new_name.get(&trans_id).cloned();
        self.new_name.insert(trans_id, name.to_owned());
        self.new_parent.insert(trans_id, parent);
        if self.limbo.files.contains_key(&trans_id) && !self.limbo.needs_rename.contains(&trans_id)
        {
            self.rename_in_limbo(&[trans_id])?;
            if let Some(prev) = previous_parent {
                if prev != parent
                    && let Some(children) = self.limbo.children.get_mut(&prev)
                {
                    children.remove(&trans_id);
                }
                if (prev != parent || previous_name.as_deref() != Some(name))
                    && let (Some(names), Some(old)) =
                        (self.limbo.children_names.get_mut(&prev), &previous_name)
                {
                    names.remove(old);
                }
            }
        }
        Ok(())
    }

    // -- scheduling ---------------------------------------------------------

    /// Schedule the existing contents of `trans_id` for deletion.
    ///
    /// # Errors
    /// Returns `NoSuchFile` when nothing exists on disk at the tree path.
    pub fn delete_contents(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        if self.tree_kind(trans_id).is_none() {
            let path = self.tree_id_paths.get(&trans_id).cloned().unwrap_or_default();
            return Err(TransformError::NoSuchFile { path });
        }
        self.removed_contents.insert(trans_id);
        Ok(())
    }

    /// # Errors
    /// Returns `NothingToCancel` if no deletion was scheduled.
    pub fn cancel_deletion(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        if self.removed_contents.remove(&trans_id) {
            Ok(())
        } else {
            Err(TransformError::NothingToCancel {
                trans_id,
                what: "deletion",
            })
        }
    }

    /// Delete the contents of `trans_id` and stop versioning it.
    ///
    /// # Errors
    /// Returns `NoSuchFile` when nothing exists on disk at the tree path.
    pub fn delete_versioned(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.delete_contents(trans_id)?;
        self.unversion_file(trans_id)
    }

    /// Schedule `trans_id` to stop being versioned.
    ///
    /// # Errors
    /// Returns `ReusingTransform` after apply or finalize.
    pub fn unversion_file(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.removed_versioned.insert(trans_id);
        Ok(())
    }

    /// Schedule `trans_id` to become versioned.
    ///
    /// # Errors
    /// Returns `AlreadySet` if versioning was already scheduled.
    pub fn version_file(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        if !self.new_versioned.insert(trans_id) {
            return Err(TransformError::AlreadySet {
                trans_id,
                what: "versioning",
            });
        }
        Ok(())
    }

    /// # Errors
    /// Returns `NothingToCancel` if versioning was not scheduled.
    pub fn cancel_versioning(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.ensure_building()?;
        if self.new_versioned.remove(&trans_id) {
            Ok(())
        } else {
            Err(TransformError::NothingToCancel {
                trans_id,
                what: "versioning",
            })
        }
    }

    /// Schedule an executable-bit change. `None` clears a scheduled change.
    ///
    /// # Errors
    /// Returns `ReusingTransform` after apply or finalize.
    pub fn set_executability(
        &mut self,
        executable: Option<bool>,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        self.ensure_building()?;
        match executable {
            Some(x) => self.new_executability.insert(trans_id, x),
            None => self.new_executability.remove(&trans_id),
        };
        Ok(())
    }

    /// Record the revision a nested tree reference points at.
    ///
    /// # Errors
    /// Returns `ReusingTransform` after apply or finalize.
    pub fn set_tree_reference(
        &mut self,
        revision: RevisionId,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        self.ensure_building()?;
        self.new_reference.insert(trans_id, revision);
        Ok(())
    }

    // -- convenience constructors ------------------------------------------

    /// Create a new file `name` under `parent` and version it.
    ///
    /// # Errors
    /// Returns an error if the limbo file cannot be written.
    pub fn new_file(
        &mut self,
        name: &str,
        parent: TransId,
        contents: &[u8],
        executable: Option<bool>,
    ) -> Result<TransId, TransformError> {
        let id = self.create_path(name, parent)?;
        self.create_file(contents, id, None)?;
        self.version_file(id)?;
        if executable.is_some() {
            self.set_executability(executable, id)?;
        }
        Ok(id)
    }

    /// Create a new versioned directory `name` under `parent`.
    ///
    /// # Errors
    /// Returns an error if the limbo directory cannot be created.
    pub fn new_directory(&mut self, name: &str, parent: TransId) -> Result<TransId, TransformError> {
        let id = self.create_path(name, parent)?;
        self.create_directory(id)?;
        self.version_file(id)?;
        Ok(id)
    }

    /// Create a new versioned symlink `name` under `parent`.
    ///
    /// # Errors
    /// Returns an error if the limbo symlink cannot be created.
    pub fn new_symlink(
        &mut self,
        name: &str,
        parent: TransId,
        target: &str,
    ) -> Result<TransId, TransformError> {
        let id = self.create_path(name, parent)?;
        self.create_symlink(target, id)?;
        self.version_file(id)?;
        Ok(id)
    }

    // -- state queries ------------------------------------------------------

    /// The current tree path for `trans_id`, if it names one.
    pub fn tree_path(&self, trans_id: TransId) -> Option<&str> {
        self.tree_id_paths.get(&trans_id).map(String::as_str)
    }

    /// The kind currently on disk at `trans_id`'s tree path.
    pub fn tree_kind(&self, trans_id: TransId) -> Option<Kind> {
        let path = self.tree_id_paths.get(&trans_id)?;
        let meta = std::fs::symlink_metadata(self.tree.abspath(path)).ok()?;
        Kind::from_file_type(meta.file_type())
    }

    /// The kind `trans_id` will have after apply.
    pub fn final_kind(&self, trans_id: TransId) -> Option<Kind> {
        if let Some(&kind) = self.new_contents.get(&trans_id) {
            return Some(kind);
        }
        if self.removed_contents.contains(&trans_id) {
            return None;
        }
        self.tree_kind(trans_id)
    }

    /// The parent `trans_id` has in the tree today.
    ///
    /// # Errors
    /// Returns `NotInTree` for ids created by this transform.
    pub fn get_tree_parent(&self, trans_id: TransId) -> Result<TransId, TransformError> {
        let path = self
            .tree_id_paths
            .get(&trans_id)
            .ok_or(TransformError::NotInTree { trans_id })?;
        if path.is_empty() {
            return Ok(ROOT_PARENT);
        }
        let parent = path.rsplit_once('/').map_or("", |(p, _)| p);
        self.tree_path_ids
            .get(parent)
            .copied()
            .ok_or(TransformError::NotInTree { trans_id })
    }

    /// The name `trans_id` will have after apply.
    ///
    /// # Errors
    /// Returns `NoFinalPath` for ids with no scheduled or tree name.
    pub fn final_name(&self, trans_id: TransId) -> Result<&str, TransformError> {
        if let Some(name) = self.new_name.get(&trans_id) {
            return Ok(name);
        }
        self.tree_id_paths
            .get(&trans_id)
            .map(|p| p.rsplit_once('/').map_or(p.as_str(), |(_, name)| name))
            .ok_or(TransformError::NoFinalPath { trans_id })
    }

    /// The parent `trans_id` will have after apply.
    ///
    /// # Errors
    /// Returns `NotInTree` for ids with no scheduled or tree parent.
    pub fn final_parent(&self, trans_id: TransId) -> Result<TransId, TransformError> {
        match self.new_parent.get(&trans_id) {
            Some(&p) => Ok(p),
            None => self.get_tree_parent(trans_id),
        }
    }

    /// Whether `trans_id` is versioned in the tree today.
    pub fn tree_is_versioned(&self, trans_id: TransId) -> bool {
        self.tree_id_paths
            .get(&trans_id)
            .is_some_and(|p| self.tree.is_versioned(p))
    }

    /// Whether `trans_id` will be versioned after apply.
    pub fn final_is_versioned(&self, trans_id: TransId) -> bool {
        if self.new_versioned.contains(&trans_id) {
            return true;
        }
        !self.removed_versioned.contains(&trans_id) && self.tree_is_versioned(trans_id)
    }

    /// Whether `trans_id` will be executable after apply.
    pub fn final_is_executable(&self, trans_id: TransId) -> bool {
        if let Some(&x) = self.new_executability.get(&trans_id) {
            return x;
        }
        if self.new_contents.contains_key(&trans_id) && !self.tree_id_paths.contains_key(&trans_id)
        {
            return false;
        }
        self.tree_id_paths
            .get(&trans_id)
            .and_then(|p| self.tree.entry(p))
            .is_some_and(|e| e.executable)
    }

    /// Whether `trans_id` has a scheduled name or parent.
    pub fn path_changed(&self, trans_id: TransId) -> bool {
        self.new_name.contains_key(&trans_id) || self.new_parent.contains_key(&trans_id)
    }

    /// Every id with a known final or current location, grouped by final
    /// parent.
    pub fn by_parent(&self) -> BTreeMap<TransId, BTreeSet<TransId>> {
        let mut by_parent: BTreeMap<TransId, BTreeSet<TransId>> = BTreeMap::new();
        for (&child, &parent) in &self.new_parent {
            by_parent.entry(parent).or_default().insert(child);
        }
        for &child in self.tree_path_ids.values() {
            if self.new_parent.contains_key(&child) {
                continue;
            }
            if let Ok(parent) = self.get_tree_parent(child) {
                by_parent.entry(parent).or_default().insert(child);
            }
        }
        by_parent
    }

    /// Ids of the on-disk children of `parent`'s tree directory, registering
    /// them. Control data is skipped.
    ///
    /// # Errors
    /// Returns an I/O error other than "not a directory" / "not found".
    pub fn iter_tree_children(&mut self, parent: TransId) -> Result<Vec<TransId>, TransformError> {
        let Some(path) = self.tree_id_paths.get(&parent).cloned() else {
            return Ok(Vec::new());
        };
        let abspath = self.tree.abspath(&path);
        let entries = match std::fs::read_dir(&abspath) {
            Ok(entries) => entries,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_err(&abspath)(e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&abspath))?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let child = join_path(&path, &name);
            if self.tree.is_control_filename(&child) {
                continue;
            }
            names.push(child);
        }
        names.sort();
        Ok(names
            .iter()
            .map(|child| self.trans_id_tree_path(child))
            .collect())
    }

    /// Register the versioned descendants of every directory whose final
    /// path or versioning changes, so index updates can see them.
    pub(crate) fn register_versioned_descendants(&mut self) {
        let dirs: Vec<String> = self
            .tree_id_paths
            .iter()
            .filter(|(id, _)| {
                self.path_changed(**id)
                    || self.removed_versioned.contains(id)
                    || self.removed_contents.contains(id)
            })
            .map(|(_, p)| p.clone())
            .collect();
        for dir in dirs {
            for path in self.tree.versioned_paths_under(&dir) {
                self.trans_id_tree_path(&path);
            }
        }
    }

    /// Whether this transform changes anything at all.
    pub fn is_noop(&self) -> bool {
        self.new_name.is_empty()
            && self.new_parent.is_empty()
            && self.new_contents.is_empty()
            && self.removed_contents.is_empty()
            && self.new_executability.is_empty()
            && self.new_reference.is_empty()
            && self.new_versioned.is_empty()
            && self.removed_versioned.is_empty()
    }
}

impl<T: MutableTree> Drop for TreeTransform<'_, T> {
    fn drop(&mut self) {
        if !self.limbo.closed
            && let Err(e) = self.finalize()
        {
            tracing::warn!(error = %e, "finalizing dropped transform failed");
        }
    }
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

/// Create `dir`, accepting an existing empty directory.
fn ensure_empty_dir(
    dir: &std::path::Path,
    occupied: impl FnOnce(PathBuf) -> TransformError,
) -> Result<(), TransformError> {
    match std::fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let mut entries = std::fs::read_dir(dir).map_err(io_err(dir))?;
            if entries.next().is_some() {
                Err(occupied(dir.to_owned()))
            } else {
                Ok(())
            }
        }
        Err(e) => Err(io_err(dir)(e)),
    }
}
