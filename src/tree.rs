//! Mutable trees: the on-disk target of a [`TreeTransform`](crate::transform::TreeTransform).
//!
//! A tree is a directory on disk plus an index of versioned paths. The
//! [`MutableTree`] trait is what the transform engine needs from a tree;
//! [`WorkingTree`] is the concrete implementation, keeping its index and
//! scratch directories under `.bramble/`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use bramble_core::model::types::{RevisionId, split_lines};

use crate::annotate::AnnotatedLine;
use crate::config::{BrambleConfig, ConfigError, TransformConfig};
use crate::transform::Kind;

/// Name of the control directory at the tree root.
pub const CONTROL_DIR: &str = ".bramble";

const INDEX_FILE: &str = "index.json";
const CONFIG_FILE: &str = "config.toml";
const INDEX_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Index types
// ---------------------------------------------------------------------------

/// What the index records for one versioned path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: Kind,
    #[serde(default)]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<RevisionId>,
    /// SHA-256 of the content last written by a transform, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl IndexEntry {
    #[must_use]
    pub const fn new(kind: Kind) -> Self {
        Self {
            kind,
            executable: false,
            reference: None,
            content_hash: None,
        }
    }
}

/// One row of an index delta.
///
/// `old_path` is removed (if any), then `new_path` is recorded with
/// `entry`. `entry` is `Some` exactly when `new_path` is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexChange {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub entry: Option<IndexEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    last_revision: RevisionId,
    entries: BTreeMap<String, IndexEntry>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            last_revision: RevisionId::null(),
            entries: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TreeError
// ---------------------------------------------------------------------------

/// Errors from tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Filesystem failure at `path`.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The index file could not be parsed or written.
    Index {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The index was written by an incompatible version.
    IndexVersion { path: PathBuf, found: u32 },
    /// `.bramble/config.toml` is invalid.
    Config(ConfigError),
    /// `init` found an existing control directory.
    AlreadyInitialized { path: PathBuf },
    /// `open` found no control directory.
    NotATree { path: PathBuf },
    /// The path does not exist on disk.
    NotFound { path: String },
    /// The path's parent directory is not versioned.
    UnversionedParent { path: String },
    /// The path names control data or an unsupported file type.
    Unversionable { path: String },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Index { path, source } => write!(f, "{}: invalid index: {source}", path.display()),
            Self::IndexVersion { path, found } => write!(
                f,
                "{}: unsupported index version {found} (expected {INDEX_VERSION})",
                path.display()
            ),
            Self::Config(e) => write!(f, "{e}"),
            Self::AlreadyInitialized { path } => {
                write!(f, "{} is already a bramble tree", path.display())
            }
            Self::NotATree { path } => write!(
                f,
                "{} is not a bramble tree (no {CONTROL_DIR}/ directory)",
                path.display()
            ),
            Self::NotFound { path } => write!(f, "no such file: {path}"),
            Self::UnversionedParent { path } => {
                write!(f, "cannot add {path}: parent directory is not versioned")
            }
            Self::Unversionable { path } => write!(f, "cannot version {path}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Index { source, .. } => Some(source),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TreeError + '_ {
    move |source| TreeError::Io {
        path: path.to_owned(),
        source,
    }
}

// ---------------------------------------------------------------------------
// MutableTree
// ---------------------------------------------------------------------------

/// What a transform needs from the tree it edits.
///
/// Paths are tree-relative, `/`-separated, with `""` naming the root.
pub trait MutableTree {
    /// Absolute path of the tree root.
    fn root(&self) -> &Path;

    /// Absolute path for a tree-relative path.
    fn abspath(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root().to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    /// Directory that hosts transform scratch space (limbo, pending deletion).
    /// Must be on the same filesystem as the tree.
    fn control_dir(&self) -> PathBuf;

    /// Whether `path` names control data that transforms must not touch.
    fn is_control_filename(&self, path: &str) -> bool;

    /// Whether names differing only in case are distinct.
    fn case_sensitive(&self) -> bool;

    fn supports_symlinks(&self) -> bool;

    fn supports_executable(&self) -> bool;

    /// Whether entries of `kind` can be versioned.
    fn versionable_kind(&self, kind: Kind) -> bool {
        matches!(
            kind,
            Kind::File | Kind::Directory | Kind::Symlink | Kind::TreeReference
        )
    }

    /// Transform settings for this tree.
    fn transform_config(&self) -> TransformConfig {
        TransformConfig::default()
    }

    /// Whether `path` is versioned. The root always is.
    fn is_versioned(&self, path: &str) -> bool;

    /// The index entry for `path`, if versioned.
    fn entry(&self, path: &str) -> Option<IndexEntry>;

    /// Versioned paths strictly below `dir`, sorted.
    fn versioned_paths_under(&self, dir: &str) -> Vec<String>;

    /// Apply an index delta: every `old_path` is removed first, then every
    /// `new_path` is recorded.
    ///
    /// All or nothing: on error the index is unchanged.
    ///
    /// # Errors
    /// Returns `TreeError` if the index cannot be persisted.
    fn apply_index_delta(&mut self, delta: &[IndexChange]) -> Result<(), TreeError>;

    /// The revision this tree's contents are based on.
    fn last_revision(&self) -> RevisionId;

    /// # Errors
    /// Returns `TreeError` if the new value cannot be persisted.
    fn set_last_revision(&mut self, revision: RevisionId) -> Result<(), TreeError>;

    /// Annotate the on-disk contents of `path`.
    ///
    /// The tree keeps no per-line history, so every line is attributed to
    /// [`last_revision`](Self::last_revision), or to `default_revision` when
    /// the tree has no revision yet.
    ///
    /// # Errors
    /// Returns `TreeError` if the file cannot be read.
    fn annotate_iter(
        &self,
        path: &str,
        default_revision: &RevisionId,
    ) -> Result<Vec<AnnotatedLine<RevisionId>>, TreeError> {
        let abspath = self.abspath(path);
        let text = std::fs::read(&abspath).map_err(io_err(&abspath))?;
        let last = self.last_revision();
        let origin = if last.is_null() {
            default_revision.clone()
        } else {
            last
        };
        Ok(split_lines(&text)
            .into_iter()
            .map(|line| AnnotatedLine::new(origin.clone(), line))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// WorkingTree
// ---------------------------------------------------------------------------

/// A directory on disk with a JSON index under `.bramble/`.
#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
    control: PathBuf,
    index: IndexFile,
    config: BrambleConfig,
    case_sensitive: bool,
}

impl WorkingTree {
    /// Create `.bramble/` under `root` with an empty index.
    ///
    /// # Errors
    /// Returns `AlreadyInitialized` if the control directory exists, or an
    /// I/O error.
    pub fn init(root: &Path) -> Result<Self, TreeError> {
        let control = root.join(CONTROL_DIR);
        if control.exists() {
            return Err(TreeError::AlreadyInitialized {
                path: root.to_owned(),
            });
        }
        std::fs::create_dir_all(&control).map_err(io_err(&control))?;
        let tree = Self::from_parts(root, IndexFile::default(), BrambleConfig::default());
        tree.save_index()?;
        tracing::debug!(root = %root.display(), "initialized tree");
        Ok(tree)
    }

    /// Open an existing tree.
    ///
    /// # Errors
    /// Returns `NotATree` without a control directory, or an error reading
    /// the index or config.
    pub fn open(root: &Path) -> Result<Self, TreeError> {
        let control = root.join(CONTROL_DIR);
        if !control.is_dir() {
            return Err(TreeError::NotATree {
                path: root.to_owned(),
            });
        }
        let index_path = control.join(INDEX_FILE);
        let raw = std::fs::read(&index_path).map_err(io_err(&index_path))?;
        let index: IndexFile = serde_json::from_slice(&raw).map_err(|source| TreeError::Index {
            path: index_path.clone(),
            source,
        })?;
        if index.version != INDEX_VERSION {
            return Err(TreeError::IndexVersion {
                path: index_path,
                found: index.version,
            });
        }
        let config = BrambleConfig::load(&control.join(CONFIG_FILE))?;
        Ok(Self::from_parts(root, index, config))
    }

    fn from_parts(root: &Path, index: IndexFile, config: BrambleConfig) -> Self {
        let control = root.join(CONTROL_DIR);
        // On a case-insensitive filesystem the control directory answers to
        // an upper-cased name too.
        let case_sensitive = config
            .transform
            .case_sensitive
            .unwrap_or_else(|| !root.join(CONTROL_DIR.to_uppercase()).exists());
        Self {
            root: root.to_owned(),
            control,
            index,
            config,
            case_sensitive,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &BrambleConfig {
        &self.config
    }

    /// Versioned paths in sorted order, root excluded.
    pub fn versioned_paths(&self) -> impl Iterator<Item = &str> {
        self.index.entries.keys().map(String::as_str)
    }

    /// Version an existing on-disk path. Adding a versioned path is a no-op.
    ///
    /// # Errors
    /// Returns an error if the path is missing, is control data, has an
    /// unversioned parent, or the index cannot be saved.
    pub fn add(&mut self, path: &str) -> Result<(), TreeError> {
        let path = path.trim_matches('/');
        if path.is_empty() || self.is_versioned(path) {
            return Ok(());
        }
        if self.is_control_filename(path) {
            return Err(TreeError::Unversionable {
                path: path.to_owned(),
            });
        }
        let parent = path.rsplit_once('/').map_or("", |(p, _)| p);
        if !self.is_versioned(parent) {
            return Err(TreeError::UnversionedParent {
                path: path.to_owned(),
            });
        }
        let abspath = self.abspath(path);
        let meta = match std::fs::symlink_metadata(&abspath) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TreeError::NotFound {
                    path: path.to_owned(),
                });
            }
            Err(e) => return Err(io_err(&abspath)(e)),
        };
        let kind = Kind::from_file_type(meta.file_type()).ok_or_else(|| {
            TreeError::Unversionable {
                path: path.to_owned(),
            }
        })?;
        let mut entry = IndexEntry::new(kind);
        entry.executable = kind == Kind::File && is_executable(&meta);
        self.index.entries.insert(path.to_owned(), entry);
        self.save_index()
    }

    fn save_index(&self) -> Result<(), TreeError> {
        self.write_index(&self.index)
    }

    /// Write `index` atomically: temp file in the control dir, then rename.
    fn write_index(&self, index: &IndexFile) -> Result<(), TreeError> {
        let path = self.control.join(INDEX_FILE);
        crate::fp!(crate::failpoints::FP_TREE_SAVE_INDEX).map_err(|e| TreeError::Io {
            path: path.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
        let json = serde_json::to_vec_pretty(index).map_err(|source| TreeError::Index {
            path: path.clone(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.control).map_err(io_err(&self.control))?;
        tmp.write_all(&json).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(&path))?;
        tmp.persist(&path).map_err(|e| TreeError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

impl MutableTree for WorkingTree {
    fn root(&self) -> &Path {
        &self.root
    }

    fn control_dir(&self) -> PathBuf {
        self.control.clone()
    }

    fn is_control_filename(&self, path: &str) -> bool {
        let first = path.split('/').next().unwrap_or(path);
        if self.case_sensitive {
            first == CONTROL_DIR
        } else {
            first.eq_ignore_ascii_case(CONTROL_DIR)
        }
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn supports_symlinks(&self) -> bool {
        cfg!(unix)
    }

    fn supports_executable(&self) -> bool {
        cfg!(unix)
    }

    fn transform_config(&self) -> TransformConfig {
        self.config.transform.clone()
    }

    fn is_versioned(&self, path: &str) -> bool {
        path.is_empty() || self.index.entries.contains_key(path)
    }

    fn entry(&self, path: &str) -> Option<IndexEntry> {
        if path.is_empty() {
            return Some(IndexEntry::new(Kind::Directory));
        }
        self.index.entries.get(path).cloned()
    }

    fn versioned_paths_under(&self, dir: &str) -> Vec<String> {
        if dir.is_empty() {
            return self.index.entries.keys().cloned().collect();
        }
        let prefix = format!("{dir}/");
        self.index
            .entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn apply_index_delta(&mut self, delta: &[IndexChange]) -> Result<(), TreeError> {
        let mut index = self.index.clone();
        for change in delta {
            if let Some(old) = &change.old_path {
                index.entries.remove(old);
            }
        }
        for change in delta {
            if let (Some(new), Some(entry)) = (&change.new_path, &change.entry)
                && !new.is_empty()
            {
                index.entries.insert(new.clone(), entry.clone());
            }
        }
        self.write_index(&index)?;
        self.index = index;
        Ok(())
    }

    fn last_revision(&self) -> RevisionId {
        self.index.last_revision.clone()
    }

    fn set_last_revision(&mut self, revision: RevisionId) -> Result<(), TreeError> {
        self.index.last_revision = revision;
        self.save_index()
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (tempfile::TempDir, WorkingTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::init(dir.path()).unwrap();
        (dir, tree)
    }

    #[test]
    fn init_then_open_round_trips_index() {
        let (dir, mut tree) = fresh();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn main() {}\n").unwrap();
        tree.add("src").unwrap();
        tree.add("src/lib.rs").unwrap();
        tree.set_last_revision(RevisionId::new("rev-1")).unwrap();

        let reopened = WorkingTree::open(dir.path()).unwrap();
        assert_eq!(
            reopened.versioned_paths().collect::<Vec<_>>(),
            vec!["src", "src/lib.rs"]
        );
        assert_eq!(reopened.last_revision(), RevisionId::new("rev-1"));
        assert_eq!(reopened.entry("src").unwrap().kind, Kind::Directory);
    }

    #[test]
    fn init_twice_is_rejected() {
        let (dir, _tree) = fresh();
        assert!(matches!(
            WorkingTree::init(dir.path()),
            Err(TreeError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn open_without_control_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WorkingTree::open(dir.path()),
            Err(TreeError::NotATree { .. })
        ));
    }

    #[test]
    fn add_requires_versioned_parent() {
        let (dir, mut tree) = fresh();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b"), "x").unwrap();
        assert!(matches!(
            tree.add("a/b"),
            Err(TreeError::UnversionedParent { .. })
        ));
        assert!(matches!(tree.add("zzz"), Err(TreeError::NotFound { .. })));
        assert!(matches!(
            tree.add(".bramble/index.json"),
            Err(TreeError::Unversionable { .. })
        ));
    }

    #[test]
    fn delta_removes_before_inserting() {
        let (dir, mut tree) = fresh();
        std::fs::write(dir.path().join("a"), "1").unwrap();
        std::fs::write(dir.path().join("b"), "2").unwrap();
        tree.add("a").unwrap();
        tree.add("b").unwrap();
        // Swap the two names.
        let delta = vec![
            IndexChange {
                old_path: Some("a".into()),
                new_path: Some("b".into()),
                entry: Some(IndexEntry::new(Kind::File)),
            },
            IndexChange {
                old_path: Some("b".into()),
                new_path: Some("a".into()),
                entry: Some(IndexEntry::new(Kind::Directory)),
            },
        ];
        tree.apply_index_delta(&delta).unwrap();
        assert_eq!(tree.entry("a").unwrap().kind, Kind::Directory);
        assert_eq!(tree.entry("b").unwrap().kind, Kind::File);
    }

    #[test]
    fn versioned_paths_under_is_prefix_exact() {
        let (dir, mut tree) = fresh();
        for d in ["a", "a/b", "ab"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
            tree.add(d).unwrap();
        }
        assert_eq!(tree.versioned_paths_under("a"), vec!["a/b".to_owned()]);
        assert_eq!(tree.versioned_paths_under("").len(), 3);
    }

    #[test]
    fn control_dir_is_not_user_content() {
        let (_dir, tree) = fresh();
        assert!(tree.is_control_filename(".bramble"));
        assert!(tree.is_control_filename(".bramble/limbo/new-1"));
        assert!(!tree.is_control_filename("src/.bramble"));
        assert!(tree.is_versioned(""));
    }

    #[test]
    fn config_is_loaded_on_open() {
        let (dir, _tree) = fresh();
        std::fs::write(
            dir.path().join(".bramble/config.toml"),
            "[transform]\norphan_policy = \"move\"\ncase_sensitive = false\n",
        )
        .unwrap();
        let tree = WorkingTree::open(dir.path()).unwrap();
        assert!(!tree.case_sensitive());
        assert_eq!(
            tree.transform_config().orphan_policy,
            crate::config::OrphanPolicy::Move
        );
    }

    #[test]
    fn default_annotation_uses_last_revision() {
        let (dir, mut tree) = fresh();
        std::fs::write(dir.path().join("f"), "a\nb\n").unwrap();
        let fallback = RevisionId::current();
        let lines = tree.annotate_iter("f", &fallback).unwrap();
        assert!(lines.iter().all(|l| l.origin == fallback));
        tree.set_last_revision(RevisionId::new("r1")).unwrap();
        let lines = tree.annotate_iter("f", &fallback).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.origin.as_str() == "r1"));
    }
}
