//! Identifiers, kinds, and conflict records shared by the transform engine.

use std::fmt;
use std::fs::FileType;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TransId
// ---------------------------------------------------------------------------

/// Opaque handle for a path's identity within one transform.
///
/// Ids are only meaningful inside the transform that issued them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransId(u32);

/// The parent of the tree root. Never has contents or a name.
pub const ROOT_PARENT: TransId = TransId(u32::MAX);

impl TransId {
    pub(crate) const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Whether this is [`ROOT_PARENT`].
    #[must_use]
    pub const fn is_root_parent(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for TransId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root_parent() {
            f.write_str("root-parent")
        } else {
            write!(f, "new-{}", self.0)
        }
    }
}

impl fmt::Debug for TransId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// The kind of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    File,
    Directory,
    Symlink,
    TreeReference,
}

impl Kind {
    /// Map an `lstat` file type. Anything that is not a file, directory or
    /// symlink (fifos, sockets, devices) has no kind.
    #[must_use]
    pub fn from_file_type(ft: FileType) -> Option<Self> {
        if ft.is_symlink() {
            Some(Self::Symlink)
        } else if ft.is_dir() {
            Some(Self::Directory)
        } else if ft.is_file() {
            Some(Self::File)
        } else {
            None
        }
    }

    /// Whether entries of this kind carry content bytes (and can differ in
    /// content without differing in kind).
    #[must_use]
    pub const fn has_text(self) -> bool {
        matches!(self, Self::File | Self::Symlink)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::TreeReference => "tree-reference",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// A structural problem that would make a transform unsafe to apply.
///
/// `Ord` is derived so that conflict lists sort deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Conflict {
    /// A versioned entry would live under an unversioned parent.
    UnversionedParent { parent: TransId },
    /// Following final parents from `trans_id` leads back to it.
    ParentLoop { trans_id: TransId },
    /// Two entries would share a final name under the same parent.
    Duplicate {
        name: String,
        existing: TransId,
        new: TransId,
    },
    /// A parent with live children would have no contents.
    MissingParent { parent: TransId },
    /// A parent with live children would not be a directory.
    NonDirectoryParent { parent: TransId },
    /// An entry would be versioned but have no contents.
    VersioningNoContents { trans_id: TransId },
    /// An entry would be versioned with a kind the tree cannot version.
    VersioningBadKind { trans_id: TransId },
    /// Executability was set on an entry that would be unversioned.
    UnversionedExecutability { trans_id: TransId },
    /// Executability was set on an entry that would not be a regular file.
    NonFileExecutability { trans_id: TransId },
    /// New contents would be written over existing contents that were not
    /// scheduled for deletion.
    Overwrite { name: String, trans_id: TransId },
}

impl Conflict {
    /// Short stable name for the conflict kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnversionedParent { .. } => "unversioned parent",
            Self::ParentLoop { .. } => "parent loop",
            Self::Duplicate { .. } => "duplicate",
            Self::MissingParent { .. } => "missing parent",
            Self::NonDirectoryParent { .. } => "non-directory parent",
            Self::VersioningNoContents { .. } => "versioning no contents",
            Self::VersioningBadKind { .. } => "versioning bad kind",
            Self::UnversionedExecutability { .. } => "unversioned executability",
            Self::NonFileExecutability { .. } => "non-file executability",
            Self::Overwrite { .. } => "overwrite",
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnversionedParent { parent: t }
            | Self::ParentLoop { trans_id: t }
            | Self::MissingParent { parent: t }
            | Self::NonDirectoryParent { parent: t }
            | Self::VersioningNoContents { trans_id: t }
            | Self::VersioningBadKind { trans_id: t }
            | Self::UnversionedExecutability { trans_id: t }
            | Self::NonFileExecutability { trans_id: t } => write!(f, "{}: {t}", self.kind()),
            Self::Duplicate {
                name,
                existing,
                new,
            } => write!(f, "duplicate: {name:?} ({existing} and {new})"),
            Self::Overwrite { name, trans_id } => write!(f, "overwrite: {name:?} ({trans_id})"),
        }
    }
}
