//! Top-level error type for bramble.
//!
//! Defines [`BrambleError`], which wraps the error of each subsystem and
//! sorts it into an [`ErrorClass`] so callers can decide how to react
//! without matching every variant. Display output ends with a short
//! "To fix:" hint where one exists.

use std::fmt;

use crate::annotate::AnnotateError;
use crate::config::ConfigError;
use crate::transform::TransformError;
use crate::tree::TreeError;

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// How an error should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The transform is inconsistent. Nothing touched disk; adjust the
    /// transform (or run conflict resolution) and try again.
    StructuralConflict,
    /// A requested text or revision is not in the store.
    NotFoundInStore,
    /// A filesystem operation failed. Apply rolls back before reporting this.
    FilesystemFailure,
    /// Limbo or pending-deletion directories survived finalize and need
    /// manual cleanup.
    ImmortalLimbo,
    /// The API was used out of order or with bad arguments.
    Misuse,
    /// Configuration could not be loaded.
    Config,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StructuralConflict => "structural-conflict",
            Self::NotFoundInStore => "not-found-in-store",
            Self::FilesystemFailure => "filesystem-failure",
            Self::ImmortalLimbo => "immortal-limbo",
            Self::Misuse => "misuse",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// BrambleError
// ---------------------------------------------------------------------------

/// Unified error for annotation, transforms, trees, and configuration.
#[derive(Debug)]
pub enum BrambleError {
    Annotate(AnnotateError),
    Transform(TransformError),
    Tree(TreeError),
    Config(ConfigError),
}

impl BrambleError {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Annotate(e) => match e {
                AnnotateError::RevisionNotPresent { .. } => ErrorClass::NotFoundInStore,
                AnnotateError::Store(_) => ErrorClass::FilesystemFailure,
                AnnotateError::Graph(_) => ErrorClass::Misuse,
            },
            Self::Transform(e) => transform_class(e),
            Self::Tree(e) => tree_class(e),
            Self::Config(_) => ErrorClass::Config,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self.class() {
            ErrorClass::StructuralConflict => {
                Some("adjust the transform or run conflict resolution, then apply again.")
            }
            ErrorClass::NotFoundInStore => Some("check that the revision exists in the store."),
            ErrorClass::FilesystemFailure => {
                Some("check file permissions and disk space. The tree was not changed.")
            }
            ErrorClass::ImmortalLimbo => Some(
                "remove .bramble/limbo and .bramble/pending-deletion by hand once nothing holds them open.",
            ),
            ErrorClass::Config => Some("edit .bramble/config.toml and correct the issue."),
            ErrorClass::Misuse => None,
        }
    }
}

fn transform_class(e: &TransformError) -> ErrorClass {
    match e {
        TransformError::Malformed { .. } => ErrorClass::StructuralConflict,
        TransformError::ImmortalLimbo { .. } | TransformError::ImmortalPendingDeletion { .. } => {
            ErrorClass::ImmortalLimbo
        }
        TransformError::HardLinkNotSupported { .. }
        | TransformError::FileExists { .. }
        | TransformError::RenameFailed { .. }
        | TransformError::Io { .. } => ErrorClass::FilesystemFailure,
        TransformError::Tree(t) => tree_class(t),
        #[cfg(feature = "failpoints")]
        TransformError::Failpoint(_) => ErrorClass::FilesystemFailure,
        TransformError::ReusingTransform
        | TransformError::AlreadySet { .. }
        | TransformError::NothingToCancel { .. }
        | TransformError::CantMoveRoot
        | TransformError::NoFinalPath { .. }
        | TransformError::NotInTree { .. }
        | TransformError::NoSuchFile { .. }
        | TransformError::ExistingLimbo { .. }
        | TransformError::ExistingPendingDeletion { .. }
        | TransformError::Branch { .. }
        | TransformError::StrictCommitFailed
        | TransformError::NotBasedOnBranchTip { .. }
        | TransformError::MergeParentsOnFirstCommit => ErrorClass::Misuse,
    }
}

fn tree_class(e: &TreeError) -> ErrorClass {
    match e {
        TreeError::Io { .. } | TreeError::Index { .. } => ErrorClass::FilesystemFailure,
        TreeError::Config(_) => ErrorClass::Config,
        TreeError::IndexVersion { .. }
        | TreeError::AlreadyInitialized { .. }
        | TreeError::NotATree { .. }
        | TreeError::NotFound { .. }
        | TreeError::UnversionedParent { .. }
        | TreeError::Unversionable { .. } => ErrorClass::Misuse,
    }
}

impl fmt::Display for BrambleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Annotate(e) => write!(f, "annotate failed: {e}")?,
            Self::Transform(e) => write!(f, "transform failed: {e}")?,
            Self::Tree(e) => write!(f, "tree error: {e}")?,
            Self::Config(e) => write!(f, "configuration error: {e}")?,
        }
        if let Some(hint) = self.hint() {
            write!(f, "\n  To fix: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BrambleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Annotate(e) => Some(e),
            Self::Transform(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<AnnotateError> for BrambleError {
    fn from(err: AnnotateError) -> Self {
        Self::Annotate(err)
    }
}

impl From<TransformError> for BrambleError {
    fn from(err: TransformError) -> Self {
        Self::Transform(err)
    }
}

impl From<TreeError> for BrambleError {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<ConfigError> for BrambleError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::path::PathBuf;

    use super::*;
    use crate::transform::{Conflict, TransId};

    #[test]
    fn malformed_is_a_structural_conflict() {
        let err = BrambleError::from(TransformError::Malformed {
            conflicts: vec![Conflict::ParentLoop {
                trans_id: TransId::new(3),
            }],
        });
        assert_eq!(err.class(), ErrorClass::StructuralConflict);
        let msg = format!("{err}");
        assert!(msg.contains("To fix:"));
        assert!(msg.contains("conflict resolution"));
    }

    #[test]
    fn rename_failure_is_a_filesystem_failure() {
        let err = BrambleError::from(TransformError::RenameFailed {
            from: PathBuf::from("a"),
            to: PathBuf::from("b"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(err.class(), ErrorClass::FilesystemFailure);
        assert!(err.source().is_some());
    }

    #[test]
    fn leftover_limbo_is_its_own_class() {
        let err = BrambleError::from(TransformError::ImmortalLimbo {
            path: PathBuf::from("/t/.bramble/limbo"),
        });
        assert_eq!(err.class(), ErrorClass::ImmortalLimbo);
        assert!(format!("{err}").contains("by hand"));
    }

    #[test]
    fn tree_errors_inside_transforms_keep_their_class() {
        let err = BrambleError::from(TransformError::Tree(TreeError::NotATree {
            path: PathBuf::from("/nowhere"),
        }));
        assert_eq!(err.class(), ErrorClass::Misuse);
        assert!(!format!("{err}").contains("To fix:"));
    }

    #[test]
    fn config_errors_point_at_the_config_file() {
        let err = BrambleError::from(ConfigError {
            path: None,
            message: "bad".into(),
        });
        assert_eq!(err.class(), ErrorClass::Config);
        assert!(format!("{err}").contains("config.toml"));
    }

    #[test]
    fn class_names_are_kebab_case() {
        assert_eq!(ErrorClass::NotFoundInStore.to_string(), "not-found-in-store");
    }
}
