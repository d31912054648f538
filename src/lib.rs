//! bramble library crate.
//!
//! Two engines built on [`bramble_core`]:
//!
//! - [`annotate`]: line-level blame across a merge DAG. [`annotate::Annotator`]
//!   walks ancestry from a text store and merges parent annotations with
//!   [`annotate::AnnotationMerger`].
//! - [`transform`]: [`transform::TreeTransform`] stages filesystem and index
//!   changes in limbo, checks them for conflicts, and applies them with
//!   rollback. [`transform::PreviewTree`] reads the result before it exists.
//!
//! [`tree`] holds the working tree those transforms mutate.

pub mod annotate;
pub mod config;
pub mod error;
pub mod failpoints;
pub mod telemetry;
pub mod transform;
pub mod tree;

pub use bramble_core::model::types::{Line, RevisionId, TextKey};
pub use error::{BrambleError, ErrorClass};
