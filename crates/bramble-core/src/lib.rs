//! bramble-core: leaf primitives shared by the annotation and transform engines.
//!
//! - [`model::types`]: revision ids, origin keys, lines.
//! - [`diff`]: patience matching blocks between two sequences.
//! - [`graph`]: ancestry graph with head computation.
//! - [`failpoints`]: feature-gated fault injection registry.

pub mod diff;
pub mod failpoints;
pub mod graph;
pub mod model;
