//! Core data model.

pub mod types;
