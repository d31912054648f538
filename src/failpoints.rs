//! Feature-gated failpoint injection for fault-injection tests.
//!
//! Compile with `--features failpoints` to enable injection.
//! Without the feature, the `fp!()` macro expands to `Ok(())`.
//!
//! The registry lives in `bramble_core::failpoints`; this module re-exports
//! it so tests arm failpoints through one path.

pub use bramble_core::failpoints::{FailpointAction, check, clear, clear_all, set};

/// Failpoint raised after the removal phase of `apply`, before any insertion.
pub const FP_TRANSFORM_AFTER_REMOVALS: &str = "FP_TRANSFORM_AFTER_REMOVALS";

/// Failpoint raised before each insertion-phase rename out of limbo.
pub const FP_TRANSFORM_INSERTION: &str = "FP_TRANSFORM_INSERTION";

/// Failpoint raised after every rename succeeded, before the index update.
pub const FP_TRANSFORM_BEFORE_INDEX_UPDATE: &str = "FP_TRANSFORM_BEFORE_INDEX_UPDATE";

/// Failpoint raised before the tree writes its index file.
pub const FP_TREE_SAVE_INDEX: &str = "FP_TREE_SAVE_INDEX";

/// Failpoint injection point.
///
/// With `failpoints` feature: checks the registry and may return `Err` or panic.
/// Without `failpoints` feature: compiles to `Ok(())`.
///
/// Usage: `fp!("FP_TRANSFORM_AFTER_REMOVALS")?;`
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
            .map_err(|msg| anyhow::anyhow!("failpoint {}: {}", $name, msg))
    };
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), anyhow::Error>(())
    };
}
