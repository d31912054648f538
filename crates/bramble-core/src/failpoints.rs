//! Feature-gated failpoint registry for fault-injection tests.
//!
//! Compile with `--features failpoints` to enable injection. The `fp!()`
//! macro lives in the `bramble` crate so `$crate` resolves there; this
//! module owns the registry it consults.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op.
    Off,
    /// Return an error with the given message on every hit.
    Error(String),
    /// Pass `skip` hits, then return an error on every later hit.
    ErrorAfter { skip: usize, message: String },
    /// Panic with the given message.
    Panic(String),
}

static REGISTRY: LazyLock<Mutex<HashMap<String, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<String, FailpointAction>> {
    // A panicking failpoint poisons the lock; the map itself stays valid.
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arm a failpoint.
pub fn set(name: &str, action: FailpointAction) {
    registry().insert(name.to_owned(), action);
}

/// Disarm one failpoint.
pub fn clear(name: &str) {
    registry().remove(name);
}

/// Disarm every failpoint.
pub fn clear_all() {
    registry().clear();
}

/// Evaluate a failpoint.
///
/// Returns `Ok(())` when the failpoint is unset, `Off`, or still counting
/// down, and `Err(message)` when it fires.
///
/// # Panics
///
/// Panics if the failpoint action is `Panic`.
pub fn check(name: &str) -> Result<(), String> {
    let mut registry = registry();
    let fired = match registry.get_mut(name) {
        None | Some(FailpointAction::Off) => None,
        Some(FailpointAction::Error(msg)) => Some(msg.clone()),
        Some(FailpointAction::ErrorAfter { skip, message }) => {
            if *skip == 0 {
                Some(message.clone())
            } else {
                *skip -= 1;
                None
            }
        }
        Some(FailpointAction::Panic(msg)) => panic!("failpoint {name}: {msg}"),
    };
    match fired {
        Some(message) => {
            tracing::warn!(failpoint = name, %message, "failpoint fired");
            Err(message)
        }
        None => Ok(()),
    }
}
