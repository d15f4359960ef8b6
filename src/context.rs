//! Process-wide context: the `caller` authorization principal and the
//! `lot_home` override.
//!
//! The C shim this crate is embedded behind cannot thread request state
//! through every call, so `Context` is a small synchronized registry with
//! set-once discipline: callers that care about visibility must set a key
//! before the first core call that depends on it. Reads are otherwise
//! unordered relative to writes.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::error::LotError;

const KEY_CALLER: &str = "caller";
const KEY_LOT_HOME: &str = "lot_home";

fn registry() -> &'static RwLock<ContextState> {
    static REGISTRY: OnceLock<RwLock<ContextState>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ContextState::default()))
}

#[derive(Debug, Default, Clone)]
struct ContextState {
    caller: Option<String>,
    lot_home: Option<String>,
}

/// Handle onto the process-wide context registry.
///
/// `Context` itself holds no state; it is a zero-sized accessor so that
/// components (`Store`, `GraphEngine`, `Facade`) can take `&Context` as an
/// ordinary parameter without threading a singleton reference around.
#[derive(Debug, Default, Clone, Copy)]
pub struct Context;

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sets a context key. Only `caller` and `lot_home` are recognized.
    ///
    /// # Errors
    /// Returns [`LotError::SchemaValidation`] for unrecognized keys.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), LotError> {
        let mut state = registry().write();
        match key {
            KEY_CALLER => state.caller = Some(value.into()),
            KEY_LOT_HOME => state.lot_home = Some(value.into()),
            other => {
                return Err(LotError::schema(
                    "set_context",
                    format!("unrecognized context key: {other}"),
                ))
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn caller(&self) -> Option<String> {
        registry().read().caller.clone()
    }

    #[must_use]
    pub fn lot_home_override(&self) -> Option<String> {
        registry().read().lot_home.clone()
    }

    /// Test-only: clears the registry so successive tests don't leak state
    /// through the process-wide singleton.
    #[cfg(test)]
    pub(crate) fn reset_for_test(&self) {
        *registry().write() = ContextState::default();
    }
}

/// Crate-wide lock serializing any test that touches the process-wide
/// [`Context`] singleton, shared by this module's own tests and by
/// `facade`'s, since both run against the same static registry.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
