//! Host integration for per-device modules.
//!
//! The discovery side never constructs per-device sessions itself. It asks a
//! [`ModuleHost`] to load one by name and keeps the returned
//! [`ModuleIndex`], which is all it needs later to request the teardown.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::config::ConfigError;

/// Host-assigned index of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIndex(pub u32);

impl fmt::Display for ModuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised while loading or initialising a module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to load module '{name}': {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("device {udn} does not offer {service}")]
    ServiceMissing { udn: String, service: String },

    #[error("device {udn} failed initialisation: {reason}")]
    InitFailed { udn: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Trait for the host that owns module lifetimes.
///
/// `unload_request` is asynchronous from the caller's point of view: the host
/// schedules the unload and returns immediately.
pub trait ModuleHost: Send + Sync {
    /// Loads the module `name` with `args` in `key=value` form.
    fn load(&self, name: &str, args: &str) -> Result<ModuleIndex, ModuleError>;

    /// Schedules the module at `index` for unloading.
    fn unload_request(&self, index: ModuleIndex);
}

/// Host that hands out increasing indices and does nothing else.
///
/// Useful when embedding the discovery side without a module system, and in
/// tests.
#[derive(Debug, Default)]
pub struct NoopModuleHost {
    next: AtomicU32,
}

impl ModuleHost for NoopModuleHost {
    fn load(&self, name: &str, args: &str) -> Result<ModuleIndex, ModuleError> {
        let index = ModuleIndex(self.next.fetch_add(1, Ordering::Relaxed));
        tracing::debug!("Module load {name} {args} -> {index} (no-op)");
        Ok(index)
    }

    fn unload_request(&self, index: ModuleIndex) {
        tracing::debug!("Module unload {index} requested (no-op)");
    }
}
