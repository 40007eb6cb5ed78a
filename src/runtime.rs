//! Process-wide initialization and teardown.
//!
//! [`initialize`] registers the built-in factories and fixes the
//! [`RuntimeConfig`]; it is idempotent. [`shutdown`] is final: afterwards
//! element creation, parsing and device monitoring fail with
//! [`Error::Deinitialized`], and so does another [`initialize`].

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::{elements, observability};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

enum Lifecycle {
    Uninitialized,
    Running(Arc<RuntimeConfig>),
    ShutDown,
}

static RUNTIME: RwLock<Lifecycle> = RwLock::new(Lifecycle::Uninitialized);

/// Initialize with [`RuntimeConfig::from_env`].
pub fn initialize() -> Result<()> {
    initialize_inner(RuntimeConfig::from_env)
}

/// Initialize with an explicit configuration.
///
/// If the runtime is already running the call does nothing; the first
/// configuration stays in effect.
pub fn initialize_with(config: RuntimeConfig) -> Result<()> {
    initialize_inner(move || config)
}

fn initialize_inner(config: impl FnOnce() -> RuntimeConfig) -> Result<()> {
    let mut runtime = RUNTIME.write();
    match &*runtime {
        Lifecycle::Running(_) => Ok(()),
        Lifecycle::ShutDown => Err(Error::Deinitialized),
        Lifecycle::Uninitialized => {
            let config = config();
            observability::init_metrics();
            elements::register_builtins();
            info!(version = %version_string(), ?config, "runtime initialized");
            *runtime = Lifecycle::Running(Arc::new(config));
            Ok(())
        }
    }
}

/// Tear the runtime down for good.
///
/// Elements that still exist keep working; creating new ones fails.
pub fn shutdown() {
    let mut runtime = RUNTIME.write();
    if matches!(*runtime, Lifecycle::Running(_)) {
        debug!("runtime shut down");
    }
    *runtime = Lifecycle::ShutDown;
}

/// Whether [`initialize`] succeeded and [`shutdown`] was not called.
pub fn is_initialized() -> bool {
    matches!(*RUNTIME.read(), Lifecycle::Running(_))
}

/// Fail unless the runtime is running.
pub(crate) fn ensure_initialized() -> Result<()> {
    match &*RUNTIME.read() {
        Lifecycle::Running(_) => Ok(()),
        Lifecycle::Uninitialized => Err(Error::NotInitialized),
        Lifecycle::ShutDown => Err(Error::Deinitialized),
    }
}

/// Active configuration; the defaults before initialization.
pub fn config() -> Arc<RuntimeConfig> {
    match &*RUNTIME.read() {
        Lifecycle::Running(config) => config.clone(),
        _ => Arc::new(RuntimeConfig::default()),
    }
}

/// Library version as `(major, minor, micro, nano)`.
pub fn version() -> (u32, u32, u32, u32) {
    let part = |s: &str| s.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
        0,
    )
}

/// Human readable version.
pub fn version_string() -> String {
    format!("pipewright {}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_package() {
        let (major, minor, micro, nano) = version();
        assert_eq!(
            format!("{major}.{minor}.{micro}"),
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(nano, 0);
        assert!(version_string().starts_with("pipewright "));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        initialize_with(RuntimeConfig::testing()).unwrap();
        initialize().unwrap();
        assert!(is_initialized());
        assert!(ensure_initialized().is_ok());
        assert!(crate::registry::Registry::get().contains("fakesrc"));
    }
}
