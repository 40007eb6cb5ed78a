//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the DOT dump directory.
pub const ENV_DOT_DIR: &str = "PIPEWRIGHT_DEBUG_DUMP_DOT_DIR";
/// Environment variable with the device poll interval in milliseconds.
pub const ENV_DEVICE_POLL_MS: &str = "PIPEWRIGHT_DEVICE_POLL_MS";

/// Process-wide settings, fixed by [`initialize_with`](crate::initialize_with).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Where [`debug_bin_to_dot_file`](crate::pipeline::debug_bin_to_dot_file)
    /// writes; dumping is disabled when unset.
    pub dot_dump_dir: Option<PathBuf>,
    /// How often device monitors poll their providers.
    pub device_poll_interval: Duration,
    /// Whether pipelines flush their bus when going from READY to NULL.
    pub auto_flush_bus: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dot_dump_dir: None,
            device_poll_interval: Duration::from_millis(500),
            auto_flush_bus: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by the `PIPEWRIGHT_*` environment variables.
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_DOT_DIR).filter(|d| !d.is_empty()) {
            config.dot_dump_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = lookup(ENV_DEVICE_POLL_MS) {
            match ms.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.device_poll_interval = Duration::from_millis(ms),
                _ => warn!(variable = ENV_DEVICE_POLL_MS, value = %ms, "ignoring invalid poll interval"),
            }
        }
        config
    }

    /// Settings for tests: fast device polling, bus kept after teardown.
    pub fn testing() -> Self {
        Self {
            dot_dump_dir: None,
            device_poll_interval: Duration::from_millis(20),
            auto_flush_bus: false,
        }
    }

    /// Set the DOT dump directory.
    pub fn with_dot_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dot_dump_dir = Some(dir.into());
        self
    }

    /// Set the device poll interval.
    pub fn with_device_poll_interval(mut self, interval: Duration) -> Self {
        self.device_poll_interval = interval;
        self
    }
}
