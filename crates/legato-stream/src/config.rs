//! I/O hook configuration.

use legato_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest path the resolver will produce, in characters.
pub const DEFAULT_MAX_PATH_LEN: usize = 260;

/// Which asynchronous read strategy backs the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Per-file async read handles completing on I/O threads.
    NativeAsync,
    /// Worker pool decrementing readiness counters, observed by a per-cycle pump.
    Legacy,
}

impl BackendKind {
    /// Pick the strategy the current platform supports.
    ///
    /// Positional reads (`pread` / `ReadFile` with an offset) are what the
    /// native handles are built on.
    pub fn detect() -> Self {
        if cfg!(any(unix, windows)) {
            BackendKind::NativeAsync
        } else {
            BackendKind::Legacy
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::detect()
    }
}

/// Configuration for the deferred I/O hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Root of all resolved files (default: none, must be set before opening)
    pub base_path: Option<PathBuf>,
    /// Transfer slots, i.e. maximum reads in flight (default: 32)
    pub pool_capacity: usize,
    /// Read strategy (default: detected from platform)
    pub backend: BackendKind,
    /// I/O threads servicing reads (default: 2)
    pub io_threads: usize,
    /// Path length budget in characters (default: 260)
    pub max_path_len: usize,
    /// Name reported in the device description (default: "DeferredIODevice")
    pub device_name: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            pool_capacity: 32,
            backend: BackendKind::detect(),
            io_threads: 2,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            device_name: "DeferredIODevice".to_owned(),
        }
    }
}

impl HookConfig {
    /// Create config with a custom pool capacity.
    pub fn with_pool_capacity(capacity: usize) -> Self {
        Self {
            pool_capacity: capacity,
            ..Default::default()
        }
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    /// Parse from TOML; missing keys fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: HookConfig =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 || self.pool_capacity > 1024 {
            return Err(Error::Config(format!(
                "pool_capacity {} out of range (1-1024)",
                self.pool_capacity
            )));
        }
        if self.io_threads == 0 {
            return Err(Error::Config("io_threads must be at least 1".into()));
        }
        if self.max_path_len < 16 {
            return Err(Error::Config(format!(
                "max_path_len {} too small",
                self.max_path_len
            )));
        }
        Ok(())
    }
}
