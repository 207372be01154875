//! Builder for configuring and constructing a `StreamingSystem`.

use crate::{Result, StreamingSystem};
use legato_core::DeviceSettings;
use legato_stream::{BackendKind, DeferredIoHook, HookConfig, LocalStreamManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Wires a [`LocalStreamManager`] and a [`DeferredIoHook`] together and
/// creates the streaming device.
///
/// # Example
///
/// ```ignore
/// use legato::prelude::*;
///
/// let system = StreamingSystem::builder()
///     .base_path("/assets")
///     .language("en")
///     .pool_capacity(16)
///     .build()?;
/// ```
pub struct StreamingSystemBuilder {
    config: HookConfig,
    language: String,
    settings: DeviceSettings,
}

impl Default for StreamingSystemBuilder {
    fn default() -> Self {
        Self {
            config: HookConfig::default(),
            language: String::new(),
            settings: DeviceSettings::default(),
        }
    }
}

impl StreamingSystemBuilder {
    /// Start from a TOML hook configuration file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let config: HookConfig = toml::from_str(&source)?;
        Ok(Self::default().config(config))
    }

    /// Replace the whole hook configuration.
    pub fn config(mut self, config: HookConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_path = Some(path.into());
        self
    }

    /// Default: 32
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    /// Default: detected from platform
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Default: 2
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device_name = name.into();
        self
    }

    /// Language folder for language-specific files. Default: none
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn device_settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<StreamingSystem> {
        let manager = Arc::new(LocalStreamManager::new());
        manager.set_language(self.language);

        let hook = DeferredIoHook::builder(manager.clone())
            .global_callbacks(manager.clone())
            .config(self.config)
            .build()?;

        let device_id = match hook.init(&self.settings) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Streaming device init failed: {}", e);
                hook.term();
                return Err(e.into());
            }
        };

        tracing::info!(
            "Streaming system ready ({:?} backend, {} slots)",
            hook.backend_kind(),
            hook.pool().capacity()
        );
        Ok(StreamingSystem::new(manager, hook, device_id))
    }
}
