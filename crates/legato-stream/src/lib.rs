//! Deferred asynchronous streaming I/O.
//!
//! Connects an audio engine's stream manager to the filesystem:
//!
//! - **Path resolution**: file names and numeric content IDs become paths
//!   under a configurable base directory, optionally under a language folder
//! - **Transfer pool**: a fixed set of slots bounding reads in flight
//! - **Backends**: native async file handles, or a legacy queued worker
//!   system observed through readiness counters
//! - **Completion pump**: fires transfer callbacks on the caller's thread,
//!   never on an I/O thread
//!
//! # Example
//!
//! ```ignore
//! use legato_stream::{DeferredIoHook, HookConfig, LocalStreamManager};
//!
//! let manager = Arc::new(LocalStreamManager::new());
//! let hook = DeferredIoHook::builder(manager.clone())
//!     .global_callbacks(manager.clone())
//!     .config(HookConfig::default().base_path("/assets"))
//!     .build()?;
//! hook.init(&DeviceSettings::default())?;
//!
//! let desc = manager.open(&"Init.bnk".into(), OpenMode::Read, None)?;
//! hook.read(&desc, &IoHeuristics::default(), TransferInfo::new(vec![0; 4096], 0))?;
//! manager.run_cycle(); // callbacks fire here
//! ```

pub mod backend;
pub mod config;
mod device;
pub mod hook;
pub mod host;
pub mod metrics;
pub mod pool;
pub mod pump;
pub mod resolver;

pub use backend::{create_backend, IoBackend, ReadOutcome, ReadParam, ReadResult};
pub use config::{BackendKind, HookConfig, DEFAULT_MAX_PATH_LEN};
pub use hook::{DeferredIoHook, DeferredIoHookBuilder};
pub use host::LocalStreamManager;
pub use metrics::{TransferMetrics, TransferMetricsSnapshot};
pub use pool::{SlotState, TransferPool};
pub use pump::CompletionPump;
pub use resolver::PathResolver;
