//! # Legato - Deferred Streaming I/O
//!
//! Low-level file I/O for an audio engine's stream manager.
//!
//! ## Architecture
//!
//! Legato is an umbrella crate that coordinates:
//! - **legato-core** - Stream manager contract (references, descriptors, transfers, traits)
//! - **legato-stream** - Deferred I/O hook (path resolution, transfer pool,
//!   native and legacy backends, completion pump, in-process host)
//!
//! ## Quick Start
//!
//! ```ignore
//! use legato::prelude::*;
//!
//! let system = StreamingSystem::builder()
//!     .base_path("/assets")
//!     .language("en")
//!     .build()?;
//!
//! let flags = FileSystemFlags::bank().language_specific(true);
//! let desc = system.open(42u32, OpenMode::Read, Some(&flags))?;   // /assets/en/42.bnk
//!
//! let transfer = TransferInfo::new(vec![0u8; 4096], 0)
//!     .on_complete(|done, status| println!("{:?}: {} bytes", status, done.bytes_transferred));
//! system.read(&desc, transfer)?;
//!
//! // Once per audio cycle
//! system.run_cycle();
//! ```

/// Re-export of legato-core for direct access
pub use legato_core as core;

/// Re-export of legato-stream for direct access
pub use legato_stream as stream;

// Contract types
pub use legato_core::{
    CompletedTransfer, ContentType, DeviceDescription, DeviceId, DeviceSettings, FileDescriptor,
    FileId, FileReference, FileSystemFlags, IoHeuristics, IoStatus, OpenMode, Rejected,
    SchedulerType, SubmitResult, TransferId, TransferInfo,
};

// Traits
pub use legato_core::{
    FileLocationResolver, GlobalCallbacks, IoHookDeferred, StreamManager,
};

// Subsystem
pub use legato_stream::{
    BackendKind, DeferredIoHook, HookConfig, LocalStreamManager, TransferMetricsSnapshot,
};

mod builder;
mod error;
mod system;

pub use builder::StreamingSystemBuilder;
pub use error::{Error, Result};
pub use system::StreamingSystem;

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{Error, Result, StreamingSystem, StreamingSystemBuilder};

    pub use crate::{
        BackendKind, CompletedTransfer, DeviceSettings, FileDescriptor, FileReference,
        FileSystemFlags, HookConfig, IoHookDeferred, IoStatus, OpenMode, TransferId, TransferInfo,
    };
}
