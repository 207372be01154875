//! Stream manager contract for deferred audio file I/O.
//!
//! Defines what a low-level I/O device sees of the engine:
//! - **File references** by name or numeric content ID, with owner/codec/locale flags
//! - **File descriptors** carrying a device-owned opaque parameter block
//! - **Transfers** that own their buffer and complete through a one-shot callback
//! - **Traits** for the stream manager, file location resolver, deferred device
//!   and per-cycle global callbacks
//!
//! # Example
//!
//! ```ignore
//! use legato_core::{FileReference, FileSystemFlags, OpenMode, TransferInfo};
//!
//! let flags = FileSystemFlags::bank().language_specific(true);
//! let desc = resolver.open(&FileReference::Id(42), OpenMode::Read, Some(&flags))?;
//!
//! let transfer = TransferInfo::new(vec![0u8; 4096], 0)
//!     .on_complete(|done, status| println!("{} bytes: {:?}", done.bytes_transferred, status));
//! let id = device.read(&desc, &Default::default(), transfer)?;
//! ```

pub mod device;
pub mod error;
pub mod file;
pub mod manager;
pub mod transfer;

pub use device::{DeviceDescription, DeviceId, DeviceSettings, SchedulerType};
pub use error::{Error, IoStatus, Rejected, Result, SubmitResult};
pub use file::{
    ContentType, FileDescriptor, FileId, FileReference, FileSystemFlags, OpenMode, CODEC_BANK,
    OWNER_ENGINE, OWNER_ENGINE_EXTERNAL,
};
pub use manager::{
    is_same_resolver, CallbackId, CallbackLocation, FileLocationResolver, GlobalCallback,
    GlobalCallbacks, IoHookDeferred, StreamManager,
};
pub use transfer::{
    CompletedTransfer, IoHeuristics, PendingTransfer, TransferCallback, TransferId, TransferInfo,
};
