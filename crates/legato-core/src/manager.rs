//! Stream manager contract.
//!
//! The stream manager is the engine-side owner of devices and file requests.
//! A low-level I/O hook plugs into it twice: as the [`FileLocationResolver`]
//! that turns references into open descriptors, and as the
//! [`IoHookDeferred`] device that services transfers.

use crate::device::{DeviceDescription, DeviceId, DeviceSettings};
use crate::error::{Result, SubmitResult};
use crate::file::{FileDescriptor, FileReference, FileSystemFlags, OpenMode};
use crate::transfer::{IoHeuristics, TransferId, TransferInfo};
use std::sync::Arc;

/// Resolves file references into open descriptors.
pub trait FileLocationResolver: Send + Sync {
    fn open(
        &self,
        reference: &FileReference,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor>;
}

/// Deferred I/O device.
///
/// Reads are accepted immediately and complete later through the transfer's
/// callback. None of these calls block on the read path.
pub trait IoHookDeferred: Send + Sync {
    fn read(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        transfer: TransferInfo,
    ) -> SubmitResult<TransferId>;

    fn write(
        &self,
        desc: &FileDescriptor,
        heuristics: &IoHeuristics,
        transfer: TransferInfo,
    ) -> SubmitResult<()>;

    /// Best-effort cancellation. The device clears `cancel_all` when it only
    /// cancelled the named transfer.
    fn cancel(&self, desc: &FileDescriptor, transfer: TransferId, cancel_all: &mut bool);

    fn close(&self, desc: FileDescriptor) -> Result<()>;

    fn block_size(&self, desc: &FileDescriptor) -> u32;

    fn device_description(&self) -> DeviceDescription;

    /// Custom profiling value.
    fn device_data(&self) -> u32;
}

/// Point in the audio cycle where a global callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackLocation {
    BeginRender,
    EndRender,
}

/// Registration handle for a global callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

pub type GlobalCallback = Arc<dyn Fn() + Send + Sync>;

/// Process-wide callbacks fired once per audio cycle.
pub trait GlobalCallbacks: Send + Sync {
    fn register_global_callback(
        &self,
        location: CallbackLocation,
        callback: GlobalCallback,
    ) -> Result<CallbackId>;

    fn unregister_global_callback(&self, id: CallbackId);
}

/// Engine-side stream manager.
pub trait StreamManager: Send + Sync {
    fn file_location_resolver(&self) -> Option<Arc<dyn FileLocationResolver>>;

    fn set_file_location_resolver(&self, resolver: Option<Arc<dyn FileLocationResolver>>);

    /// Returns [`DeviceId::INVALID`] on failure.
    fn create_device(&self, settings: &DeviceSettings, hook: Arc<dyn IoHookDeferred>) -> DeviceId;

    fn destroy_device(&self, device: DeviceId);

    /// Current content language; empty when none is set.
    fn current_language(&self) -> String;
}

/// True if `resolver` is the object at `candidate`.
pub fn is_same_resolver<T>(resolver: &Arc<dyn FileLocationResolver>, candidate: &T) -> bool {
    Arc::as_ptr(resolver) as *const () == candidate as *const T as *const ()
}
