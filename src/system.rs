//! Streaming system facade.

use crate::builder::StreamingSystemBuilder;
use crate::Result;
use legato_core::{
    DeviceId, FileDescriptor, FileReference, FileSystemFlags, IoHeuristics, IoHookDeferred,
    OpenMode, SubmitResult, TransferId, TransferInfo,
};
use legato_stream::{DeferredIoHook, LocalStreamManager, TransferMetricsSnapshot};
use std::path::Path;
use std::sync::Arc;

/// A deferred I/O hook registered with an in-process stream manager.
///
/// Dropping the system terminates the device and unregisters the hook.
pub struct StreamingSystem {
    manager: Arc<LocalStreamManager>,
    hook: Arc<DeferredIoHook>,
    device_id: DeviceId,
}

impl StreamingSystem {
    pub fn builder() -> StreamingSystemBuilder {
        StreamingSystemBuilder::default()
    }

    pub(crate) fn new(
        manager: Arc<LocalStreamManager>,
        hook: Arc<DeferredIoHook>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            manager,
            hook,
            device_id,
        }
    }

    pub fn manager(&self) -> &Arc<LocalStreamManager> {
        &self.manager
    }

    pub fn hook(&self) -> &Arc<DeferredIoHook> {
        &self.hook
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Open through the registered file location resolver.
    pub fn open(
        &self,
        reference: impl Into<FileReference>,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor> {
        Ok(self.manager.open(&reference.into(), mode, flags)?)
    }

    /// Queue a read; the callback fires from a later [`run_cycle`](Self::run_cycle).
    pub fn read(&self, desc: &FileDescriptor, transfer: TransferInfo) -> SubmitResult<TransferId> {
        self.hook.read(desc, &IoHeuristics::default(), transfer)
    }

    /// Write synchronously; the callback has fired by the time this returns.
    pub fn write(&self, desc: &FileDescriptor, transfer: TransferInfo) -> SubmitResult<()> {
        self.hook.write(desc, &IoHeuristics::default(), transfer)
    }

    /// Ask for `transfer` to be cancelled. Returns true if the request should
    /// be treated as covering every transfer on the descriptor.
    pub fn cancel(&self, desc: &FileDescriptor, transfer: TransferId) -> bool {
        let mut cancel_all = true;
        self.hook.cancel(desc, transfer, &mut cancel_all);
        cancel_all
    }

    /// Close a descriptor.
    ///
    /// With the native backend every read on the descriptor has been
    /// delivered when this returns. Legacy reads still queued keep running
    /// and are delivered by later cycles.
    pub fn close(&self, desc: FileDescriptor) -> Result<()> {
        Ok(self.hook.close(desc)?)
    }

    /// Run one audio cycle. The hook's completion pump runs as one of the
    /// cycle's global callbacks.
    ///
    /// Returns the number of transfer callbacks fired.
    pub fn run_cycle(&self) -> usize {
        let before = self.hook.metrics().snapshot().callbacks_fired;
        self.manager.run_cycle();
        self.hook.metrics().snapshot().callbacks_fired.saturating_sub(before) as usize
    }

    pub fn set_language(&self, language: impl Into<String>) {
        self.manager.set_language(language);
    }

    pub fn set_base_path(&self, path: impl AsRef<Path>) -> bool {
        self.hook.set_base_path(path)
    }

    pub fn metrics(&self) -> TransferMetricsSnapshot {
        self.hook.metrics().snapshot()
    }
}

impl Drop for StreamingSystem {
    fn drop(&mut self) {
        tracing::info!("Shutting down streaming device {:?}", self.device_id);
        self.hook.term();
    }
}
