//! Minimal in-process stream manager.
//!
//! Enough of an engine to host a [`DeferredIoHook`](crate::DeferredIoHook):
//! resolver registration, a device table, a global-callback registry driven
//! by [`LocalStreamManager::run_cycle`], and the current language.

use dashmap::DashMap;
use legato_core::{
    CallbackId, CallbackLocation, DeviceId, DeviceSettings, Error, FileDescriptor,
    FileLocationResolver, FileReference, FileSystemFlags, GlobalCallback, GlobalCallbacks,
    IoHookDeferred, OpenMode, Result, StreamManager,
};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Devices a manager accepts unless told otherwise.
pub const DEFAULT_MAX_DEVICES: usize = 32;

pub struct LocalStreamManager {
    resolver: RwLock<Option<Arc<dyn FileLocationResolver>>>,
    devices: DashMap<DeviceId, Arc<dyn IoHookDeferred>>,
    max_devices: usize,
    next_device: AtomicU32,
    callbacks: Mutex<Vec<(CallbackId, CallbackLocation, GlobalCallback)>>,
    next_callback: AtomicU64,
    language: RwLock<String>,
}

impl Default for LocalStreamManager {
    fn default() -> Self {
        Self::with_max_devices(DEFAULT_MAX_DEVICES)
    }
}

impl LocalStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_devices(max_devices: usize) -> Self {
        Self {
            resolver: RwLock::new(None),
            devices: DashMap::new(),
            max_devices,
            next_device: AtomicU32::new(0),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            language: RwLock::new(String::new()),
        }
    }

    pub fn set_language(&self, language: impl Into<String>) {
        *self.language.write() = language.into();
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<dyn IoHookDeferred>> {
        self.devices.get(&id).map(|d| Arc::clone(d.value()))
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Open through the registered resolver.
    pub fn open(
        &self,
        reference: &FileReference,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor> {
        let resolver = self
            .file_location_resolver()
            .ok_or_else(|| Error::InvalidParameter("no file location resolver registered".into()))?;
        resolver.open(reference, mode, flags)
    }

    /// Run one audio cycle: begin-render callbacks, then end-render ones.
    ///
    /// Callbacks run outside the registry lock and may register or
    /// unregister callbacks themselves. Returns how many ran.
    pub fn run_cycle(&self) -> usize {
        let mut ran = 0;
        for location in [CallbackLocation::BeginRender, CallbackLocation::EndRender] {
            let batch: SmallVec<[GlobalCallback; 4]> = self
                .callbacks
                .lock()
                .iter()
                .filter(|(_, at, _)| *at == location)
                .map(|(_, _, callback)| Arc::clone(callback))
                .collect();
            for callback in batch {
                callback();
                ran += 1;
            }
        }
        ran
    }
}

impl StreamManager for LocalStreamManager {
    fn file_location_resolver(&self) -> Option<Arc<dyn FileLocationResolver>> {
        self.resolver.read().clone()
    }

    fn set_file_location_resolver(&self, resolver: Option<Arc<dyn FileLocationResolver>>) {
        *self.resolver.write() = resolver;
    }

    fn create_device(&self, settings: &DeviceSettings, hook: Arc<dyn IoHookDeferred>) -> DeviceId {
        if self.devices.len() >= self.max_devices {
            tracing::warn!("Device limit of {} reached", self.max_devices);
            return DeviceId::INVALID;
        }
        let id = DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed));
        self.devices.insert(id, hook);
        tracing::debug!(
            "Device {:?} created ({:?}, {} byte granularity)",
            id,
            settings.scheduler,
            settings.granularity
        );
        id
    }

    fn destroy_device(&self, device: DeviceId) {
        // Drop outside the map's shard lock.
        let removed = self.devices.remove(&device);
        drop(removed);
    }

    fn current_language(&self) -> String {
        self.language.read().clone()
    }
}

impl GlobalCallbacks for LocalStreamManager {
    fn register_global_callback(
        &self,
        location: CallbackLocation,
        callback: GlobalCallback,
    ) -> Result<CallbackId> {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, location, callback));
        Ok(id)
    }

    fn unregister_global_callback(&self, id: CallbackId) {
        let removed = {
            let mut callbacks = self.callbacks.lock();
            let index = callbacks
                .iter()
                .position(|(registered, _, _)| *registered == id);
            index.map(|index| callbacks.remove(index))
        };
        drop(removed);
    }
}
