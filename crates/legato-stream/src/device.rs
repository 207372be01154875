//! Device lifecycle: binding the hook to a stream manager and releasing it.

use crate::hook::DeferredIoHook;
use legato_core::{
    is_same_resolver, DeviceId, DeviceSettings, Error, FileLocationResolver, Result, SchedulerType,
};
use std::sync::Arc;

impl DeferredIoHook {
    /// Register with the stream manager and create the streaming device.
    ///
    /// Becomes the file location resolver only if none is registered yet.
    ///
    /// # Panics
    ///
    /// Panics unless `settings` asks for the deferred lined-up scheduler.
    pub fn init(&self, settings: &DeviceSettings) -> Result<DeviceId> {
        assert_eq!(
            settings.scheduler,
            SchedulerType::DeferredLinedUp,
            "deferred I/O hook requires the deferred lined-up scheduler"
        );

        let Some(this) = self.weak_self.upgrade() else {
            return Err(Error::DeviceCreation);
        };

        if self.manager.file_location_resolver().is_none() {
            let resolver: Arc<dyn FileLocationResolver> = this.clone();
            self.manager.set_file_location_resolver(Some(resolver));
            tracing::info!("Registered as file location resolver");
        }

        let device_id = self.manager.create_device(settings, this);
        if !device_id.is_valid() {
            tracing::error!("Stream manager refused to create {}", self.config.device_name);
            return Err(Error::DeviceCreation);
        }

        *self.device_id.lock() = device_id;
        tracing::info!("Created streaming device {:?} ({})", device_id, self.config.device_name);
        Ok(device_id)
    }

    /// Undo [`init`](Self::init). Safe to call more than once.
    ///
    /// Reads still in flight finish and have their callbacks fired on the
    /// calling thread before this returns. The legacy backend accepts no
    /// reads afterwards.
    pub fn term(&self) {
        if let Some(id) = self.global_callback.lock().take() {
            if let Some(callbacks) = &self.callbacks {
                callbacks.unregister_global_callback(id);
                tracing::info!("Unregistered global callback {:?}", id);
            }
        }

        self.backend.drain(self.pool());
        let delivered = self.update();
        if delivered > 0 {
            tracing::debug!("Delivered {} transfers on terminate", delivered);
        }

        if let Some(current) = self.manager.file_location_resolver() {
            if is_same_resolver(&current, self) {
                self.manager.set_file_location_resolver(None);
                tracing::info!("Unregistered file location resolver");
            }
        }

        let device_id = std::mem::replace(&mut *self.device_id.lock(), DeviceId::INVALID);
        if device_id.is_valid() {
            self.manager.destroy_device(device_id);
            tracing::info!("Destroyed streaming device {:?}", device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BackendKind, HookConfig};
    use crate::hook::DeferredIoHook;
    use crate::host::LocalStreamManager;
    use legato_core::{
        DeviceSettings, Error, FileDescriptor, FileLocationResolver, FileReference,
        FileSystemFlags, IoHeuristics, OpenMode, Result, SchedulerType, StreamManager,
        TransferInfo,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct OtherResolver;

    impl FileLocationResolver for OtherResolver {
        fn open(
            &self,
            _reference: &FileReference,
            _mode: OpenMode,
            _flags: Option<&FileSystemFlags>,
        ) -> Result<FileDescriptor> {
            Err(Error::NotImplemented("test resolver".into()))
        }
    }

    fn hook(manager: &Arc<LocalStreamManager>, backend: BackendKind) -> Arc<DeferredIoHook> {
        DeferredIoHook::builder(manager.clone())
            .global_callbacks(manager.clone())
            .config(HookConfig::default().backend(backend).io_threads(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_init_registers_resolver_and_device() {
        let manager = Arc::new(LocalStreamManager::new());
        let hook = hook(&manager, BackendKind::NativeAsync);

        let id = hook.init(&DeviceSettings::default()).unwrap();
        assert!(id.is_valid());
        assert_eq!(hook.device_id(), id);
        assert_eq!(manager.device_count(), 1);
        assert!(manager.file_location_resolver().is_some());

        hook.term();
        assert_eq!(manager.device_count(), 0);
        assert!(manager.file_location_resolver().is_none());
        assert!(!hook.device_id().is_valid());

        // Second term is harmless.
        hook.term();
    }

    #[test]
    fn test_init_keeps_foreign_resolver() {
        let manager = Arc::new(LocalStreamManager::new());
        let other: Arc<dyn FileLocationResolver> = Arc::new(OtherResolver);
        manager.set_file_location_resolver(Some(other.clone()));

        let hook = hook(&manager, BackendKind::NativeAsync);
        hook.init(&DeviceSettings::default()).unwrap();
        let current = manager.file_location_resolver().unwrap();
        assert!(Arc::ptr_eq(&current, &other));

        hook.term();
        let current = manager.file_location_resolver().unwrap();
        assert!(Arc::ptr_eq(&current, &other));
    }

    #[test]
    fn test_init_fails_when_device_refused() {
        let manager = Arc::new(LocalStreamManager::with_max_devices(0));
        let hook = hook(&manager, BackendKind::NativeAsync);
        let err = hook.init(&DeviceSettings::default()).unwrap_err();
        assert!(matches!(err, Error::DeviceCreation));
        hook.term();
    }

    #[test]
    #[should_panic(expected = "deferred lined-up scheduler")]
    fn test_init_rejects_blocking_scheduler() {
        let manager = Arc::new(LocalStreamManager::new());
        let hook = hook(&manager, BackendKind::NativeAsync);
        let settings = DeviceSettings {
            scheduler: SchedulerType::Blocking,
            ..Default::default()
        };
        let _ = hook.init(&settings);
    }

    #[test]
    fn test_term_unregisters_global_pump() {
        let manager = Arc::new(LocalStreamManager::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wem"), [1u8; 32]).unwrap();

        let hook = hook(&manager, BackendKind::Legacy);
        hook.set_base_path(dir.path());
        hook.init(&DeviceSettings::default()).unwrap();

        let desc = hook.open(&"a.wem".into(), OpenMode::Read, None).unwrap();
        legato_core::IoHookDeferred::read(
            hook.as_ref(),
            &desc,
            &IoHeuristics::default(),
            TransferInfo::new(vec![0u8; 8], 0),
        )
        .unwrap();
        assert_eq!(manager.callback_count(), 1);

        while hook.pool().in_flight() > 0 {
            manager.run_cycle();
            std::thread::yield_now();
        }
        legato_core::IoHookDeferred::close(hook.as_ref(), desc).unwrap();

        hook.term();
        assert_eq!(manager.callback_count(), 0);
    }

    #[test]
    fn test_term_delivers_in_flight_legacy_reads() {
        let manager = Arc::new(LocalStreamManager::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wem"), [2u8; 64]).unwrap();

        let hook = hook(&manager, BackendKind::Legacy);
        hook.set_base_path(dir.path());
        hook.init(&DeviceSettings::default()).unwrap();
        let desc = hook.open(&"a.wem".into(), OpenMode::Read, None).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        for i in 0..4u64 {
            let fired = Arc::clone(&fired);
            let transfer = TransferInfo::new(vec![0u8; 16], i * 16).on_complete(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            legato_core::IoHookDeferred::read(hook.as_ref(), &desc, &IoHeuristics::default(), transfer)
                .unwrap();
        }

        // No cycle ever runs; terminating must still deliver every read once.
        hook.term();
        assert_eq!(fired.load(Ordering::SeqCst), 4);
        assert_eq!(hook.pool().in_flight(), 0);

        hook.term();
        assert_eq!(fired.load(Ordering::SeqCst), 4);
    }
}
