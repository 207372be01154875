//! The deferred I/O hook.
//!
//! [`DeferredIoHook`] is registered with the stream manager twice: as the
//! file location resolver (turning references into open descriptors) and as
//! the I/O target of one deferred streaming device. Reads go through the
//! configured [`IoBackend`]; writes are synchronous.

use crate::backend::{create_backend, IoBackend, ReadParam};
use crate::config::{BackendKind, HookConfig};
use crate::metrics::TransferMetrics;
use crate::pool::TransferPool;
use crate::pump::CompletionPump;
use crate::resolver::PathResolver;
use legato_core::{
    CallbackId, CallbackLocation, DeviceDescription, DeviceId, Error, FileDescriptor,
    FileLocationResolver, FileReference, FileSystemFlags, GlobalCallback, GlobalCallbacks,
    IoHeuristics, IoHookDeferred, IoStatus, OpenMode, Rejected, Result, StreamManager,
    SubmitResult, TransferId, TransferInfo,
};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Weak};

/// What the hook keeps in a descriptor's custom parameter.
pub(crate) enum HookFile {
    Read(ReadParam),
    Write(Mutex<File>),
}

/// Deferred streaming device and file location resolver.
///
/// Always lives in an `Arc`; build one with [`DeferredIoHook::builder`].
pub struct DeferredIoHook {
    pub(crate) config: HookConfig,
    resolver: PathResolver,
    pool: Arc<TransferPool>,
    pub(crate) backend: Box<dyn IoBackend>,
    pump: CompletionPump,
    metrics: Arc<TransferMetrics>,
    pub(crate) manager: Arc<dyn StreamManager>,
    pub(crate) callbacks: Option<Arc<dyn GlobalCallbacks>>,
    pub(crate) device_id: Mutex<DeviceId>,
    pub(crate) global_callback: Mutex<Option<CallbackId>>,
    pub(crate) weak_self: Weak<DeferredIoHook>,
}

/// Builder for [`DeferredIoHook`].
pub struct DeferredIoHookBuilder {
    manager: Arc<dyn StreamManager>,
    callbacks: Option<Arc<dyn GlobalCallbacks>>,
    config: HookConfig,
}

impl DeferredIoHookBuilder {
    pub fn config(mut self, config: HookConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry the completion pump joins, on the first read, as a
    /// begin-render callback.
    ///
    /// Without one, the host must call [`DeferredIoHook::update`] itself.
    pub fn global_callbacks(mut self, callbacks: Arc<dyn GlobalCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn build(self) -> Result<Arc<DeferredIoHook>> {
        self.config.validate()?;

        let backend = create_backend(&self.config)?;
        let metrics = Arc::new(TransferMetrics::new());
        let pool = Arc::new(TransferPool::new(
            self.config.pool_capacity,
            Arc::clone(&metrics),
        ));
        let pump = CompletionPump::new(Arc::clone(&pool), Arc::clone(&metrics));
        let resolver = PathResolver::new(self.config.max_path_len);

        let hook = Arc::new_cyclic(|weak_self| DeferredIoHook {
            config: self.config,
            resolver,
            pool,
            backend,
            pump,
            metrics,
            manager: self.manager,
            callbacks: self.callbacks,
            device_id: Mutex::new(DeviceId::INVALID),
            global_callback: Mutex::new(None),
            weak_self: weak_self.clone(),
        });

        if let Some(base) = hook.config.base_path.clone() {
            if !hook.set_base_path(&base) {
                return Err(Error::Config(format!(
                    "base path {} is not a usable directory",
                    base.display()
                )));
            }
        }

        Ok(hook)
    }
}

impl DeferredIoHook {
    pub fn builder(manager: Arc<dyn StreamManager>) -> DeferredIoHookBuilder {
        DeferredIoHookBuilder {
            manager,
            callbacks: None,
            config: HookConfig::default(),
        }
    }

    /// Set the root directory for resolved files.
    ///
    /// Returns false if the path is too long (nothing stored) or does not
    /// exist (stored anyway).
    pub fn set_base_path(&self, path: impl AsRef<Path>) -> bool {
        let language = self.manager.current_language();
        let ok = self.resolver.set_base_path(path.as_ref(), &language);
        if ok {
            tracing::info!("Streaming base path set to {}", self.resolver.base_path());
        }
        ok
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn pool(&self) -> &Arc<TransferPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<TransferMetrics> {
        &self.metrics
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn device_id(&self) -> DeviceId {
        *self.device_id.lock()
    }

    /// Fire callbacks for every transfer whose data has arrived.
    ///
    /// Safe to call from any thread, and from inside a transfer callback.
    pub fn update(&self) -> usize {
        self.pump.pump()
    }

    /// Register the per-cycle pump on first use.
    fn ensure_global_pump(&self) -> Result<()> {
        let Some(callbacks) = &self.callbacks else {
            return Ok(());
        };
        let mut registered = self.global_callback.lock();
        if registered.is_some() {
            return Ok(());
        }

        let hook = self.weak_self.clone();
        let pump: GlobalCallback = Arc::new(move || {
            if let Some(hook) = hook.upgrade() {
                hook.update();
            }
        });
        let id = callbacks.register_global_callback(CallbackLocation::BeginRender, pump)?;
        tracing::info!("Registered completion pump as global callback {:?}", id);
        *registered = Some(id);
        Ok(())
    }

    fn open_for_read(&self, path: &Path, desc: &mut FileDescriptor) -> Result<()> {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(Error::FileUnavailable(path.to_path_buf()));
        }

        let param = self.backend.open_read(path)?;
        desc.file_size = size;
        desc.custom_param = Some(Box::new(HookFile::Read(param)));
        Ok(())
    }

    fn open_for_write(&self, path: &Path, desc: &mut FileDescriptor) -> Result<()> {
        let file = File::create(path)?;
        desc.opened_synchronously = true;
        desc.custom_param = Some(Box::new(HookFile::Write(Mutex::new(file))));
        Ok(())
    }
}

impl FileLocationResolver for DeferredIoHook {
    fn open(
        &self,
        reference: &FileReference,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
    ) -> Result<FileDescriptor> {
        let mut desc = FileDescriptor::new(self.device_id());

        if mode == OpenMode::ReadWrite {
            return Err(Error::NotImplemented("read/write open mode".into()));
        }

        let language = self.manager.current_language();
        let path = self
            .resolver
            .resolve(reference, mode, flags, &language)
            .inspect_err(|e| tracing::debug!("Cannot resolve {}: {}", reference, e))?;

        let opened = if mode.is_write() {
            self.open_for_write(&path, &mut desc)
        } else {
            self.open_for_read(&path, &mut desc)
        };
        if let Err(e) = opened {
            tracing::warn!("Failed to open {}: {}", path.display(), e);
            return Err(e);
        }

        tracing::debug!(
            "Opened {} ({:?}, {} bytes)",
            path.display(),
            mode,
            desc.file_size
        );
        Ok(desc)
    }
}

impl IoHookDeferred for DeferredIoHook {
    fn read(
        &self,
        desc: &FileDescriptor,
        _heuristics: &IoHeuristics,
        transfer: TransferInfo,
    ) -> SubmitResult<TransferId> {
        let Some(HookFile::Read(param)) = desc.custom::<HookFile>() else {
            return Err(Rejected::new(Error::WrongOpenMode("read"), transfer));
        };

        if transfer.buffer.len() < transfer.requested_size {
            let error = Error::InvalidParameter(format!(
                "buffer of {} bytes cannot hold {} requested",
                transfer.buffer.len(),
                transfer.requested_size
            ));
            return Err(Rejected::new(error, transfer));
        }

        if let Err(e) = self.ensure_global_pump() {
            tracing::warn!("Cannot schedule completions: {}", e);
            return Err(Rejected::new(e, transfer));
        }

        match self.backend.read(&self.pool, param, transfer) {
            Ok(id) => {
                self.metrics.record_read_submitted();
                Ok(id)
            }
            Err(rejected) => {
                if !rejected.is_transient() {
                    tracing::warn!("Read dispatch failed: {}", rejected.error);
                }
                Err(rejected)
            }
        }
    }

    fn write(
        &self,
        desc: &FileDescriptor,
        _heuristics: &IoHeuristics,
        transfer: TransferInfo,
    ) -> SubmitResult<()> {
        let Some(HookFile::Write(file)) = desc.custom::<HookFile>() else {
            return Err(Rejected::new(Error::WrongOpenMode("write"), transfer));
        };

        let size = transfer.requested_size;
        if transfer.buffer.len() < size {
            let error = Error::InvalidParameter(format!(
                "buffer of {} bytes cannot supply {} requested",
                transfer.buffer.len(),
                size
            ));
            return Err(Rejected::new(error, transfer));
        }

        let written = {
            let mut file = file.lock();
            file.seek(SeekFrom::Start(transfer.file_position))
                .and_then(|_| file.write_all(&transfer.buffer[..size]))
        };
        if let Err(e) = written {
            tracing::warn!("Write of {} bytes at {} failed: {}", size, transfer.file_position, e);
            self.metrics.record_write_failed();
            return Err(Rejected::new(Error::Io(e), transfer));
        }

        self.metrics.record_write(size);
        let (buffer, pending) = transfer.split();
        pending.complete(None, buffer, size, false, IoStatus::Success);
        Ok(())
    }

    fn cancel(&self, desc: &FileDescriptor, transfer: TransferId, cancel_all: &mut bool) {
        if let Some(HookFile::Read(param)) = desc.custom::<HookFile>() {
            self.backend.cancel(&self.pool, param, transfer, cancel_all);
        }
    }

    fn close(&self, mut desc: FileDescriptor) -> Result<()> {
        let Some(file) = desc.take_custom::<HookFile>() else {
            return Ok(());
        };

        match *file {
            HookFile::Read(param) => {
                let drained = self.backend.close_read(&self.pool, param);
                let delivered = self.pump.deliver(drained);
                if delivered > 0 {
                    tracing::debug!("Delivered {} drained transfers on close", delivered);
                }
            }
            HookFile::Write(file) => {
                file.into_inner().sync_data()?;
            }
        }
        Ok(())
    }

    fn block_size(&self, _desc: &FileDescriptor) -> u32 {
        1
    }

    fn device_description(&self) -> DeviceDescription {
        DeviceDescription {
            device_id: self.device_id(),
            name: self.config.device_name.clone(),
            can_read: true,
            can_write: true,
        }
    }

    fn device_data(&self) -> u32 {
        0
    }
}
