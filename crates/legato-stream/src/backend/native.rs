//! Native asynchronous read handles.
//!
//! Every open file gets an [`AsyncReadHandle`]; each read becomes an
//! [`AsyncReadRequest`] executed on a shared rayon pool. The completion
//! closure runs on the I/O thread and only marks the slot ready; callbacks
//! are left to the pump.
//!
//! Individual requests cannot be cancelled through the hook. Closing a handle
//! cancels and waits for everything still outstanding on it, including
//! callbacks another thread's pump is firing.

use super::{IoBackend, ReadOutcome, ReadParam};
use crate::config::BackendKind;
use crate::pool::{BackendTicket, ReadyList, TransferPool};
use legato_core::{Error, Rejected, Result, SubmitResult, TransferId, TransferInfo};
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type HandleId = u64;

/// One read issued against an [`AsyncReadHandle`].
pub struct AsyncReadRequest {
    cancelled: AtomicBool,
    complete: Mutex<bool>,
    done: Condvar,
}

impl AsyncReadRequest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            complete: Mutex::new(false),
            done: Condvar::new(),
        })
    }

    /// Ask the request not to touch the disk. Has no effect once it started.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        *self.complete.lock()
    }

    /// Block until the completion closure has run.
    pub fn wait_completion(&self) {
        let mut complete = self.complete.lock();
        while !*complete {
            self.done.wait(&mut complete);
        }
    }

    fn finish(&self) {
        *self.complete.lock() = true;
        self.done.notify_all();
    }
}

/// Async read handle for one open file.
pub struct AsyncReadHandle {
    id: HandleId,
    path: PathBuf,
    file: Arc<File>,
    io_pool: Arc<rayon::ThreadPool>,
}

impl AsyncReadHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a read of `size` bytes at `offset` into `buffer`.
    ///
    /// `on_done` runs on an I/O thread; `request` is marked complete only
    /// after it returns.
    pub fn read_request<F>(
        &self,
        request: Arc<AsyncReadRequest>,
        offset: u64,
        size: usize,
        buffer: Vec<u8>,
        on_done: F,
    ) where
        F: FnOnce(ReadOutcome) + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        self.io_pool.spawn(move || {
            let outcome = if request.is_cancelled() {
                ReadOutcome::cancelled(buffer)
            } else {
                ReadOutcome::read(&file, buffer, offset, size)
            };
            on_done(outcome);
            request.finish();
        });
    }
}

/// Backend issuing positional reads on a dedicated rayon pool.
pub struct NativeAsyncBackend {
    io_pool: Arc<rayon::ThreadPool>,
    next_handle: AtomicU64,
}

impl NativeAsyncBackend {
    pub fn new(io_threads: usize) -> Result<Self> {
        let io_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(io_threads)
            .thread_name(|i| format!("legato-io-{}", i))
            .build()
            .map_err(|e| Error::Dispatch(e.to_string()))?;

        Ok(Self {
            io_pool: Arc::new(io_pool),
            next_handle: AtomicU64::new(1),
        })
    }

    fn handle_of(param: &ReadParam) -> Option<&Arc<AsyncReadHandle>> {
        match param {
            ReadParam::Native(handle) => Some(handle),
            ReadParam::Legacy(_) => None,
        }
    }
}

impl IoBackend for NativeAsyncBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeAsync
    }

    fn open_read(&self, path: &Path) -> Result<ReadParam> {
        let file = File::open(path)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Async handle {} for {}", id, path.display());
        Ok(ReadParam::Native(Arc::new(AsyncReadHandle {
            id,
            path: path.to_path_buf(),
            file: Arc::new(file),
            io_pool: Arc::clone(&self.io_pool),
        })))
    }

    fn read(
        &self,
        pool: &Arc<TransferPool>,
        param: &ReadParam,
        transfer: TransferInfo,
    ) -> SubmitResult<TransferId> {
        let Some(handle) = Self::handle_of(param) else {
            return Err(Rejected::new(Error::WrongOpenMode("read"), transfer));
        };

        let (buffer, pending) = transfer.split();
        let offset = pending.file_position;
        let size = pending.requested_size;

        // The request lives in the slot before the read is queued, so a close
        // racing this submission always finds it.
        let request = AsyncReadRequest::new();
        let ticket = BackendTicket::Native {
            handle: handle.id(),
            request: Arc::clone(&request),
        };
        let id = match pool.acquire(pending, ticket) {
            Ok(id) => id,
            Err(pending) => {
                return Err(Rejected::new(
                    Error::PoolExhausted {
                        capacity: pool.capacity(),
                    },
                    pending.rejoin(buffer),
                ))
            }
        };

        let completions = Arc::clone(pool);
        handle.read_request(request, offset, size, buffer, move |outcome| {
            completions.complete(id, outcome);
        });
        Ok(id)
    }

    fn cancel(&self, _pool: &TransferPool, _param: &ReadParam, id: TransferId, _cancel_all: &mut bool) {
        tracing::trace!("Ignoring cancel of {:?}; async reads are drained on close", id);
    }

    fn close_read(&self, pool: &TransferPool, param: ReadParam) -> ReadyList {
        let Some(handle) = Self::handle_of(&param) else {
            return ReadyList::new();
        };

        let outstanding = pool.native_requests_for(handle.id());
        if !outstanding.is_empty() {
            tracing::debug!(
                "Draining {} outstanding reads on {}",
                outstanding.len(),
                handle.path().display()
            );
        }
        for request in &outstanding {
            request.cancel();
        }
        for request in &outstanding {
            request.wait_completion();
        }

        // Every request has completed, so the handle's transfers are either
        // ready in the pool or already out with a concurrent pump.
        let handle_id = handle.id();
        let drained = pool.take_ready_for(handle_id);
        pool.wait_delivered(handle_id);
        drained
    }

    fn drain(&self, pool: &TransferPool) {
        for request in pool.all_native_requests() {
            request.wait_completion();
        }
    }
}
