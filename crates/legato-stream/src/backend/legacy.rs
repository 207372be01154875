//! Legacy queued I/O system.
//!
//! Reads are queued to a small set of worker threads. Each request carries a
//! readiness counter starting at one; the worker (or a successful cancel)
//! stores the result and then drops the counter to zero. Nothing is pushed
//! back to the hook: the per-cycle pump polls the counters.

use super::{IoBackend, ReadOutcome, ReadParam};
use crate::config::BackendKind;
use crate::pool::{BackendTicket, ReadyList, TransferPool};
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use legato_core::{Error, Rejected, Result, SubmitResult, TransferId, TransferInfo};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thread_priority::ThreadPriority;

/// Index of a submitted request. Zero means "not submitted".
pub type RequestIndex = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Done,
}

struct Payload {
    phase: Phase,
    buffer: Option<Vec<u8>>,
    outcome: Option<ReadOutcome>,
}

/// One queued read of a file and its readiness counter.
pub struct LegacyRequest {
    path: PathBuf,
    index: AtomicU64,
    pending: AtomicI32,
    payload: Mutex<Payload>,
}

impl LegacyRequest {
    pub fn new(path: impl Into<PathBuf>, buffer: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            index: AtomicU64::new(0),
            pending: AtomicI32::new(1),
            payload: Mutex::new(Payload {
                phase: Phase::Queued,
                buffer: Some(buffer),
                outcome: None,
            }),
        })
    }

    pub fn index(&self) -> RequestIndex {
        self.index.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the counter reached zero; the outcome is then available.
    pub fn is_ready(&self) -> bool {
        self.pending.load(Ordering::Acquire) <= 0
    }

    pub fn take_outcome(&self) -> Option<ReadOutcome> {
        self.payload.lock().outcome.take()
    }

    /// Reclaim the buffer of a request that never reached a worker.
    pub fn take_buffer(&self) -> Option<Vec<u8>> {
        self.payload.lock().buffer.take()
    }

    /// Store the outcome, then release the counter.
    pub(crate) fn finish(&self, outcome: ReadOutcome) {
        {
            let mut payload = self.payload.lock();
            payload.phase = Phase::Done;
            payload.outcome = Some(outcome);
        }
        self.pending.fetch_sub(1, Ordering::Release);
    }

    /// Move from queued to running, handing the buffer to the worker.
    fn start(&self) -> Option<Vec<u8>> {
        let mut payload = self.payload.lock();
        if payload.phase != Phase::Queued {
            return None;
        }
        payload.phase = Phase::Running;
        payload.buffer.take()
    }
}

struct LegacyJob {
    request: Arc<LegacyRequest>,
    offset: u64,
    size: usize,
}

/// Worker pool servicing queued reads, with a per-path handle cache.
pub struct LegacyIoSystem {
    job_tx: Mutex<Option<Sender<LegacyJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    handles: Arc<DashMap<PathBuf, Arc<File>>>,
    next_index: AtomicU64,
}

impl LegacyIoSystem {
    pub fn start(threads: usize) -> Result<Self> {
        let (tx, rx) = unbounded();
        let handles = Arc::new(DashMap::new());

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx: Receiver<LegacyJob> = rx.clone();
            let handles = Arc::clone(&handles);
            let worker = thread::Builder::new()
                .name(format!("legato-legacy-io-{}", i))
                .spawn(move || {
                    let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                    worker_loop(rx, handles);
                })?;
            workers.push(worker);
        }

        Ok(Self {
            job_tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            handles,
            next_index: AtomicU64::new(1),
        })
    }

    /// Queue `request`. Returns the assigned index, or 0 if the system is
    /// shutting down.
    pub fn load_data(&self, request: &Arc<LegacyRequest>, offset: u64, size: usize) -> RequestIndex {
        let tx = self.job_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return 0;
        };

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        request.index.store(index, Ordering::Relaxed);
        let job = LegacyJob {
            request: Arc::clone(request),
            offset,
            size,
        };
        match tx.send(job) {
            Ok(()) => index,
            Err(_) => 0,
        }
    }

    /// Cancel a request that has not started yet. Running requests finish
    /// normally. Returns whether the request was cancelled.
    pub fn cancel_request(&self, request: &LegacyRequest) -> bool {
        let buffer = {
            let mut payload = request.payload.lock();
            if payload.phase != Phase::Queued {
                return false;
            }
            payload.buffer.take()
        };
        request.finish(ReadOutcome::cancelled(buffer.unwrap_or_default()));
        tracing::trace!("Cancelled legacy request {}", request.index());
        true
    }

    /// Drop the cached handle for `path`.
    pub fn hint_done_with_file(&self, path: &Path) {
        if self.handles.remove(path).is_some() {
            tracing::trace!("Released cached handle for {}", path.display());
        }
    }

    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting requests, let the workers drain the queue and join them.
    pub fn shutdown(&self) {
        self.job_tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        self.handles.clear();
    }
}

impl Drop for LegacyIoSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<LegacyJob>, handles: Arc<DashMap<PathBuf, Arc<File>>>) {
    while let Ok(job) = rx.recv() {
        let Some(buffer) = job.request.start() else {
            continue;
        };

        let path = job.request.path();
        let outcome = match cached_handle(&handles, path) {
            Ok(file) => ReadOutcome::read(&file, buffer, job.offset, job.size),
            Err(e) => {
                tracing::warn!("Failed to open {}: {}", path.display(), e);
                ReadOutcome::failed(buffer, &e)
            }
        };
        job.request.finish(outcome);
    }
}

fn cached_handle(handles: &DashMap<PathBuf, Arc<File>>, path: &Path) -> std::io::Result<Arc<File>> {
    if let Some(file) = handles.get(path) {
        return Ok(Arc::clone(file.value()));
    }
    let file = Arc::new(File::open(path)?);
    handles.insert(path.to_path_buf(), Arc::clone(&file));
    Ok(file)
}

/// Per-descriptor state of the legacy backend: just the path.
#[derive(Debug, Clone)]
pub struct LegacyFile {
    path: PathBuf,
}

impl LegacyFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// [`IoBackend`] over [`LegacyIoSystem`].
pub struct LegacyBackend {
    system: LegacyIoSystem,
}

impl LegacyBackend {
    pub fn new(io_threads: usize) -> Result<Self> {
        Ok(Self {
            system: LegacyIoSystem::start(io_threads)?,
        })
    }

    pub fn system(&self) -> &LegacyIoSystem {
        &self.system
    }

    fn file_of(param: &ReadParam) -> Option<&LegacyFile> {
        match param {
            ReadParam::Legacy(file) => Some(file),
            ReadParam::Native(_) => None,
        }
    }
}

impl IoBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn open_read(&self, path: &Path) -> Result<ReadParam> {
        Ok(ReadParam::Legacy(LegacyFile {
            path: path.to_path_buf(),
        }))
    }

    fn read(
        &self,
        pool: &Arc<TransferPool>,
        param: &ReadParam,
        transfer: TransferInfo,
    ) -> SubmitResult<TransferId> {
        let Some(file) = Self::file_of(param) else {
            return Err(Rejected::new(Error::WrongOpenMode("read"), transfer));
        };

        let (buffer, pending) = transfer.split();
        let offset = pending.file_position;
        let size = pending.requested_size;

        let request = LegacyRequest::new(file.path.clone(), buffer);
        let id = match pool.acquire(pending, BackendTicket::Legacy(Arc::clone(&request))) {
            Ok(id) => id,
            Err(pending) => {
                let buffer = request.take_buffer().unwrap_or_default();
                return Err(Rejected::new(
                    Error::PoolExhausted {
                        capacity: pool.capacity(),
                    },
                    pending.rejoin(buffer),
                ));
            }
        };

        if self.system.load_data(&request, offset, size) == 0 {
            let buffer = request.take_buffer().unwrap_or_default();
            return match pool.abort(id) {
                Some(pending) => Err(Rejected::new(
                    Error::Dispatch("legacy I/O system is shut down".into()),
                    pending.rejoin(buffer),
                )),
                None => {
                    debug_assert!(false, "aborted slot lost its transfer");
                    Err(Rejected::new(
                        Error::Dispatch("legacy I/O system is shut down".into()),
                        TransferInfo::new(buffer, offset),
                    ))
                }
            };
        }

        Ok(id)
    }

    fn cancel(&self, pool: &TransferPool, param: &ReadParam, id: TransferId, cancel_all: &mut bool) {
        let Some(file) = Self::file_of(param) else {
            return;
        };
        let Some(BackendTicket::Legacy(request)) = pool.lookup(id) else {
            return;
        };
        if request.path() != file.path.as_path() {
            tracing::debug!(
                "Ignoring cancel of {:?}: issued on {}, not {}",
                id,
                request.path().display(),
                file.path.display()
            );
            return;
        }
        self.system.cancel_request(&request);
        *cancel_all = false;
    }

    fn close_read(&self, _pool: &TransferPool, param: ReadParam) -> ReadyList {
        if let Some(file) = Self::file_of(&param) {
            self.system.hint_done_with_file(&file.path);
        }
        ReadyList::new()
    }

    fn drain(&self, _pool: &TransferPool) {
        self.system.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReadResult;
    use crate::metrics::TransferMetrics;
    use std::io::Write;
    use std::time::Duration;

    fn asset(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn wait_ready(request: &LegacyRequest) {
        for _ in 0..500 {
            if request.is_ready() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("legacy request never became ready");
    }

    #[test]
    fn test_load_data_reads_and_caches_handle() {
        let tmp = asset(b"legacy bytes");
        let system = LegacyIoSystem::start(1).unwrap();

        let request = LegacyRequest::new(tmp.path(), vec![0u8; 5]);
        let index = system.load_data(&request, 7, 5);
        assert_ne!(index, 0);
        assert_eq!(request.index(), index);

        wait_ready(&request);
        let outcome = request.take_outcome().unwrap();
        assert_eq!(outcome.result, ReadResult::Completed(5));
        assert_eq!(outcome.buffer, b"bytes");
        assert_eq!(system.cached_handles(), 1);

        system.hint_done_with_file(tmp.path());
        assert_eq!(system.cached_handles(), 0);
    }

    #[test]
    fn test_missing_file_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let system = LegacyIoSystem::start(1).unwrap();

        let request = LegacyRequest::new(dir.path().join("gone.wem"), vec![0u8; 4]);
        system.load_data(&request, 0, 4);
        wait_ready(&request);
        let outcome = request.take_outcome().unwrap();
        assert_eq!(outcome.result, ReadResult::Failed(std::io::ErrorKind::NotFound));
        assert_eq!(outcome.buffer.len(), 4);
    }

    #[test]
    fn test_cancel_before_start() {
        let system = LegacyIoSystem::start(1).unwrap();
        let request = LegacyRequest::new("queued.wem", vec![0u8; 4]);

        // Never submitted, so still queued.
        assert!(system.cancel_request(&request));
        assert!(request.is_ready());
        let outcome = request.take_outcome().unwrap();
        assert_eq!(outcome.result, ReadResult::Cancelled);
        assert_eq!(outcome.buffer.len(), 4);

        // Second cancel is a no-op.
        assert!(!system.cancel_request(&request));
    }

    #[test]
    fn test_load_after_shutdown_is_refused() {
        let system = LegacyIoSystem::start(1).unwrap();
        system.shutdown();
        let request = LegacyRequest::new("x", vec![0u8; 4]);
        assert_eq!(system.load_data(&request, 0, 4), 0);
        assert_eq!(request.take_buffer().map(|b| b.len()), Some(4));
    }

    #[test]
    fn test_backend_cancel_clears_cancel_all() {
        let tmp = asset(b"abcd");
        let backend = LegacyBackend::new(1).unwrap();
        let pool = Arc::new(TransferPool::new(2, Arc::new(TransferMetrics::new())));
        let param = backend.open_read(tmp.path()).unwrap();

        let id = backend
            .read(&pool, &param, TransferInfo::new(vec![0u8; 4], 0))
            .unwrap();

        let mut cancel_all = true;
        backend.cancel(&pool, &param, id, &mut cancel_all);
        assert!(!cancel_all);

        // Either cancelled in the queue or already read; the pump sees one result.
        let ready = (0..500)
            .find_map(|_| {
                let ready = pool.collect_ready(|_| true);
                if ready.is_empty() {
                    thread::sleep(Duration::from_millis(2));
                    None
                } else {
                    Some(ready)
                }
            })
            .expect("legacy read never became ready");
        assert_eq!(ready.len(), 1);
        assert!(matches!(
            ready[0].result(),
            ReadResult::Cancelled | ReadResult::Completed(4)
        ));

        // Unknown transfer leaves the flag alone.
        let mut cancel_all = true;
        backend.cancel(&pool, &param, id, &mut cancel_all);
        assert!(cancel_all);
    }

    #[test]
    fn test_backend_read_after_shutdown_returns_transfer() {
        let tmp = asset(b"abcd");
        let backend = LegacyBackend::new(1).unwrap();
        backend.system().shutdown();
        let pool = Arc::new(TransferPool::new(1, Arc::new(TransferMetrics::new())));
        let param = backend.open_read(tmp.path()).unwrap();

        let rejected = backend
            .read(&pool, &param, TransferInfo::new(vec![0u8; 4], 0).cookie(8))
            .unwrap_err();
        assert!(!rejected.is_transient());
        assert_eq!(rejected.transfer.cookie, 8);
        assert_eq!(rejected.transfer.buffer.len(), 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_cancel_ignores_transfer_of_other_file() {
        let first = asset(b"first file");
        let second = asset(b"second file");
        let backend = LegacyBackend::new(1).unwrap();
        let pool = Arc::new(TransferPool::new(2, Arc::new(TransferMetrics::new())));
        let first_param = backend.open_read(first.path()).unwrap();
        let second_param = backend.open_read(second.path()).unwrap();

        let id = backend
            .read(&pool, &first_param, TransferInfo::new(vec![0u8; 4], 0))
            .unwrap();

        let mut cancel_all = true;
        backend.cancel(&pool, &second_param, id, &mut cancel_all);
        assert!(cancel_all);

        // The read runs to completion instead of being cancelled.
        let ready = (0..500)
            .find_map(|_| {
                let ready = pool.collect_ready(|_| true);
                if ready.is_empty() {
                    thread::sleep(Duration::from_millis(2));
                    None
                } else {
                    Some(ready)
                }
            })
            .expect("legacy read never became ready");
        assert_eq!(ready[0].result(), &ReadResult::Completed(4));
    }

    #[test]
    fn test_drain_finishes_queued_reads() {
        let tmp = asset(b"drained bytes");
        let backend = LegacyBackend::new(1).unwrap();
        let pool = Arc::new(TransferPool::new(4, Arc::new(TransferMetrics::new())));
        let param = backend.open_read(tmp.path()).unwrap();

        for i in 0..3u64 {
            backend
                .read(&pool, &param, TransferInfo::new(vec![0u8; 4], i * 4))
                .unwrap();
        }
        backend.drain(&pool);

        let ready = pool.collect_ready(|_| true);
        assert_eq!(ready.len(), 3);
        assert!(ready
            .iter()
            .all(|t| matches!(t.result(), ReadResult::Completed(4))));
        assert_eq!(pool.in_flight(), 0);
    }
}
