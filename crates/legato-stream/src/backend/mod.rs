//! Asynchronous read strategies.
//!
//! Two interchangeable backends sit behind [`IoBackend`]:
//! - [`native::NativeAsyncBackend`]: one async read handle per open file,
//!   reads complete on an I/O thread pool and mark their slot ready directly.
//! - [`legacy::LegacyBackend`]: a job queue serviced by worker threads; each
//!   request decrements a readiness counter that the per-cycle pump polls.
//!
//! The strategy is chosen once, when the hook is built.

use crate::config::{BackendKind, HookConfig};
use crate::pool::{ReadyList, TransferPool};
use legato_core::{Result, SubmitResult, TransferId, TransferInfo};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

pub mod legacy;
pub mod native;

/// Per-descriptor backend state, kept in the descriptor's custom parameter.
pub enum ReadParam {
    Native(Arc<native::AsyncReadHandle>),
    Legacy(legacy::LegacyFile),
}

/// How a backend read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Bytes read; fewer than requested at end of file.
    Completed(usize),
    Cancelled,
    Failed(io::ErrorKind),
}

/// A backend read result together with the buffer coming back from I/O.
#[derive(Debug)]
pub struct ReadOutcome {
    pub buffer: Vec<u8>,
    pub result: ReadResult,
}

impl ReadOutcome {
    pub fn completed(buffer: Vec<u8>, bytes: usize) -> Self {
        Self {
            buffer,
            result: ReadResult::Completed(bytes),
        }
    }

    pub fn cancelled(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            result: ReadResult::Cancelled,
        }
    }

    pub fn failed(buffer: Vec<u8>, error: &io::Error) -> Self {
        Self {
            buffer,
            result: ReadResult::Failed(error.kind()),
        }
    }

    /// Fill `buffer[..size]` from `file` at `offset`.
    pub(crate) fn read(file: &File, mut buffer: Vec<u8>, offset: u64, size: usize) -> Self {
        let size = size.min(buffer.len());
        match read_at(file, &mut buffer[..size], offset) {
            Ok(n) => Self::completed(buffer, n),
            Err(e) => {
                tracing::warn!("Read of {} bytes at {} failed: {}", size, offset, e);
                Self::failed(buffer, &e)
            }
        }
    }
}

/// Read strategy behind the deferred hook.
pub trait IoBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Prepare `path` for reads. The file is known to exist and be non-empty.
    fn open_read(&self, path: &Path) -> Result<ReadParam>;

    /// Reserve a slot and dispatch. The buffer already covers `requested_size`.
    fn read(
        &self,
        pool: &Arc<TransferPool>,
        param: &ReadParam,
        transfer: TransferInfo,
    ) -> SubmitResult<TransferId>;

    /// Best-effort cancellation; clears `cancel_all` when only `id` was cancelled.
    fn cancel(&self, pool: &TransferPool, param: &ReadParam, id: TransferId, cancel_all: &mut bool);

    /// Release the descriptor's backend state.
    ///
    /// Returns transfers that finished during the close and must be delivered
    /// before the close returns.
    fn close_read(&self, pool: &TransferPool, param: ReadParam) -> ReadyList;

    /// Let every dispatched read finish so one last pump can deliver it.
    /// Called when the device terminates.
    fn drain(&self, pool: &TransferPool);
}

/// Build the backend named in `config`.
pub fn create_backend(config: &HookConfig) -> Result<Box<dyn IoBackend>> {
    let backend: Box<dyn IoBackend> = match config.backend {
        BackendKind::NativeAsync => Box::new(native::NativeAsyncBackend::new(config.io_threads)?),
        BackendKind::Legacy => Box::new(legacy::LegacyBackend::new(config.io_threads)?),
    };
    tracing::info!(
        "Using {:?} read backend with {} I/O threads",
        config.backend,
        config.io_threads
    );
    Ok(backend)
}

/// Positional read that fills as much of `buf` as the file allows.
///
/// Does not touch the file cursor, so concurrent reads on one handle are fine.
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match positional_read(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(not(any(unix, windows)))]
fn positional_read(mut file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(bytes: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        (tmp, file)
    }

    #[test]
    fn test_read_at_offset() {
        let (_tmp, file) = file_with(b"0123456789");
        let mut buf = [0u8; 4];
        assert_eq!(read_at(&file, &mut buf, 3).unwrap(), 4);
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn test_read_at_short_at_eof() {
        let (_tmp, file) = file_with(b"0123456789");
        let mut buf = [0u8; 8];
        assert_eq!(read_at(&file, &mut buf, 6).unwrap(), 4);
        assert_eq!(&buf[..4], b"6789");
        assert_eq!(read_at(&file, &mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn test_outcome_read_clamps_to_buffer() {
        let (_tmp, file) = file_with(b"abcdef");
        let outcome = ReadOutcome::read(&file, vec![0u8; 2], 0, 6);
        assert_eq!(outcome.result, ReadResult::Completed(2));
        assert_eq!(outcome.buffer, b"ab");
    }

    #[test]
    fn test_create_backend_matches_config() {
        let config = HookConfig::default().backend(BackendKind::Legacy).io_threads(1);
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.kind(), BackendKind::Legacy);

        let config = HookConfig::default().backend(BackendKind::NativeAsync).io_threads(1);
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.kind(), BackendKind::NativeAsync);
    }
}
