//! Transfer descriptors exchanged between the stream manager and a device.

use crate::error::IoStatus;
use std::fmt;

/// Completion callback for one transfer. Invoked exactly once.
pub type TransferCallback = Box<dyn FnOnce(CompletedTransfer, IoStatus) + Send + 'static>;

/// Opaque handle naming one in-flight transfer.
///
/// The generation changes every time a slot is reused, so a stale handle
/// never aliases a newer transfer occupying the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl TransferId {
    #[doc(hidden)]
    pub fn from_parts(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Scheduling hints for a transfer. Accepted for interface compatibility;
/// the deferred hook does not reorder requests.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IoHeuristics {
    /// Time until the data is needed, in milliseconds.
    pub deadline_ms: f32,
    /// 0 (lowest) to 100 (highest).
    pub priority: u8,
}

/// One read or write request.
pub struct TransferInfo {
    /// Destination (read) or source (write) bytes.
    pub buffer: Vec<u8>,
    pub requested_size: usize,
    pub file_position: u64,
    pub callback: Option<TransferCallback>,
    /// Caller correlation value, handed back untouched.
    pub cookie: u64,
}

impl TransferInfo {
    /// Transfer covering the whole buffer at `file_position`.
    pub fn new(buffer: Vec<u8>, file_position: u64) -> Self {
        let requested_size = buffer.len();
        Self {
            buffer,
            requested_size,
            file_position,
            callback: None,
            cookie: 0,
        }
    }

    pub fn requested_size(mut self, size: usize) -> Self {
        self.requested_size = size;
        self
    }

    pub fn cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(CompletedTransfer, IoStatus) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Split off the buffer, leaving the bookkeeping behind.
    pub fn split(self) -> (Vec<u8>, PendingTransfer) {
        (
            self.buffer,
            PendingTransfer {
                requested_size: self.requested_size,
                file_position: self.file_position,
                callback: self.callback,
                cookie: self.cookie,
            },
        )
    }
}

impl fmt::Debug for TransferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferInfo")
            .field("buffer_len", &self.buffer.len())
            .field("requested_size", &self.requested_size)
            .field("file_position", &self.file_position)
            .field("has_callback", &self.callback.is_some())
            .field("cookie", &self.cookie)
            .finish()
    }
}

/// Transfer bookkeeping held while the buffer is away at the backend.
pub struct PendingTransfer {
    pub requested_size: usize,
    pub file_position: u64,
    pub callback: Option<TransferCallback>,
    pub cookie: u64,
}

impl PendingTransfer {
    /// Rejoin the buffer, e.g. to hand a refused transfer back.
    pub fn rejoin(self, buffer: Vec<u8>) -> TransferInfo {
        TransferInfo {
            buffer,
            requested_size: self.requested_size,
            file_position: self.file_position,
            callback: self.callback,
            cookie: self.cookie,
        }
    }

    /// Invoke the callback, if any, consuming the transfer.
    pub fn complete(
        self,
        id: Option<TransferId>,
        buffer: Vec<u8>,
        bytes_transferred: usize,
        cancelled: bool,
        status: IoStatus,
    ) {
        let PendingTransfer {
            requested_size,
            file_position,
            callback,
            cookie,
        } = self;
        if let Some(callback) = callback {
            callback(
                CompletedTransfer {
                    id,
                    buffer,
                    bytes_transferred,
                    file_position,
                    requested_size,
                    cookie,
                    cancelled,
                },
                status,
            );
        }
    }
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("requested_size", &self.requested_size)
            .field("file_position", &self.file_position)
            .field("has_callback", &self.callback.is_some())
            .field("cookie", &self.cookie)
            .finish()
    }
}

/// What a completion callback receives.
#[derive(Debug)]
pub struct CompletedTransfer {
    /// `None` for synchronous writes, which never occupy a slot.
    pub id: Option<TransferId>,
    pub buffer: Vec<u8>,
    pub bytes_transferred: usize,
    pub file_position: u64,
    pub requested_size: usize,
    pub cookie: u64,
    pub cancelled: bool,
}

impl CompletedTransfer {
    /// The bytes actually transferred.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.bytes_transferred.min(self.buffer.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_requests_whole_buffer() {
        let info = TransferInfo::new(vec![0u8; 2048], 512);
        assert_eq!(info.requested_size, 2048);
        assert_eq!(info.file_position, 512);
        assert!(info.callback.is_none());

        let info = info.requested_size(1024).cookie(5);
        assert_eq!(info.requested_size, 1024);
        assert_eq!(info.cookie, 5);
    }

    #[test]
    fn test_split_and_rejoin_keeps_everything() {
        let info = TransferInfo::new(vec![7u8; 8], 64)
            .cookie(11)
            .on_complete(|_, _| {});
        let (buffer, pending) = info.split();
        assert_eq!(buffer, vec![7u8; 8]);

        let info = pending.rejoin(buffer);
        assert_eq!(info.file_position, 64);
        assert_eq!(info.cookie, 11);
        assert!(info.callback.is_some());
    }

    #[test]
    fn test_complete_invokes_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let info = TransferInfo::new(vec![0u8; 4], 0)
            .cookie(3)
            .on_complete(move |done, status| {
                assert_eq!(status, IoStatus::Success);
                assert_eq!(done.cookie, 3);
                assert_eq!(done.data(), &[1, 2]);
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let (_, pending) = info.split();
        pending.complete(None, vec![1, 2, 0, 0], 2, false, IoStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transfer_id_parts() {
        let id = TransferId::from_parts(3, 9);
        assert_eq!(id.slot(), 3);
        assert_eq!(id.generation(), 9);
        assert_ne!(id, TransferId::from_parts(3, 10));
    }
}
