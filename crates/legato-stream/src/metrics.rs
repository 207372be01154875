//! Transfer counters for the deferred hook.
//!
//! All counters are relaxed atomics; a snapshot is only approximately
//! consistent while transfers are in flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the hook, the pool and the completion pump.
#[derive(Default)]
pub struct TransferMetrics {
    reads_submitted: AtomicU64,
    reads_completed: AtomicU64,
    reads_failed: AtomicU64,
    reads_cancelled: AtomicU64,
    bytes_read: AtomicU64,
    writes: AtomicU64,
    writes_failed: AtomicU64,
    bytes_written: AtomicU64,
    /// Reads refused because every slot was busy
    pool_exhausted: AtomicU64,
    callbacks_fired: AtomicU64,
    /// High-water mark of occupied slots
    peak_in_flight: AtomicU64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_read_submitted(&self) {
        self.reads_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_completed(&self, bytes: usize) {
        self.reads_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_failed(&self) {
        self.reads_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_cancelled(&self) {
        self.reads_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_callbacks(&self, count: usize) {
        self.callbacks_fired.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_in_flight(&self, in_flight: usize) {
        self.peak_in_flight
            .fetch_max(in_flight as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            reads_submitted: self.reads_submitted.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            reads_cancelled: self.reads_cancelled.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            callbacks_fired: self.callbacks_fired.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.reads_submitted,
            &self.reads_completed,
            &self.reads_failed,
            &self.reads_cancelled,
            &self.bytes_read,
            &self.writes,
            &self.writes_failed,
            &self.bytes_written,
            &self.pool_exhausted,
            &self.callbacks_fired,
            &self.peak_in_flight,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`TransferMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferMetricsSnapshot {
    pub reads_submitted: u64,
    pub reads_completed: u64,
    pub reads_failed: u64,
    pub reads_cancelled: u64,
    pub bytes_read: u64,
    pub writes: u64,
    pub writes_failed: u64,
    pub bytes_written: u64,
    pub pool_exhausted: u64,
    pub callbacks_fired: u64,
    pub peak_in_flight: u64,
}

impl TransferMetricsSnapshot {
    /// Reads accepted but not yet delivered.
    pub fn reads_outstanding(&self) -> u64 {
        self.reads_submitted
            .saturating_sub(self.reads_completed + self.reads_failed + self.reads_cancelled)
    }

    /// Fraction of finished reads that failed or were cancelled (0.0 - 1.0).
    pub fn failure_rate(&self) -> f32 {
        let finished = self.reads_completed + self.reads_failed + self.reads_cancelled;
        if finished == 0 {
            0.0
        } else {
            (self.reads_failed + self.reads_cancelled) as f32 / finished as f32
        }
    }

    pub fn avg_read_size(&self) -> u64 {
        if self.reads_completed == 0 {
            0
        } else {
            self.bytes_read / self.reads_completed
        }
    }

    pub fn avg_write_size(&self) -> u64 {
        if self.writes == 0 {
            0
        } else {
            self.bytes_written / self.writes
        }
    }
}
