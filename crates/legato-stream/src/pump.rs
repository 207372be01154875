//! Completion pump.
//!
//! Runs on the caller's thread (the audio cycle's global callback, or
//! [`DeferredIoHook::update`](crate::DeferredIoHook::update)) and fires the
//! callbacks of every transfer whose data has arrived. Slots are released
//! before callbacks run, so a callback may immediately issue a new read.

use crate::backend::ReadResult;
use crate::metrics::TransferMetrics;
use crate::pool::{ReadyList, TransferPool};
use std::sync::Arc;

pub struct CompletionPump {
    pool: Arc<TransferPool>,
    metrics: Arc<TransferMetrics>,
}

impl CompletionPump {
    pub fn new(pool: Arc<TransferPool>, metrics: Arc<TransferMetrics>) -> Self {
        Self { pool, metrics }
    }

    /// Deliver every ready transfer. Returns the number of callbacks fired.
    pub fn pump(&self) -> usize {
        let ready = self.pool.collect_ready(|_| true);
        self.deliver(ready)
    }

    /// Fire callbacks for transfers already taken out of the pool.
    pub fn deliver(&self, ready: ReadyList) -> usize {
        let count = ready.len();
        for transfer in ready {
            match transfer.result() {
                ReadResult::Completed(bytes) => self.metrics.record_read_completed(*bytes),
                ReadResult::Cancelled => self.metrics.record_read_cancelled(),
                ReadResult::Failed(kind) => {
                    tracing::debug!("Transfer {:?} failed: {:?}", transfer.id, kind);
                    self.metrics.record_read_failed();
                }
            }
            transfer.fire();
        }
        if count > 0 {
            self.metrics.record_callbacks(count);
            tracing::trace!("Delivered {} transfers", count);
        }
        count
    }
}
