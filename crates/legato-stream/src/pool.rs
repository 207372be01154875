//! Fixed-capacity pool of transfer slots.
//!
//! Each slot walks `Free -> InProgress -> ReadyForCallback -> Free`. All slot
//! state sits behind one mutex, held only for bookkeeping and never while a
//! transfer callback runs.
//!
//! Native transfers stay counted against their handle from the moment they
//! leave the pool until their callback has returned, so closing a handle can
//! wait out deliveries running on another thread.

use crate::backend::legacy::LegacyRequest;
use crate::backend::native::{AsyncReadRequest, HandleId};
use crate::backend::{ReadOutcome, ReadResult};
use crate::metrics::TransferMetrics;
use legato_core::{IoStatus, PendingTransfer, TransferId};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

thread_local! {
    /// Handles whose callbacks are running on this thread, innermost last.
    static FIRING: RefCell<SmallVec<[HandleId; 2]>> = RefCell::new(SmallVec::new());
}

fn firing_on_this_thread(handle: HandleId) -> bool {
    FIRING.with(|firing| firing.borrow().contains(&handle))
}

struct FiringScope;

impl FiringScope {
    fn enter(handle: HandleId) -> Self {
        FIRING.with(|firing| firing.borrow_mut().push(handle));
        FiringScope
    }
}

impl Drop for FiringScope {
    fn drop(&mut self) {
        FIRING.with(|firing| {
            firing.borrow_mut().pop();
        });
    }
}

/// Per-handle count of native transfers out of the pool with callbacks
/// still to return.
#[derive(Default)]
struct Deliveries {
    pending: Mutex<HashMap<HandleId, usize>>,
    idle: Condvar,
}

impl Deliveries {
    fn begin(&self, handle: HandleId) {
        *self.pending.lock().entry(handle).or_insert(0) += 1;
    }

    fn end(&self, handle: HandleId) {
        let mut pending = self.pending.lock();
        let Some(count) = pending.get_mut(&handle) else {
            debug_assert!(false, "delivery end without begin for handle {}", handle);
            return;
        };
        *count -= 1;
        if *count == 0 {
            pending.remove(&handle);
            self.idle.notify_all();
        }
    }

    fn count(&self, handle: HandleId) -> usize {
        self.pending.lock().get(&handle).copied().unwrap_or(0)
    }

    fn wait_idle(&self, handle: HandleId) {
        let mut pending = self.pending.lock();
        while pending.contains_key(&handle) {
            self.idle.wait(&mut pending);
        }
    }
}

/// Holds a handle's delivery count up until the transfer is fired or dropped.
struct DeliveryGuard {
    deliveries: Arc<Deliveries>,
    handle: HandleId,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        self.deliveries.end(self.handle);
    }
}

/// Lifecycle state of a transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available for reservation.
    Free,
    /// Dispatched to a backend.
    InProgress,
    /// Data transfer finished; waiting for the pump to fire the callback.
    ReadyForCallback,
}

/// Backend-side handle for whatever a slot is waiting on.
#[derive(Clone)]
pub enum BackendTicket {
    None,
    Native {
        handle: HandleId,
        request: Arc<AsyncReadRequest>,
    },
    Legacy(Arc<LegacyRequest>),
}

impl BackendTicket {
    pub fn is_native_for(&self, handle_id: HandleId) -> bool {
        matches!(self, BackendTicket::Native { handle, .. } if *handle == handle_id)
    }
}

struct TransferSlot {
    state: SlotState,
    generation: u32,
    transfer: Option<PendingTransfer>,
    outcome: Option<ReadOutcome>,
    ticket: BackendTicket,
}

impl TransferSlot {
    fn free() -> Self {
        Self {
            state: SlotState::Free,
            generation: 0,
            transfer: None,
            outcome: None,
            ticket: BackendTicket::None,
        }
    }

    #[inline]
    fn owned_by(&self, id: TransferId) -> bool {
        self.state != SlotState::Free && self.generation == id.generation()
    }

    fn release(&mut self) {
        debug_assert_ne!(self.state, SlotState::Free, "releasing a free slot");
        self.state = SlotState::Free;
        self.generation = self.generation.wrapping_add(1);
        self.transfer = None;
        self.outcome = None;
        self.ticket = BackendTicket::None;
    }
}

/// A finished transfer taken out of the pool, ready to have its callback fired.
pub struct ReadyTransfer {
    pub id: TransferId,
    handle: Option<HandleId>,
    transfer: PendingTransfer,
    outcome: ReadOutcome,
    delivery: Option<DeliveryGuard>,
}

impl ReadyTransfer {
    pub fn result(&self) -> &ReadResult {
        &self.outcome.result
    }

    /// Native handle the transfer was read through.
    pub fn handle(&self) -> Option<HandleId> {
        self.handle
    }

    /// Fire the completion callback. Consumes the transfer.
    ///
    /// A tracked native transfer stops counting against its handle only
    /// after the callback has returned.
    pub fn fire(self) -> IoStatus {
        let ReadyTransfer {
            id,
            handle,
            transfer,
            outcome,
            delivery,
        } = self;
        let (bytes, cancelled, status) = match outcome.result {
            ReadResult::Completed(n) => (n, false, IoStatus::Success),
            ReadResult::Cancelled => (0, true, IoStatus::Fail),
            ReadResult::Failed(_) => (0, false, IoStatus::Fail),
        };

        let firing = handle.map(FiringScope::enter);
        transfer.complete(Some(id), outcome.buffer, bytes, cancelled, status);
        drop(firing);
        drop(delivery);
        status
    }
}

pub type ReadyList = SmallVec<[ReadyTransfer; 8]>;

/// Bounded pool of in-flight transfers.
pub struct TransferPool {
    slots: Mutex<Vec<TransferSlot>>,
    capacity: usize,
    metrics: Arc<TransferMetrics>,
    deliveries: Arc<Deliveries>,
}

impl TransferPool {
    pub fn new(capacity: usize, metrics: Arc<TransferMetrics>) -> Self {
        assert!(capacity > 0, "transfer pool needs at least one slot");
        Self {
            slots: Mutex::new((0..capacity).map(|_| TransferSlot::free()).collect()),
            capacity,
            metrics,
            deliveries: Arc::new(Deliveries::default()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently not free.
    pub fn in_flight(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.state != SlotState::Free)
            .count()
    }

    /// Reserve a free slot for `transfer`, marking it in progress.
    ///
    /// A saturated pool hands the transfer back; that is a transient
    /// condition, the caller retries once the pump has released slots.
    pub fn acquire(
        &self,
        transfer: PendingTransfer,
        ticket: BackendTicket,
    ) -> Result<TransferId, PendingTransfer> {
        let mut slots = self.slots.lock();
        let Some(index) = slots.iter().position(|s| s.state == SlotState::Free) else {
            drop(slots);
            self.metrics.record_pool_exhausted();
            tracing::debug!("Transfer pool exhausted ({} slots)", self.capacity);
            return Err(transfer);
        };

        let slot = &mut slots[index];
        slot.state = SlotState::InProgress;
        slot.transfer = Some(transfer);
        slot.outcome = None;
        slot.ticket = ticket;
        let id = TransferId::from_parts(index as u32, slot.generation);

        let in_flight = slots.iter().filter(|s| s.state != SlotState::Free).count();
        drop(slots);
        self.metrics.record_in_flight(in_flight);
        Ok(id)
    }

    /// Backend handle of the slot owning `id`, if the transfer is still pending.
    pub fn lookup(&self, id: TransferId) -> Option<BackendTicket> {
        let slots = self.slots.lock();
        slots
            .get(id.slot())
            .filter(|s| s.owned_by(id))
            .map(|s| s.ticket.clone())
    }

    pub fn state_of(&self, id: TransferId) -> Option<SlotState> {
        let slots = self.slots.lock();
        slots.get(id.slot()).map(|s| {
            if s.generation == id.generation() {
                s.state
            } else {
                SlotState::Free
            }
        })
    }

    /// Record a backend result and hand the slot to the pump.
    ///
    /// Called from I/O completion threads. Returns false if `id` no longer
    /// names an in-progress transfer.
    pub fn complete(&self, id: TransferId, outcome: ReadOutcome) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(id.slot()) {
            Some(slot) if slot.owned_by(id) && slot.state == SlotState::InProgress => {
                slot.outcome = Some(outcome);
                slot.state = SlotState::ReadyForCallback;
                true
            }
            _ => {
                debug_assert!(false, "completion for stale transfer {:?}", id);
                tracing::error!("Completion for stale transfer {:?} dropped", id);
                false
            }
        }
    }

    /// Release a slot whose dispatch failed, without firing its callback.
    ///
    /// The transfer goes back to the caller, who reports the failure
    /// synchronously.
    pub fn abort(&self, id: TransferId) -> Option<PendingTransfer> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(id.slot()).filter(|s| s.owned_by(id))?;
        let transfer = slot.transfer.take();
        slot.release();
        transfer
    }

    /// Take every ready transfer accepted by `filter` out of the pool,
    /// releasing its slot.
    ///
    /// Legacy requests whose readiness counter reached zero are promoted to
    /// ready first. Slots are free again before this returns, so callbacks
    /// fired from the returned list may immediately reuse them. Native
    /// transfers count as delivering until they are fired or dropped.
    pub fn collect_ready<F>(&self, filter: F) -> ReadyList
    where
        F: Fn(&BackendTicket) -> bool,
    {
        self.collect(filter, true)
    }

    /// Take the ready transfers of one native handle without counting them
    /// as delivering. The caller fires them itself.
    pub fn take_ready_for(&self, handle_id: HandleId) -> ReadyList {
        self.collect(|ticket| ticket.is_native_for(handle_id), false)
    }

    /// Native transfers of `handle_id` taken by [`collect_ready`](Self::collect_ready)
    /// whose callbacks have not returned yet.
    pub fn delivering(&self, handle_id: HandleId) -> usize {
        self.deliveries.count(handle_id)
    }

    /// Block until no callback of `handle_id` is running or about to run.
    ///
    /// Returns at once when called from one of that handle's own callbacks;
    /// the rest of that batch then fires after the caller moves on.
    pub fn wait_delivered(&self, handle_id: HandleId) {
        if firing_on_this_thread(handle_id) {
            tracing::debug!("Handle {} closed from its own callback; not waiting", handle_id);
            return;
        }
        self.deliveries.wait_idle(handle_id);
    }

    fn collect<F>(&self, filter: F, track: bool) -> ReadyList
    where
        F: Fn(&BackendTicket) -> bool,
    {
        let mut ready = ReadyList::new();
        let mut slots = self.slots.lock();

        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.state == SlotState::InProgress {
                if let BackendTicket::Legacy(request) = &slot.ticket {
                    if request.is_ready() {
                        slot.outcome = request.take_outcome();
                        debug_assert!(slot.outcome.is_some(), "ready legacy request without result");
                        slot.state = SlotState::ReadyForCallback;
                    }
                }
            }

            if slot.state != SlotState::ReadyForCallback || !filter(&slot.ticket) {
                continue;
            }

            let id = TransferId::from_parts(index as u32, slot.generation);
            let handle = match &slot.ticket {
                BackendTicket::Native { handle, .. } => Some(*handle),
                _ => None,
            };
            let transfer = slot.transfer.take();
            let outcome = slot.outcome.take();
            slot.release();

            match (transfer, outcome) {
                (Some(transfer), Some(outcome)) => {
                    // Counted under the slot lock so a closer never sees the
                    // transfer in neither place.
                    let delivery = handle.filter(|_| track).map(|handle| {
                        self.deliveries.begin(handle);
                        DeliveryGuard {
                            deliveries: Arc::clone(&self.deliveries),
                            handle,
                        }
                    });
                    ready.push(ReadyTransfer {
                        id,
                        handle,
                        transfer,
                        outcome,
                        delivery,
                    });
                }
                _ => {
                    debug_assert!(false, "ready slot {} missing transfer or result", index);
                    tracing::error!("Ready slot {} missing transfer or result", index);
                }
            }
        }

        ready
    }

    /// Outstanding native requests issued against `handle_id`.
    pub fn native_requests_for(&self, handle_id: HandleId) -> SmallVec<[Arc<AsyncReadRequest>; 8]> {
        self.native_requests(|handle| handle == handle_id)
    }

    /// Outstanding native requests on any handle.
    pub fn all_native_requests(&self) -> SmallVec<[Arc<AsyncReadRequest>; 8]> {
        self.native_requests(|_| true)
    }

    fn native_requests<F>(&self, on_handle: F) -> SmallVec<[Arc<AsyncReadRequest>; 8]>
    where
        F: Fn(HandleId) -> bool,
    {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.state == SlotState::InProgress)
            .filter_map(|s| match &s.ticket {
                BackendTicket::Native { handle, request } if on_handle(*handle) => {
                    Some(Arc::clone(request))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legato_core::TransferInfo;
    use rand::seq::SliceRandom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(capacity: usize) -> TransferPool {
        TransferPool::new(capacity, Arc::new(TransferMetrics::new()))
    }

    fn pending(counter: &Arc<Vec<AtomicUsize>>, index: usize) -> PendingTransfer {
        let counter = Arc::clone(counter);
        let (_, pending) = TransferInfo::new(vec![0u8; 8], 0)
            .cookie(index as u64)
            .on_complete(move |done, _| {
                counter[done.cookie as usize].fetch_add(1, Ordering::SeqCst);
            })
            .split();
        pending
    }

    fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
        Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
    }

    fn done(bytes: usize) -> ReadOutcome {
        ReadOutcome::completed(vec![0u8; 8], bytes)
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = pool(2);
        let calls = counters(3);

        let a = pool.acquire(pending(&calls, 0), BackendTicket::None).unwrap();
        let b = pool.acquire(pending(&calls, 1), BackendTicket::None).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.in_flight(), 2);

        let refused = pool.acquire(pending(&calls, 2), BackendTicket::None);
        let refused = refused.err().expect("third acquire must fail");
        assert_eq!(refused.cookie, 2);

        // Existing slots untouched.
        assert_eq!(pool.state_of(a), Some(SlotState::InProgress));
        assert_eq!(pool.state_of(b), Some(SlotState::InProgress));
        assert_eq!(pool.metrics.snapshot().pool_exhausted, 1);
    }

    #[test]
    fn test_complete_then_collect_releases() {
        let pool = pool(1);
        let calls = counters(2);

        let id = pool.acquire(pending(&calls, 0), BackendTicket::None).unwrap();
        assert!(pool.complete(id, done(8)));
        assert_eq!(pool.state_of(id), Some(SlotState::ReadyForCallback));

        let ready = pool.collect_ready(|_| true);
        assert_eq!(ready.len(), 1);
        assert_eq!(pool.state_of(id), Some(SlotState::Free));
        assert_eq!(pool.in_flight(), 0);

        // Slot reusable before the callback fires, under a new generation.
        let next = pool.acquire(pending(&calls, 1), BackendTicket::None).unwrap();
        assert_eq!(next.slot(), id.slot());
        assert_ne!(next.generation(), id.generation());
        assert!(pool.lookup(id).is_none());
        assert!(pool.lookup(next).is_some());

        for transfer in ready {
            assert_eq!(transfer.fire(), IoStatus::Success);
        }
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abort_skips_callback() {
        let pool = pool(1);
        let calls = counters(1);

        let id = pool.acquire(pending(&calls, 0), BackendTicket::None).unwrap();
        let transfer = pool.abort(id).expect("slot owned");
        assert_eq!(transfer.cookie, 0);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.collect_ready(|_| true).is_empty());
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
        assert!(pool.abort(id).is_none());
    }

    #[test]
    fn test_out_of_order_completion_fires_each_once() {
        const N: usize = 16;
        let pool = pool(N);
        let calls = counters(N);

        let mut ids: Vec<TransferId> = (0..N)
            .map(|i| pool.acquire(pending(&calls, i), BackendTicket::None).unwrap())
            .collect();
        ids.shuffle(&mut rand::thread_rng());

        let (first, rest) = ids.split_at(N / 2);
        for id in first {
            assert!(pool.complete(*id, done(4)));
        }
        for transfer in pool.collect_ready(|_| true) {
            transfer.fire();
        }
        for id in rest {
            assert!(pool.complete(*id, done(4)));
        }
        for transfer in pool.collect_ready(|_| true) {
            transfer.fire();
        }
        // A further pump finds nothing.
        assert!(pool.collect_ready(|_| true).is_empty());

        for (i, count) in calls.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "transfer {} fired wrong count", i);
        }
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_collect_filter_leaves_other_slots() {
        let pool = pool(2);
        let calls = counters(2);
        let request = AsyncReadRequest::new();

        let native = pool
            .acquire(
                pending(&calls, 0),
                BackendTicket::Native {
                    handle: 7,
                    request: Arc::clone(&request),
                },
            )
            .unwrap();
        let other = pool.acquire(pending(&calls, 1), BackendTicket::None).unwrap();

        assert_eq!(pool.native_requests_for(7).len(), 1);
        assert!(pool.native_requests_for(8).is_empty());

        pool.complete(native, done(1));
        pool.complete(other, done(1));

        let ready = pool.collect_ready(|t| t.is_native_for(7));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, native);
        assert_eq!(pool.state_of(other), Some(SlotState::ReadyForCallback));
    }

    #[test]
    fn test_legacy_counter_promotes_on_collect() {
        let pool = pool(1);
        let calls = counters(1);
        let request = LegacyRequest::new("a.wem", vec![0u8; 8]);

        let id = pool
            .acquire(pending(&calls, 0), BackendTicket::Legacy(Arc::clone(&request)))
            .unwrap();
        assert!(pool.collect_ready(|_| true).is_empty());
        assert_eq!(pool.state_of(id), Some(SlotState::InProgress));

        request.finish(ReadOutcome::completed(vec![0u8; 8], 8));
        let ready = pool.collect_ready(|_| true);
        assert_eq!(ready.len(), 1);
        assert!(matches!(ready[0].result(), ReadResult::Completed(8)));
    }

    #[test]
    fn test_cancelled_outcome_reports_fail() {
        let pool = pool(1);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let (_, pending) = TransferInfo::new(vec![0u8; 8], 0)
            .on_complete(move |done, status| *sink.lock() = Some((done.cancelled, status)))
            .split();

        let id = pool.acquire(pending, BackendTicket::None).unwrap();
        pool.complete(id, ReadOutcome::cancelled(vec![0u8; 8]));
        for transfer in pool.collect_ready(|_| true) {
            transfer.fire();
        }
        assert_eq!(*seen.lock(), Some((true, IoStatus::Fail)));
    }

    #[test]
    fn test_native_delivery_counted_until_fired() {
        let pool = pool(2);
        let calls = counters(2);
        let native = || BackendTicket::Native {
            handle: 3,
            request: AsyncReadRequest::new(),
        };
        let a = pool.acquire(pending(&calls, 0), native()).unwrap();
        let b = pool.acquire(pending(&calls, 1), native()).unwrap();
        pool.complete(a, done(8));
        pool.complete(b, done(8));

        let mut ready = pool.collect_ready(|_| true);
        assert_eq!(pool.delivering(3), 2);
        assert_eq!(ready[0].handle(), Some(3));

        ready.pop().expect("two ready").fire();
        assert_eq!(pool.delivering(3), 1);
        // Dropping an unfired transfer also ends its delivery.
        drop(ready);
        assert_eq!(pool.delivering(3), 0);
        pool.wait_delivered(3);
    }

    #[test]
    fn test_take_ready_for_is_untracked() {
        let pool = pool(1);
        let calls = counters(1);
        let id = pool
            .acquire(
                pending(&calls, 0),
                BackendTicket::Native {
                    handle: 5,
                    request: AsyncReadRequest::new(),
                },
            )
            .unwrap();
        pool.complete(id, done(8));

        let ready = pool.take_ready_for(5);
        assert_eq!(ready.len(), 1);
        assert_eq!(pool.delivering(5), 0);
    }

    #[test]
    fn test_wait_delivered_blocks_until_callback_returns() {
        let pool = Arc::new(pool(1));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(0);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let finished = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&finished);
        let (_, pending) = TransferInfo::new(vec![0u8; 8], 0)
            .on_complete(move |_, _| {
                entered_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
                flag.store(1, Ordering::SeqCst);
            })
            .split();
        let id = pool
            .acquire(
                pending,
                BackendTicket::Native {
                    handle: 9,
                    request: AsyncReadRequest::new(),
                },
            )
            .unwrap();
        pool.complete(id, done(8));

        let pumping = Arc::clone(&pool);
        let pump = std::thread::spawn(move || {
            for transfer in pumping.collect_ready(|_| true) {
                transfer.fire();
            }
        });

        entered_rx.recv().unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            gate_tx.send(()).unwrap();
        });
        pool.wait_delivered(9);
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        pump.join().unwrap();
        release.join().unwrap();
    }
}
