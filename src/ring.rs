//! Fixed-depth ring of fixed-size PCM slots — the shared data plane between
//! producer and consumer.
//!
//! Each slot carries its own `Mutex`+`Condvar` for the producer/consumer
//! handshake on its own transitions, plus an `AtomicU8` mirror of `state`
//! that either side may peek at without locking when it needs to read a
//! slot it does not own (the preroll gate check, the consumer's reclaim
//! scan). The mirror is written under the slot's own mutex immediately
//! alongside the authoritative state, so an unlocked reader only ever
//! observes a state the owner has already committed — a monotonic snapshot,
//! never used to drive a transition without the owning slot's lock held.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One of `FREE -> MIXED -> ENQUEUED -> FREE`. `Unknown` only exists
/// transiently at construction, before the first producer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Unknown = 0,
    Free = 1,
    Mixed = 2,
    Enqueued = 3,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Free,
            2 => SlotState::Mixed,
            3 => SlotState::Enqueued,
            _ => SlotState::Unknown,
        }
    }
}

struct SlotInner {
    state: SlotState,
    payload: Vec<u8>,
}

/// A single PCM buffer plus its synchronization state.
pub struct Slot {
    inner: Mutex<SlotInner>,
    cond: Condvar,
    hint: AtomicU8,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Free,
                payload: vec![0u8; capacity],
            }),
            cond: Condvar::new(),
            hint: AtomicU8::new(SlotState::Free as u8),
        }
    }

    /// Unlocked peek at this slot's last-committed state. Safe for reading
    /// a slot the caller does not own: the value only ever reflects a
    /// transition the owning side has already finished applying.
    pub fn peek_state(&self) -> SlotState {
        SlotState::from_u8(self.hint.load(Ordering::Acquire))
    }

    /// Run `mixer.mix` into this slot's payload, truncated to
    /// `active_len` bytes, then mark it `Mixed` and wake the consumer.
    /// Called by the producer, which must already know (via
    /// [`Slot::wait_until_free_or_stopping`]) that this slot is `Free`.
    pub fn fill_with<F: FnOnce(&mut [u8])>(&self, active_len: usize, fill: F) {
        let mut guard = self.inner.lock().unwrap();
        let len = active_len.min(guard.payload.len());
        fill(&mut guard.payload[..len]);
        guard.state = SlotState::Mixed;
        self.hint.store(SlotState::Mixed as u8, Ordering::Release);
        self.cond.notify_all();
    }

    /// Block (producer side) until this slot is `Free` or `should_stop`
    /// reports true, polling on a timed wait so a stop signal is observed
    /// within one tick.
    pub fn wait_until_free_or_stopping(&self, tick: Duration, should_stop: &dyn Fn() -> bool) -> bool {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.state == SlotState::Free {
                return true;
            }
            if should_stop() {
                return false;
            }
            let (g, _) = self.cond.wait_timeout(guard, tick).unwrap();
            guard = g;
        }
    }

    /// Block (consumer side) until this slot is `Mixed` or `should_stop`
    /// reports true, using `tick`-spaced timed waits.
    pub fn wait_until_mixed_or_stopping(&self, tick: Duration, should_stop: &dyn Fn() -> bool) -> bool {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.state == SlotState::Mixed {
                return true;
            }
            if should_stop() {
                return false;
            }
            let (g, _) = self.cond.wait_timeout(guard, tick).unwrap();
            guard = g;
        }
    }

    /// Copy out this slot's current payload (only valid while it holds
    /// `Mixed`, i.e. immediately after `wait_until_mixed_or_stopping`
    /// returns `true` and before `mark_enqueued`/`mark_free` run).
    pub fn snapshot_payload(&self, active_len: usize) -> Vec<u8> {
        let guard = self.inner.lock().unwrap();
        let len = active_len.min(guard.payload.len());
        guard.payload[..len].to_vec()
    }

    /// Consumer transition `Mixed -> Enqueued` after a successful enqueue
    /// into the platform buffer queue.
    pub fn mark_enqueued(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.state = SlotState::Enqueued;
        self.hint.store(SlotState::Enqueued as u8, Ordering::Release);
        self.cond.notify_all();
    }

    /// Consumer transition `Enqueued -> Free` once the platform reports the
    /// buffer drained.
    pub fn mark_free(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.state = SlotState::Free;
        self.hint.store(SlotState::Free as u8, Ordering::Release);
        self.cond.notify_all();
    }

    #[cfg(test)]
    fn state(&self) -> SlotState {
        self.inner.lock().unwrap().state
    }
}

/// Default tick the producer uses between preroll-gate/stop checks.
pub const PRODUCER_TICK: Duration = Duration::from_millis(5);
/// Default tick the consumer uses between mixed/stop checks.
pub const CONSUMER_TICK: Duration = Duration::from_micros(100);

/// The fixed-depth array of slots plus write/read cursors.
pub struct Ring {
    slots: Vec<Slot>,
    depth: u32,
    preroll: u32,
    write_idx: AtomicU32,
    read_idx: AtomicU32,
}

impl Ring {
    /// Allocate `depth` slots of `slot_capacity` bytes each, with cursors
    /// seeded at `depth - 1` so the first `advance_*` lands on index 0.
    pub fn new(depth: u32, preroll: u32, slot_capacity: usize) -> Self {
        assert!(depth > 0, "ring depth must be nonzero");
        let slots = (0..depth).map(|_| Slot::new(slot_capacity)).collect();
        Self {
            slots,
            depth,
            preroll,
            write_idx: AtomicU32::new(depth - 1),
            read_idx: AtomicU32::new(depth - 1),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn preroll(&self) -> u32 {
        self.preroll
    }

    pub fn slot(&self, idx: u32) -> &Slot {
        &self.slots[(idx % self.depth) as usize]
    }

    pub fn write_idx(&self) -> u32 {
        self.write_idx.load(Ordering::Acquire)
    }

    pub fn read_idx(&self) -> u32 {
        self.read_idx.load(Ordering::Acquire)
    }

    /// Advance the write cursor by one (mod depth) and return the slot it
    /// now names.
    pub fn advance_write(&self) -> (u32, &Slot) {
        let next = (self.write_idx.load(Ordering::Acquire) + 1) % self.depth;
        self.write_idx.store(next, Ordering::Release);
        (next, self.slot(next))
    }

    /// Advance the read cursor by one (mod depth) and return the slot it
    /// now names.
    pub fn advance_read(&self) -> (u32, &Slot) {
        let next = (self.read_idx.load(Ordering::Acquire) + 1) % self.depth;
        self.read_idx.store(next, Ordering::Release);
        (next, self.slot(next))
    }

    /// Roll the read cursor back by one (mod depth) after an enqueue
    /// failure so the same slot is retried on the next callback.
    pub fn rollback_read(&self) {
        let prev = (self.read_idx.load(Ordering::Acquire) + self.depth - 1) % self.depth;
        self.read_idx.store(prev, Ordering::Release);
    }

    /// The preroll gate: open when the slot `preroll` positions behind
    /// `write_idx` is `Enqueued` or `Free`. Computed via signed arithmetic
    /// so it is well-defined even when `write_idx < preroll`.
    pub fn preroll_gate_open(&self, write_idx: u32) -> bool {
        let depth = self.depth as i64;
        let behind = ((write_idx as i64 - self.preroll as i64) % depth + depth) % depth;
        matches!(
            self.slot(behind as u32).peek_state(),
            SlotState::Enqueued | SlotState::Free
        )
    }

    /// `(write_idx - read_idx) mod depth`, the producer's current lead over
    /// the consumer.
    pub fn lead(&self) -> u32 {
        let depth = self.depth as i64;
        let w = self.write_idx.load(Ordering::Acquire) as i64;
        let r = self.read_idx.load(Ordering::Acquire) as i64;
        (((w - r) % depth + depth) % depth) as u32
    }

    /// Scan forward from `start + 1` and reclaim the first `Enqueued` slot
    /// to `Free`, mirroring the platform reporting that buffer drained.
    /// Returns the reclaimed index, if any.
    pub fn reclaim_next_enqueued(&self, start: u32) -> Option<u32> {
        for step in 1..=self.depth {
            let idx = (start + step) % self.depth;
            let slot = self.slot(idx);
            if slot.peek_state() == SlotState::Enqueued {
                slot.mark_free();
                return Some(idx);
            }
        }
        None
    }
}

/// Monotonic deadline helper so timed waits never rely on raw
/// seconds/nanoseconds arithmetic that could overflow.
pub fn deadline_from_now(tick: Duration) -> Instant {
    Instant::now() + tick
}
