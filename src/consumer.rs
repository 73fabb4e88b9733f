//! The platform callback handler: advances the read cursor, reclaims the
//! just-drained slot, waits for the next `Mixed` slot, and hands it to the
//! platform buffer queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::collaborators::{AudioCallbackSink, PlatformAudioApi, PlayerHandle};
use crate::device::DeviceCounters;
use crate::ring::{Ring, CONSUMER_TICK};

/// State the callback needs on every invocation: the ring, where to enqueue,
/// and whether the device is still accepting callbacks.
pub struct ConsumerContext {
    ring: Arc<Ring>,
    platform: Arc<dyn PlatformAudioApi>,
    player: PlayerHandle,
    active_len: usize,
    accepting: AtomicBool,
    counters: Arc<DeviceCounters>,
}

impl ConsumerContext {
    pub fn new(
        ring: Arc<Ring>,
        platform: Arc<dyn PlatformAudioApi>,
        player: PlayerHandle,
        active_len: usize,
        counters: Arc<DeviceCounters>,
    ) -> Self {
        Self {
            ring,
            platform,
            player,
            active_len,
            accepting: AtomicBool::new(true),
            counters,
        }
    }

    /// Stop accepting further work; an in-flight callback still returns
    /// promptly rather than blocking platform teardown.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Run one pass of the consumer callback.
    pub fn on_callback(&self) {
        let should_stop = || self.should_stop();
        let (read_idx, slot) = self.ring.advance_read();

        self.ring.reclaim_next_enqueued(read_idx);

        if !slot.wait_until_mixed_or_stopping(CONSUMER_TICK, &should_stop) {
            return;
        }

        let payload = slot.snapshot_payload(self.active_len);
        // The platform audio API is collaborator-supplied code; a panic
        // inside `enqueue` must not unwind across the (simulated)
        // hardware callback boundary.
        let enqueued = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.platform.enqueue(self.player, &payload)
        }));
        match enqueued {
            Ok(Ok(())) => slot.mark_enqueued(),
            Ok(Err(_)) => {
                // Transient failure: roll back so the same slot is retried
                // on the next callback invocation.
                self.ring.rollback_read();
                self.counters.enqueue_retries.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                log::error!("opensl_pump: platform audio api panicked during enqueue");
                self.ring.rollback_read();
                self.counters.enqueue_retries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Adapts [`ConsumerContext`] to the [`AudioCallbackSink`] contract the
/// platform audio API invokes on its own callback thread. Holds only a
/// `Weak` reference so a device being torn down never keeps its callback
/// context alive past the platform player that invokes it.
pub struct CallbackSink {
    context: Weak<ConsumerContext>,
}

impl CallbackSink {
    pub fn new(context: &Arc<ConsumerContext>) -> Self {
        Self {
            context: Arc::downgrade(context),
        }
    }
}

impl AudioCallbackSink for CallbackSink {
    fn on_buffer_complete(&self) {
        if let Some(context) = self.context.upgrade() {
            context.on_callback();
        }
    }
}
