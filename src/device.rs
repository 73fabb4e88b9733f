//! Per-device lifecycle: `open -> reset -> start -> {suspend <-> resume} ->
//! stop -> close`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::collaborators::{
    EngineHandle, HostRuntimeBridge, Mixer, OutputMixHandle, PcmFormat, PlatformAudioApi, PlayState, PlayerHandle,
};
use crate::config::TuningProfile;
use crate::consumer::{CallbackSink, ConsumerContext};
use crate::error::BackendError;
use crate::producer::{self, ProducerHandle};
use crate::ring::Ring;

/// Stable identity for a device, used as the mixer's `device` argument and
/// as the thread-name suffix for its mix thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

fn next_device_id() -> DeviceId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    DeviceId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// The device lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Closed,
    Opened,
    Configured,
    Playing,
    Suspended,
}

/// Explicit two-call lock/unlock pair exposed to the OpenAL core. Kept as
/// a bare atomic-flag spinlock rather than an RAII guard:
/// the dispatch table calls `lock` and `unlock` as two independent ABI
/// entry points with no Rust scope spanning the critical section between
/// them.
#[derive(Default)]
pub struct ApiLock {
    held: AtomicBool,
}

impl ApiLock {
    pub fn lock(&self) {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    pub fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Counters surfaced for diagnostics.
#[derive(Default)]
pub struct DeviceCounters {
    pub enqueue_retries: AtomicU64,
    pub primer_enqueues: AtomicU64,
    pub resets: AtomicU64,
}

struct PlatformObjects {
    engine: EngineHandle,
    mix: OutputMixHandle,
    player: Option<PlayerHandle>,
}

/// Everything a device owns across its whole lifetime, behind the
/// device's own mutex for lifecycle transitions. The ring itself is
/// allocated once, on `open`, and never resized across `reset`.
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    platform: Arc<dyn PlatformAudioApi>,
    mixer: Arc<dyn Mixer>,
    tuning: TuningProfile,
    ring: Arc<Ring>,
    api_lock: ApiLock,
    counters: Arc<DeviceCounters>,
    state: Mutex<DeviceRuntime>,
}

struct DeviceRuntime {
    lifecycle: LifecycleState,
    format: Option<PcmFormat>,
    active_len: usize,
    objects: Option<PlatformObjects>,
    producer: Option<ProducerHandle>,
    consumer: Option<Arc<ConsumerContext>>,
}

impl Device {
    /// Allocate device state and ring storage. The engine itself is
    /// ensured by the caller (`Dispatch`/`Engine`) before a device is
    /// constructed, since engine handles are needed to create the
    /// platform player at `reset`.
    pub fn open(
        name: impl Into<String>,
        platform: Arc<dyn PlatformAudioApi>,
        mixer: Arc<dyn Mixer>,
        tuning: TuningProfile,
    ) -> Arc<Device> {
        let ring = Arc::new(Ring::new(tuning.ring_depth, tuning.preroll, tuning.buffer_bytes_cap));
        Arc::new(Device {
            id: next_device_id(),
            name: name.into(),
            platform,
            mixer,
            tuning,
            ring,
            api_lock: ApiLock::default(),
            counters: Arc::new(DeviceCounters::default()),
            state: Mutex::new(DeviceRuntime {
                lifecycle: LifecycleState::Opened,
                format: None,
                active_len: 0,
                objects: None,
                producer: None,
                consumer: None,
            }),
        })
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.lock().unwrap().lifecycle
    }

    pub fn api_lock(&self) -> &ApiLock {
        &self.api_lock
    }

    pub fn counters(&self) -> &DeviceCounters {
        &self.counters
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }

    /// Configure a platform player for `sample_rate_hz`, bind it to `mix`,
    /// register the consumer callback, start the producer, set PLAYING,
    /// and enqueue a 1-byte primer. If a later step fails, the producer
    /// thread is stopped and the consumer cleared before the error is
    /// returned, so no partially-started device is left behind.
    pub fn reset(
        &self,
        engine: EngineHandle,
        mix: OutputMixHandle,
        sample_rate_hz: u32,
    ) -> Result<(), BackendError> {
        let format = PcmFormat::stereo_16(sample_rate_hz);
        let active_len = self.tuning.active_buffer_bytes(sample_rate_hz);

        let player = self
            .platform
            .create_audio_player(engine, mix, format)
            .map_err(|e| BackendError::ResetFailed(e.to_string()))?;

        let mut guard = self.state.lock().unwrap();

        let consumer = Arc::new(ConsumerContext::new(
            Arc::clone(&self.ring),
            Arc::clone(&self.platform),
            player,
            active_len,
            Arc::clone(&self.counters),
        ));
        let sink = Arc::new(CallbackSink::new(&consumer));
        self.platform.register_callback(player, sink);

        guard.objects = Some(PlatformObjects {
            engine,
            mix,
            player: Some(player),
        });
        guard.consumer = Some(consumer);
        guard.format = Some(format);
        guard.active_len = active_len;
        guard.lifecycle = LifecycleState::Configured;
        self.counters.resets.fetch_add(1, Ordering::Relaxed);

        self.start_locked(&mut guard, format.frame_size, active_len);

        if let Err(e) = self.platform.set_play_state(player, PlayState::Playing) {
            self.abort_configured(guard);
            return Err(BackendError::ResetFailed(e.to_string()));
        }

        // Primer: a 1-byte enqueue strictly before the first real callback.
        if let Err(e) = self.platform.enqueue(player, &[0u8]) {
            self.abort_configured(guard);
            return Err(BackendError::ResetFailed(e.to_string()));
        }
        self.counters.primer_enqueues.fetch_add(1, Ordering::Relaxed);

        guard.lifecycle = LifecycleState::Playing;
        Ok(())
    }

    /// Tear down a just-started producer/consumer after a failed `reset`
    /// step, leaving the device back in `Configured` with no running
    /// thread rather than `Configured` with a live producer. Joins the
    /// producer outside the lock, the same way `suspend` does.
    fn abort_configured(&self, mut guard: std::sync::MutexGuard<'_, DeviceRuntime>) {
        if let Some(consumer) = &guard.consumer {
            consumer.stop_accepting();
        }
        guard.consumer = None;
        let producer = guard.producer.take();
        guard.lifecycle = LifecycleState::Configured;
        drop(guard);
        if let Some(producer) = producer {
            producer.stop_and_join();
        }
    }

    /// Idempotent: spawns the mix thread if not already running and spins
    /// until it publishes readiness.
    pub fn start(&self) {
        let mut guard = self.state.lock().unwrap();
        let format = guard.format;
        let active_len = guard.active_len;
        if let Some(format) = format {
            self.start_locked(&mut guard, format.frame_size, active_len);
        }
    }

    fn start_locked(&self, guard: &mut DeviceRuntime, frame_size: usize, active_len: usize) {
        if guard.producer.is_some() {
            return; // already running; starting again is a no-op.
        }
        let handle = producer::spawn(self.id, Arc::clone(&self.ring), Arc::clone(&self.mixer), frame_size, active_len);
        // Spin yielding until the thread publishes readiness.
        while !handle.flags().is_ready() {
            std::thread::yield_now();
        }
        guard.producer = Some(handle);
    }

    /// Signal and join the mix thread.
    pub fn stop(&self) {
        let handle = {
            let mut guard = self.state.lock().unwrap();
            guard.producer.take()
        };
        if let Some(handle) = handle {
            handle.stop_and_join();
        }
    }

    /// Destroy the platform player (joining its outstanding callbacks),
    /// then drop device state. The engine itself is not torn down here —
    /// only at backend deinit — and the child platform player is released
    /// before its parent device state.
    pub fn close(&self) {
        self.stop();
        let mut guard = self.state.lock().unwrap();
        if let Some(consumer) = guard.consumer.take() {
            consumer.stop_accepting();
        }
        if let Some(objects) = guard.objects.take() {
            if let Some(player) = objects.player {
                self.platform.clear(player);
                self.platform.destroy_player(player);
            }
        }
        guard.lifecycle = LifecycleState::Closed;
    }

    /// Pause the player, clear its queue (dropping in-flight `Enqueued`
    /// audio), then stop the producer. Safe to call when no player exists
    /// yet.
    pub fn suspend(&self) {
        let mut guard = self.state.lock().unwrap();
        if guard.lifecycle != LifecycleState::Playing {
            return;
        }
        if let Some(objects) = &guard.objects {
            if let Some(player) = objects.player {
                let _ = self.platform.set_play_state(player, PlayState::Paused);
                self.platform.clear(player);
            }
        }
        if let Some(consumer) = &guard.consumer {
            consumer.stop_accepting();
        }
        let producer = guard.producer.take();
        guard.lifecycle = LifecycleState::Suspended;
        drop(guard);
        if let Some(producer) = producer {
            producer.stop_and_join();
        }
    }

    /// Resume the player, restart the producer, and re-prime with a
    /// 1-byte enqueue to re-arm the callback.
    pub fn resume(&self) -> Result<(), BackendError> {
        let mut guard = self.state.lock().unwrap();
        if guard.lifecycle != LifecycleState::Suspended {
            return Ok(());
        }
        let (format, active_len) = match (guard.format, guard.active_len) {
            (Some(f), len) => (f, len),
            _ => return Ok(()),
        };

        // Re-register a fresh consumer context: `suspend` stopped the
        // previous one from accepting further callbacks.
        let player = guard.objects.as_ref().and_then(|o| o.player);
        if let Some(player) = player {
            let consumer = Arc::new(ConsumerContext::new(
                Arc::clone(&self.ring),
                Arc::clone(&self.platform),
                player,
                active_len,
                Arc::clone(&self.counters),
            ));
            let sink = Arc::new(CallbackSink::new(&consumer));
            self.platform.register_callback(player, sink);
            guard.consumer = Some(consumer);
        }

        self.start_locked(&mut guard, format.frame_size, active_len);

        if let Some(player) = player {
            self.platform
                .set_play_state(player, PlayState::Playing)
                .map_err(|e| BackendError::ResetFailed(e.to_string()))?;
            self.platform
                .enqueue(player, &[0u8])
                .map_err(|e| BackendError::ResetFailed(e.to_string()))?;
            self.counters.primer_enqueues.fetch_add(1, Ordering::Relaxed);
        }

        guard.lifecycle = LifecycleState::Playing;
        Ok(())
    }

    pub fn is_producer_running(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .producer
            .as_ref()
            .map(|p| p.flags().is_running())
            .unwrap_or(false)
    }
}

/// Resolve device-model/OS-version tuning from a host runtime bridge.
pub fn resolve_tuning(bridge: &dyn HostRuntimeBridge) -> TuningProfile {
    TuningProfile::resolve(bridge.os_version(), &bridge.device_model())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::sim::{SimMixer, SimPlatformAudioApi};
    use std::time::Instant;

    fn platform_and_device() -> (Arc<SimPlatformAudioApi>, Arc<Device>) {
        let platform = Arc::new(SimPlatformAudioApi::new());
        let device = Device::open(
            "opensl",
            Arc::clone(&platform) as Arc<dyn PlatformAudioApi>,
            Arc::new(SimMixer::new(0x11)) as Arc<dyn Mixer>,
            TuningProfile::default(),
        );
        (platform, device)
    }

    /// `stop()` must join the producer within a handful of its 5ms
    /// timed-wait ticks, not hang indefinitely.
    #[test]
    fn stop_joins_the_producer_promptly() {
        let (_platform, device) = platform_and_device();
        let (engine, mix) = (EngineHandle(1), OutputMixHandle(1));
        device.reset(engine, mix, 44_100).unwrap();
        assert!(device.is_producer_running());

        let started = Instant::now();
        device.stop();
        assert!(!device.is_producer_running());
        assert!(
            started.elapsed() < std::time::Duration::from_millis(100),
            "stop() took too long to join the producer thread"
        );
    }

    /// Calling `start()` again on a device whose producer is already
    /// running must not spawn a second one.
    #[test]
    fn start_on_playing_device_is_a_no_op() {
        let (_platform, device) = platform_and_device();
        device.reset(EngineHandle(1), OutputMixHandle(1), 44_100).unwrap();
        assert!(device.is_producer_running());

        device.start();
        device.start();
        assert!(device.is_producer_running());
        device.stop();
    }

    /// Suspend drops the producer and pauses the player; resume re-primes
    /// and restarts it.
    #[test]
    fn suspend_then_resume_round_trips_lifecycle_and_producer() {
        let (_platform, device) = platform_and_device();
        device.reset(EngineHandle(1), OutputMixHandle(1), 44_100).unwrap();
        assert_eq!(device.lifecycle(), LifecycleState::Playing);
        assert!(device.is_producer_running());

        device.suspend();
        assert_eq!(device.lifecycle(), LifecycleState::Suspended);
        assert!(!device.is_producer_running());

        let primers_before = device.counters().primer_enqueues.load(Ordering::Relaxed);
        device.resume().unwrap();
        assert_eq!(device.lifecycle(), LifecycleState::Playing);
        assert!(device.is_producer_running());
        assert_eq!(
            device.counters().primer_enqueues.load(Ordering::Relaxed),
            primers_before + 1
        );
        device.stop();
    }

    #[test]
    fn close_is_reachable_from_opened_without_ever_resetting() {
        let (_platform, device) = platform_and_device();
        assert_eq!(device.lifecycle(), LifecycleState::Opened);
        device.close();
        assert_eq!(device.lifecycle(), LifecycleState::Closed);
    }
}
