//! External collaborators referenced only through their contract: the
//! OpenAL mixer, the platform audio API (OpenSL ES), and the host runtime
//! bridge (JNI). The crate core never links against real OpenSL ES or a
//! JVM — an embedder supplies real implementations of these traits;
//! [`sim`] supplies the in-memory test doubles this crate's own test suite
//! drives against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::device::DeviceId;
use crate::error::BackendError;

/// Opaque handle to a realized platform engine object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

/// Opaque handle to a realized output-mix object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputMixHandle(pub u64);

/// Opaque handle to a realized buffer-queue audio player object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerHandle(pub u64);

fn next_handle_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// `SetPlayState(PLAYING|PAUSED)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
}

/// Stereo 16-bit PCM format negotiated at `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub bits: u16,
    pub sample_rate_hz: u32,
    pub frame_size: usize,
}

impl PcmFormat {
    /// Stereo 16-bit PCM at `sample_rate_hz` (the only format this backend
    /// negotiates).
    pub fn stereo_16(sample_rate_hz: u32) -> Self {
        Self {
            channels: 2,
            bits: 16,
            sample_rate_hz,
            frame_size: 2 * (16 / 8),
        }
    }

    /// Sample rate in millihertz. `PlatformAudioApi::create_audio_player`
    /// implementations must configure the underlying player with this
    /// value, not the raw `sample_rate_hz` — the platform audio API takes
    /// sample rate in millihertz.
    pub fn sample_rate_millihertz(&self) -> u32 {
        self.sample_rate_hz * 1000
    }
}

/// Invoked by the platform when a previously-enqueued buffer has finished
/// playing — the Rust rendition of OpenSL ES's
/// `SLAndroidSimpleBufferQueueCallback`.
pub trait AudioCallbackSink: Send + Sync {
    fn on_buffer_complete(&self);
}

/// The OpenAL mixer core: `mix(device, dst, frameCount)`.
pub trait Mixer: Send + Sync {
    /// Fill `dst` (interleaved PCM bytes) with `frame_count` frames for
    /// `device`.
    fn mix(&self, device: DeviceId, dst: &mut [u8], frame_count: usize);
}

/// The platform audio API (OpenSL ES) contract.
pub trait PlatformAudioApi: Send + Sync {
    fn create_engine(&self) -> Result<EngineHandle, BackendError>;
    fn realize_engine(&self, engine: EngineHandle) -> Result<(), BackendError>;
    fn create_output_mix(&self, engine: EngineHandle) -> Result<OutputMixHandle, BackendError>;
    fn realize_output_mix(&self, mix: OutputMixHandle) -> Result<(), BackendError>;
    fn destroy_output_mix(&self, mix: OutputMixHandle);
    fn destroy_engine(&self, engine: EngineHandle);

    /// Create a buffer-queue audio player bound to `mix`. Implementations
    /// must configure the player's sample rate via
    /// `format.sample_rate_millihertz()`, not `format.sample_rate_hz`
    /// directly — the platform audio API's format descriptor takes
    /// millihertz.
    fn create_audio_player(
        &self,
        engine: EngineHandle,
        mix: OutputMixHandle,
        format: PcmFormat,
    ) -> Result<PlayerHandle, BackendError>;
    fn register_callback(&self, player: PlayerHandle, sink: Arc<dyn AudioCallbackSink>);
    fn set_play_state(&self, player: PlayerHandle, state: PlayState) -> Result<(), BackendError>;
    /// `Enqueue(ptr,len)`. `Err` maps to `BackendError::EnqueueTransient`;
    /// the caller retries on the next callback without advancing state.
    fn enqueue(&self, player: PlayerHandle, data: &[u8]) -> Result<(), BackendError>;
    fn clear(&self, player: PlayerHandle);
    fn destroy_player(&self, player: PlayerHandle);
}

/// The host runtime bridge (JNI), queried once when the VM handle is
/// delivered.
pub trait HostRuntimeBridge: Send + Sync {
    fn os_version(&self) -> i32;
    fn device_model(&self) -> String;
}

/// In-memory test doubles for the three collaborators above, used by this
/// crate's own test suite and available to embedders writing integration
/// tests against the pump without real OpenSL ES/JNI.
pub mod sim {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Fills every frame with a fixed byte pattern so tests can assert on
    /// mixed content without modeling real audio synthesis.
    pub struct SimMixer {
        pub fill_byte: u8,
        pub mix_calls: AtomicU64,
    }

    impl SimMixer {
        pub fn new(fill_byte: u8) -> Self {
            Self {
                fill_byte,
                mix_calls: AtomicU64::new(0),
            }
        }

        pub fn mix_call_count(&self) -> u64 {
            self.mix_calls.load(Ordering::Relaxed)
        }
    }

    impl Mixer for SimMixer {
        fn mix(&self, _device: DeviceId, dst: &mut [u8], _frame_count: usize) {
            self.mix_calls.fetch_add(1, Ordering::Relaxed);
            dst.fill(self.fill_byte);
        }
    }

    struct SimPlayerState {
        queue_depth: usize,
        clear_count: u64,
        enqueue_count: u64,
        enqueued_lengths: Vec<usize>,
        sink: Option<Arc<dyn AudioCallbackSink>>,
        fail_next_enqueue: bool,
        configured_rate_millihertz: u32,
    }

    /// A fake OpenSL ES: `enqueue` accepts immediately (no real playback
    /// clock); tests drive completion explicitly via
    /// [`SimPlatformAudioApi::fire_callback`], mirroring the platform
    /// invoking the buffer-queue callback on its own thread.
    pub struct SimPlatformAudioApi {
        engines: Mutex<HashMap<u64, ()>>,
        mixes: Mutex<HashMap<u64, u64>>,
        players: Mutex<HashMap<u64, SimPlayerState>>,
        destroyed_engines: AtomicU64,
        destroyed_mixes: AtomicU64,
    }

    impl Default for SimPlatformAudioApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SimPlatformAudioApi {
        pub fn new() -> Self {
            Self {
                engines: Mutex::new(HashMap::new()),
                mixes: Mutex::new(HashMap::new()),
                players: Mutex::new(HashMap::new()),
                destroyed_engines: AtomicU64::new(0),
                destroyed_mixes: AtomicU64::new(0),
            }
        }

        /// Simulate the platform completing playback of whatever was most
        /// recently enqueued on `player`, invoking its registered callback
        /// synchronously on the calling thread.
        pub fn fire_callback(&self, player: PlayerHandle) {
            let sink = {
                let players = self.players.lock().unwrap();
                players.get(&player.0).and_then(|p| p.sink.clone())
            };
            if let Some(sink) = sink {
                sink.on_buffer_complete();
            }
        }

        /// Snapshot every registered sink, for a driver that does not know
        /// player handles up front (e.g. an external test harness driving
        /// playback through the public backend API only).
        fn registered_sinks(&self) -> Vec<Arc<dyn AudioCallbackSink>> {
            self.players
                .lock()
                .unwrap()
                .values()
                .filter_map(|p| p.sink.clone())
                .collect()
        }

        /// Total enqueue calls across every player this instance has ever
        /// created, for harnesses that only hold the public backend API
        /// and never see a [`PlayerHandle`].
        pub fn enqueue_count_any(&self) -> u64 {
            self.players.lock().unwrap().values().map(|p| p.enqueue_count).sum()
        }

        /// All enqueued payload lengths across every player, in no
        /// particular order.
        pub fn all_enqueued_lengths(&self) -> Vec<usize> {
            self.players
                .lock()
                .unwrap()
                .values()
                .flat_map(|p| p.enqueued_lengths.clone())
                .collect()
        }

        pub fn queue_depth(&self, player: PlayerHandle) -> usize {
            self.players
                .lock()
                .unwrap()
                .get(&player.0)
                .map(|p| p.queue_depth)
                .unwrap_or(0)
        }

        pub fn clear_count(&self, player: PlayerHandle) -> u64 {
            self.players
                .lock()
                .unwrap()
                .get(&player.0)
                .map(|p| p.clear_count)
                .unwrap_or(0)
        }

        /// The millihertz rate `create_audio_player` was configured with,
        /// for asserting callers convert via `PcmFormat::sample_rate_millihertz`
        /// rather than passing the raw hertz value through.
        pub fn configured_rate_millihertz(&self, player: PlayerHandle) -> u32 {
            self.players
                .lock()
                .unwrap()
                .get(&player.0)
                .map(|p| p.configured_rate_millihertz)
                .unwrap_or(0)
        }

        /// Total `clear()` calls across every player this instance has ever
        /// created, for harnesses that only hold the public backend API and
        /// never see a [`PlayerHandle`].
        pub fn clear_count_any(&self) -> u64 {
            self.players.lock().unwrap().values().map(|p| p.clear_count).sum()
        }

        pub fn enqueued_lengths(&self, player: PlayerHandle) -> Vec<usize> {
            self.players
                .lock()
                .unwrap()
                .get(&player.0)
                .map(|p| p.enqueued_lengths.clone())
                .unwrap_or_default()
        }

        pub fn enqueue_count(&self, player: PlayerHandle) -> u64 {
            self.players
                .lock()
                .unwrap()
                .get(&player.0)
                .map(|p| p.enqueue_count)
                .unwrap_or(0)
        }

        /// Make the next `enqueue` call on `player` fail once, to exercise
        /// the `EnqueueTransient` retry path.
        pub fn fail_next_enqueue(&self, player: PlayerHandle) {
            if let Some(p) = self.players.lock().unwrap().get_mut(&player.0) {
                p.fail_next_enqueue = true;
            }
        }

        pub fn live_engine_count(&self) -> usize {
            self.engines.lock().unwrap().len()
        }

        pub fn live_mix_count(&self) -> usize {
            self.mixes.lock().unwrap().len()
        }

        pub fn destroyed_engine_count(&self) -> u64 {
            self.destroyed_engines.load(Ordering::Relaxed)
        }

        pub fn destroyed_mix_count(&self) -> u64 {
            self.destroyed_mixes.load(Ordering::Relaxed)
        }
    }

    impl PlatformAudioApi for SimPlatformAudioApi {
        fn create_engine(&self) -> Result<EngineHandle, BackendError> {
            let id = next_handle_id();
            self.engines.lock().unwrap().insert(id, ());
            Ok(EngineHandle(id))
        }

        fn realize_engine(&self, _engine: EngineHandle) -> Result<(), BackendError> {
            Ok(())
        }

        fn create_output_mix(&self, engine: EngineHandle) -> Result<OutputMixHandle, BackendError> {
            let id = next_handle_id();
            self.mixes.lock().unwrap().insert(id, engine.0);
            Ok(OutputMixHandle(id))
        }

        fn realize_output_mix(&self, _mix: OutputMixHandle) -> Result<(), BackendError> {
            Ok(())
        }

        fn destroy_output_mix(&self, mix: OutputMixHandle) {
            self.mixes.lock().unwrap().remove(&mix.0);
            self.destroyed_mixes.fetch_add(1, Ordering::Relaxed);
        }

        fn destroy_engine(&self, engine: EngineHandle) {
            self.engines.lock().unwrap().remove(&engine.0);
            self.destroyed_engines.fetch_add(1, Ordering::Relaxed);
        }

        fn create_audio_player(
            &self,
            _engine: EngineHandle,
            _mix: OutputMixHandle,
            format: PcmFormat,
        ) -> Result<PlayerHandle, BackendError> {
            let id = next_handle_id();
            self.players.lock().unwrap().insert(
                id,
                SimPlayerState {
                    queue_depth: 0,
                    clear_count: 0,
                    enqueue_count: 0,
                    enqueued_lengths: Vec::new(),
                    sink: None,
                    fail_next_enqueue: false,
                    configured_rate_millihertz: format.sample_rate_millihertz(),
                },
            );
            Ok(PlayerHandle(id))
        }

        fn register_callback(&self, player: PlayerHandle, sink: Arc<dyn AudioCallbackSink>) {
            if let Some(p) = self.players.lock().unwrap().get_mut(&player.0) {
                p.sink = Some(sink);
            }
        }

        fn set_play_state(&self, _player: PlayerHandle, _state: PlayState) -> Result<(), BackendError> {
            Ok(())
        }

        fn enqueue(&self, player: PlayerHandle, data: &[u8]) -> Result<(), BackendError> {
            let mut players = self.players.lock().unwrap();
            let p = players
                .get_mut(&player.0)
                .ok_or_else(|| BackendError::EnqueueTransient("unknown player".into()))?;
            if p.fail_next_enqueue {
                p.fail_next_enqueue = false;
                return Err(BackendError::EnqueueTransient("simulated queue full".into()));
            }
            p.queue_depth += 1;
            p.enqueue_count += 1;
            p.enqueued_lengths.push(data.len());
            Ok(())
        }

        fn clear(&self, player: PlayerHandle) {
            if let Some(p) = self.players.lock().unwrap().get_mut(&player.0) {
                p.queue_depth = 0;
                p.clear_count += 1;
            }
        }

        fn destroy_player(&self, player: PlayerHandle) {
            self.players.lock().unwrap().remove(&player.0);
        }
    }

    /// Drives every registered sink's callback on a timer, simulating the
    /// hardware continuously draining the buffer queue, for tests that
    /// only hold the public backend API (and so never see a
    /// [`PlayerHandle`] to call [`SimPlatformAudioApi::fire_callback`]
    /// directly).
    pub struct AutoDrain {
        stop: Arc<AtomicBool>,
        join: Option<std::thread::JoinHandle<()>>,
    }

    impl AutoDrain {
        pub fn start(platform: Arc<SimPlatformAudioApi>, period: std::time::Duration) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = Arc::clone(&stop);
            let join = std::thread::spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    for sink in platform.registered_sinks() {
                        sink.on_buffer_complete();
                    }
                    std::thread::sleep(period);
                }
            });
            Self {
                stop,
                join: Some(join),
            }
        }
    }

    impl Drop for AutoDrain {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }

    /// Settable OS version / device model, for exercising the tuning
    /// resolution in [`crate::probe::Probe`].
    pub struct SimHostRuntimeBridge {
        pub os_version: i32,
        pub device_model: String,
    }

    impl SimHostRuntimeBridge {
        pub fn new(os_version: i32, device_model: impl Into<String>) -> Self {
            Self {
                os_version,
                device_model: device_model.into(),
            }
        }
    }

    impl HostRuntimeBridge for SimHostRuntimeBridge {
        fn os_version(&self) -> i32 {
            self.os_version
        }

        fn device_model(&self) -> String {
            self.device_model.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim::SimPlatformAudioApi;

    #[test]
    fn sample_rate_millihertz_converts_hertz_to_millihertz() {
        assert_eq!(PcmFormat::stereo_16(44_100).sample_rate_millihertz(), 44_100_000);
        assert_eq!(PcmFormat::stereo_16(22_050).sample_rate_millihertz(), 22_050_000);
    }

    #[test]
    fn create_audio_player_configures_millihertz_not_raw_hertz() {
        let platform = SimPlatformAudioApi::new();
        let format = PcmFormat::stereo_16(44_100);
        let player = platform
            .create_audio_player(EngineHandle(1), OutputMixHandle(1), format)
            .unwrap();
        assert_eq!(platform.configured_rate_millihertz(player), 44_100_000);
        assert_ne!(platform.configured_rate_millihertz(player), format.sample_rate_hz);
    }
}
