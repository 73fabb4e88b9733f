//! Public-facing backend: the dispatch surface an OpenAL core would bind
//! to the three globals `suspend`/`resume`/`setHostVm` plus the per-device
//! function-pointer table.
//!
//! The original exposes these as process-wide function pointers and
//! singletons; here they hang off one owned [`OpenslBackend`] object
//! instead of reproducing the original's global statics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::collaborators::{EngineHandle, HostRuntimeBridge, Mixer, OutputMixHandle, PlatformAudioApi};
use crate::device::{Device, DeviceId, LifecycleState};
use crate::engine::Engine;
use crate::error::BackendError;
use crate::probe::{Probe, ProbeKind};
use crate::registry::DeviceRegistry;

/// The external dispatch contract a thin C ABI shim would bind function
/// pointers to.
pub trait AlcBackend: Send + Sync {
    fn open(&self, name: &str) -> Result<DeviceId, BackendError>;
    fn reset(&self, device: DeviceId, sample_rate_hz: u32) -> Result<(), BackendError>;
    fn start(&self, device: DeviceId);
    fn stop(&self, device: DeviceId);
    fn close(&self, device: DeviceId);
    fn lock(&self, device: DeviceId);
    fn unlock(&self, device: DeviceId);
    /// Latency is not modeled: always 0.
    fn get_latency(&self, device: DeviceId) -> u32;
    fn suspend(&self);
    fn resume(&self);
    fn set_host_runtime_bridge(&self, bridge: Arc<dyn HostRuntimeBridge>);

    // Capture is out of scope for this backend; these are stubs returning
    // success/zero, matching the original dispatch table's capture entries.
    fn open_capture(&self, _name: &str) -> Result<DeviceId, BackendError> {
        Ok(DeviceId(0))
    }
    fn close_capture(&self, _device: DeviceId) {}
    fn start_capture(&self, _device: DeviceId) {}
    fn stop_capture(&self, _device: DeviceId) {}
    fn capture_samples(&self, _device: DeviceId, _dst: &mut [u8]) -> Result<(), BackendError> {
        Ok(())
    }
    fn available_samples(&self, _device: DeviceId) -> usize {
        0
    }
}

/// Snapshot of one device for diagnostics tooling, matching the teacher's
/// `types.rs` diagnostic structs.
#[derive(Debug, Serialize)]
pub struct DeviceSnapshot {
    pub id: u64,
    pub name: String,
    pub lifecycle: &'static str,
    pub ring_depth: u32,
    pub preroll: u32,
    pub lead: u32,
    pub producer_running: bool,
    pub enqueue_retries: u64,
    pub primer_enqueues: u64,
}

/// Snapshot of the whole backend for diagnostics tooling.
#[derive(Debug, Serialize)]
pub struct RegistrySnapshot {
    pub engine_created: bool,
    pub devices: Vec<DeviceSnapshot>,
}

impl RegistrySnapshot {
    /// Render this snapshot as pretty JSON for diagnostics logging/export,
    /// matching the teacher's `serde_json::to_string_pretty` dumps of
    /// settings/metadata structs.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn lifecycle_name(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Closed => "closed",
        LifecycleState::Opened => "opened",
        LifecycleState::Configured => "configured",
        LifecycleState::Playing => "playing",
        LifecycleState::Suspended => "suspended",
    }
}

/// A device plus the engine/output-mix handles its `open()` call acquired —
/// kept paired so `close()` releases exactly the one reference this device
/// holds, never more.
struct DeviceEntry {
    device: Arc<Device>,
    engine: EngineHandle,
    mix: OutputMixHandle,
}

/// The single owned backend object: probe, engine, registry, and the
/// collaborators devices are built against.
pub struct OpenslBackend {
    probe: Probe,
    engine: Engine,
    registry: DeviceRegistry,
    platform: Arc<dyn PlatformAudioApi>,
    mixer: Arc<dyn Mixer>,
    bridge: Mutex<Option<Arc<dyn HostRuntimeBridge>>>,
    devices: Mutex<HashMap<u64, DeviceEntry>>,
}

impl OpenslBackend {
    pub fn new(probe: Probe, platform: Arc<dyn PlatformAudioApi>, mixer: Arc<dyn Mixer>) -> Self {
        Self {
            probe,
            engine: Engine::new(),
            registry: DeviceRegistry::new(),
            platform,
            mixer,
            bridge: Mutex::new(None),
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.lock().unwrap().get(&id.0).map(|entry| Arc::clone(&entry.device))
    }

    /// Diagnostics snapshot: serialized device registry state for
    /// logging/inspection tooling.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut devices = Vec::new();
        self.registry.for_each(|d| {
            devices.push(DeviceSnapshot {
                id: d.id.0,
                name: d.name.clone(),
                lifecycle: lifecycle_name(d.lifecycle()),
                ring_depth: d.ring().depth(),
                preroll: d.ring().preroll(),
                lead: d.ring().lead(),
                producer_running: d.is_producer_running(),
                enqueue_retries: d.counters().enqueue_retries.load(std::sync::atomic::Ordering::Relaxed),
                primer_enqueues: d.counters().primer_enqueues.load(std::sync::atomic::Ordering::Relaxed),
            });
        });
        let snapshot = RegistrySnapshot {
            engine_created: self.engine.is_created(),
            devices,
        };
        if log::log_enabled!(log::Level::Trace) {
            match snapshot.to_json_pretty() {
                Ok(json) => log::trace!("opensl_pump: registry snapshot:\n{json}"),
                Err(e) => log::warn!("opensl_pump: failed to serialize registry snapshot: {e}"),
            }
        }
        snapshot
    }
}

impl AlcBackend for OpenslBackend {
    fn open(&self, name: &str) -> Result<DeviceId, BackendError> {
        self.probe
            .probe(ProbeKind::Device)
            .map_err(|_| BackendError::InvalidDevice)?;

        // The engine refcount is bumped exactly once per successful `open`
        // and released exactly once per `close` below, never gated on
        // whether this device was ever `reset`.
        let (engine, mix) = self.engine.ensure_created(&*self.platform)?;

        let tuning = self.probe.tuning();
        let device = Device::open(name, Arc::clone(&self.platform), Arc::clone(&self.mixer), tuning);
        let id = device.id;
        self.devices.lock().unwrap().insert(id.0, DeviceEntry { device: Arc::clone(&device), engine, mix });
        self.registry.add(device);
        log::debug!("opensl_pump: device {:?} opened as '{name}'", id);
        Ok(id)
    }

    fn reset(&self, device: DeviceId, sample_rate_hz: u32) -> Result<(), BackendError> {
        let (device, engine, mix) = {
            let devices = self.devices.lock().unwrap();
            let entry = devices.get(&device.0).ok_or(BackendError::InvalidDevice)?;
            (Arc::clone(&entry.device), entry.engine, entry.mix)
        };
        device.reset(engine, mix, sample_rate_hz)
    }

    fn start(&self, device: DeviceId) {
        if let Some(device) = self.device(device) {
            device.start();
        }
    }

    fn stop(&self, device: DeviceId) {
        if let Some(device) = self.device(device) {
            device.stop();
        }
    }

    fn close(&self, device_id: DeviceId) {
        if let Some(entry) = self.devices.lock().unwrap().remove(&device_id.0) {
            entry.device.close();
            self.registry.remove(device_id);
            self.engine.release(&*self.platform);
            log::debug!("opensl_pump: device {:?} closed", device_id);
        }
    }

    fn lock(&self, device: DeviceId) {
        if let Some(device) = self.device(device) {
            device.api_lock().lock();
        }
    }

    fn unlock(&self, device: DeviceId) {
        if let Some(device) = self.device(device) {
            device.api_lock().unlock();
        }
    }

    fn get_latency(&self, _device: DeviceId) -> u32 {
        0
    }

    fn suspend(&self) {
        log::info!("opensl_pump: global suspend");
        self.registry.suspend_all();
    }

    fn resume(&self) {
        log::info!("opensl_pump: global resume");
        self.registry.resume_all();
    }

    fn set_host_runtime_bridge(&self, bridge: Arc<dyn HostRuntimeBridge>) {
        self.probe.resolve_tuning(&*bridge);
        *self.bridge.lock().unwrap() = Some(bridge);
    }
}
