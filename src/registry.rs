//! Bounded device registry for global suspend/resume fan-out.

use std::sync::{Arc, Mutex};

use crate::device::Device;

/// Maximum number of devices the registry tracks at once.
pub const CAPACITY: usize = 3;

/// A small bounded set of live devices.
pub struct DeviceRegistry {
    slots: Mutex<[Option<Arc<Device>>; CAPACITY]>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([None, None, None]),
        }
    }

    /// Insert into the first empty slot; silently no-op if full or already
    /// present.
    pub fn add(&self, device: Arc<Device>) {
        let mut slots = self.slots.lock().unwrap();
        if slots.iter().flatten().any(|d| d.id == device.id) {
            return;
        }
        if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(device);
        } else {
            log::warn!("opensl_pump: device registry full, dropping device {:?}", device.id);
        }
    }

    /// Clear the device's slot, if present.
    pub fn remove(&self, device_id: crate::device::DeviceId) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.as_ref().map(|d| d.id) == Some(device_id) {
                *slot = None;
                return;
            }
        }
    }

    /// Release the registry lock around each callback so `f` may re-enter
    /// registry operations.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Device>)) {
        let snapshot: Vec<Arc<Device>> = {
            let slots = self.slots.lock().unwrap();
            slots.iter().flatten().cloned().collect()
        };
        for device in &snapshot {
            f(device);
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().unwrap().iter().flatten().count()
    }

    /// Suspend every registered device.
    pub fn suspend_all(&self) {
        self.for_each(|d| d.suspend());
    }

    /// Resume every registered device.
    pub fn resume_all(&self) {
        self.for_each(|d| {
            let _ = d.resume();
        });
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::sim::{SimMixer, SimPlatformAudioApi};
    use crate::config::TuningProfile;

    fn open_device(platform: &Arc<dyn crate::collaborators::PlatformAudioApi>, name: &str) -> Arc<Device> {
        Device::open(
            name,
            Arc::clone(platform),
            Arc::new(SimMixer::new(0)) as Arc<dyn crate::collaborators::Mixer>,
            TuningProfile::default(),
        )
    }

    #[test]
    fn registry_caps_at_three_and_dedupes() {
        let platform: Arc<dyn crate::collaborators::PlatformAudioApi> = Arc::new(SimPlatformAudioApi::new());
        let registry = DeviceRegistry::new();
        let a = open_device(&platform, "a");
        let b = open_device(&platform, "b");
        let c = open_device(&platform, "c");
        let d = open_device(&platform, "d");

        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&a)); // duplicate, no-op
        registry.add(Arc::clone(&b));
        registry.add(Arc::clone(&c));
        registry.add(Arc::clone(&d)); // registry full, dropped

        assert_eq!(registry.live_count(), 3);

        registry.remove(a.id);
        assert_eq!(registry.live_count(), 2);
    }
}
