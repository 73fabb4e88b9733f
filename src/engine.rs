//! Process-wide lazily-initialized engine handles.
//!
//! A refcounted `OnceLock<Mutex<_>>` singleton, created by the first device
//! open and destroyed when the last device closes.

use std::sync::{Mutex, OnceLock};

use crate::collaborators::{EngineHandle, OutputMixHandle, PlatformAudioApi};
use crate::error::BackendError;

struct EngineState {
    engine: EngineHandle,
    mix: OutputMixHandle,
    refcount: u32,
}

/// The process-global engine singleton.
pub struct Engine {
    inner: OnceLock<Mutex<Option<EngineState>>>,
}

impl Engine {
    pub const fn new() -> Self {
        Self { inner: OnceLock::new() }
    }

    fn cell(&self) -> &Mutex<Option<EngineState>> {
        self.inner.get_or_init(|| Mutex::new(None))
    }

    /// Returns the live engine/output-mix handles, creating them on first
    /// call. Any platform step failing aborts with `EngineInit` and leaves
    /// no partial state behind.
    pub fn ensure_created(&self, platform: &dyn PlatformAudioApi) -> Result<(EngineHandle, OutputMixHandle), BackendError> {
        let mut guard = self.cell().lock().unwrap();
        if let Some(state) = guard.as_mut() {
            state.refcount += 1;
            return Ok((state.engine, state.mix));
        }

        let engine = platform
            .create_engine()
            .map_err(|e| BackendError::EngineInit(e.to_string()))?;
        platform
            .realize_engine(engine)
            .map_err(|e| BackendError::EngineInit(e.to_string()))?;
        let mix = match platform.create_output_mix(engine) {
            Ok(mix) => mix,
            Err(e) => {
                platform.destroy_engine(engine);
                return Err(BackendError::EngineInit(e.to_string()));
            }
        };
        if let Err(e) = platform.realize_output_mix(mix) {
            platform.destroy_output_mix(mix);
            platform.destroy_engine(engine);
            return Err(BackendError::EngineInit(e.to_string()));
        }

        log::info!("opensl_pump: engine created");
        *guard = Some(EngineState { engine, mix, refcount: 1 });
        Ok((engine, mix))
    }

    /// Release one reference; tears the engine down (output mix first,
    /// then engine) once the refcount reaches zero.
    pub fn release(&self, platform: &dyn PlatformAudioApi) {
        let mut guard = self.cell().lock().unwrap();
        let done = if let Some(state) = guard.as_mut() {
            state.refcount = state.refcount.saturating_sub(1);
            state.refcount == 0
        } else {
            false
        };
        if done {
            if let Some(state) = guard.take() {
                platform.destroy_output_mix(state.mix);
                platform.destroy_engine(state.engine);
                log::info!("opensl_pump: engine destroyed");
            }
        }
    }

    pub fn is_created(&self) -> bool {
        self.cell().lock().unwrap().is_some()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::sim::SimPlatformAudioApi;

    #[test]
    fn ensure_created_is_refcounted_and_lazy() {
        let engine = Engine::new();
        let platform = SimPlatformAudioApi::new();
        assert!(!engine.is_created());

        engine.ensure_created(&platform).unwrap();
        engine.ensure_created(&platform).unwrap();
        assert_eq!(platform.live_engine_count(), 1);
        assert_eq!(platform.live_mix_count(), 1);

        engine.release(&platform);
        assert_eq!(platform.live_engine_count(), 1); // one ref remains

        engine.release(&platform);
        assert_eq!(platform.live_engine_count(), 0);
        assert_eq!(platform.destroyed_engine_count(), 1);
        assert_eq!(platform.destroyed_mix_count(), 1);
        assert!(!engine.is_created());
    }
}
