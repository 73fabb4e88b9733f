//! Runtime discovery of the platform audio library, its entry-point
//! symbols, and host-driven tuning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::collaborators::HostRuntimeBridge;
use crate::config::TuningProfile;
use crate::error::BackendError;

/// `probe(kind)` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Device,
    AllDevices,
}

/// The well-known filesystem path the original probes with `stat` before
/// `dlopen` — the platform library is detected by `stat` on a single
/// fixed absolute path.
pub const PLATFORM_LIBRARY_PATH: &str = "/system/lib/libOpenSLES.so";

/// Entry-point symbols resolved after a successful load.
pub const REQUIRED_SYMBOLS: &[&str] = &[
    "slCreateEngine",
    "SL_IID_ENGINE",
    "SL_IID_ANDROIDSIMPLEBUFFERQUEUE",
    "SL_IID_PLAY",
    "SL_IID_BUFFERQUEUE",
];

/// A filesystem/symbol prober, abstracted so tests can substitute a
/// fake presence check without touching the real path in
/// [`PLATFORM_LIBRARY_PATH`].
pub trait LibraryLocator: Send + Sync {
    /// Returns `Ok(())` if the library exists and every symbol in
    /// `REQUIRED_SYMBOLS` resolves, `Err` with a diagnostic otherwise.
    fn locate(&self) -> Result<(), BackendError>;
}

/// Checks the real filesystem path: verifies the platform audio library
/// exists, dynamically loads it, and resolves its symbols.
pub struct FilesystemLocator {
    path: String,
}

impl FilesystemLocator {
    pub fn new() -> Self {
        Self {
            path: PLATFORM_LIBRARY_PATH.to_string(),
        }
    }
}

impl Default for FilesystemLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "real-platform")]
impl LibraryLocator for FilesystemLocator {
    fn locate(&self) -> Result<(), BackendError> {
        if !std::path::Path::new(&self.path).exists() {
            return Err(BackendError::PlatformUnavailable(format!("{} not found", self.path)));
        }
        // Safety: `dlopen`ing a platform system library path that exists
        // and loading well-known symbols from it, consistent with the
        // original probe's `dlopen`/`dlsym` sequence.
        let lib = unsafe { libloading::Library::new(&self.path) }
            .map_err(|e| BackendError::PlatformUnavailable(e.to_string()))?;
        for sym in REQUIRED_SYMBOLS {
            let name = std::ffi::CString::new(*sym).unwrap();
            let resolved: Result<libloading::Symbol<*const ()>, _> = unsafe { lib.get(name.as_bytes_with_nul()) };
            if resolved.is_err() {
                return Err(BackendError::PlatformUnavailable(format!("missing symbol {sym}")));
            }
        }
        Ok(())
    }
}

#[cfg(not(feature = "real-platform"))]
impl LibraryLocator for FilesystemLocator {
    fn locate(&self) -> Result<(), BackendError> {
        if !std::path::Path::new(&self.path).exists() {
            return Err(BackendError::PlatformUnavailable(format!("{} not found", self.path)));
        }
        Ok(())
    }
}

/// Idempotent probe state plus the resolved tuning.
pub struct Probe {
    locator: Box<dyn LibraryLocator>,
    loaded: AtomicBool,
    last_error: Mutex<Option<String>>,
    tuning: Mutex<TuningProfile>,
}

impl Probe {
    pub fn new(locator: Box<dyn LibraryLocator>) -> Self {
        Self {
            locator,
            loaded: AtomicBool::new(false),
            last_error: Mutex::new(None),
            tuning: Mutex::new(TuningProfile::default()),
        }
    }

    pub fn with_real_platform_locator() -> Self {
        Self::new(Box::new(FilesystemLocator::new()))
    }

    /// Idempotent: a prior success short-circuits without touching the
    /// filesystem again; a prior failure is re-raised without a second
    /// attempt either — the shared library is loaded once.
    pub fn probe(&self, _kind: ProbeKind) -> Result<(), BackendError> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(err) = self.last_error.lock().unwrap().clone() {
            return Err(BackendError::PlatformUnavailable(err));
        }
        match self.locator.locate() {
            Ok(()) => {
                self.loaded.store(true, Ordering::Release);
                log::info!("opensl_pump: platform audio library probed successfully");
                Ok(())
            }
            Err(e) => {
                *self.last_error.lock().unwrap() = Some(e.to_string());
                log::warn!("opensl_pump: platform probe failed: {e}");
                Err(e)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Tuning resolution: called once, when the host runtime bridge
    /// delivers the VM handle.
    pub fn resolve_tuning(&self, bridge: &dyn HostRuntimeBridge) {
        let resolved = TuningProfile::resolve(bridge.os_version(), &bridge.device_model());
        *self.tuning.lock().unwrap() = resolved;
    }

    pub fn tuning(&self) -> TuningProfile {
        *self.tuning.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::sim::SimHostRuntimeBridge;

    struct AlwaysOk;
    impl LibraryLocator for AlwaysOk {
        fn locate(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct AlwaysFail;
    impl LibraryLocator for AlwaysFail {
        fn locate(&self) -> Result<(), BackendError> {
            Err(BackendError::PlatformUnavailable("missing".into()))
        }
    }

    #[test]
    fn probe_success_is_idempotent() {
        let locator = std::sync::Arc::new(CountingLocator::new(true));
        let probe = Probe::new(Box::new(locator.clone()));
        probe.probe(ProbeKind::Device).unwrap();
        probe.probe(ProbeKind::Device).unwrap();
        probe.probe(ProbeKind::Device).unwrap();
        assert!(probe.is_available());
        assert_eq!(
            locator.calls.load(Ordering::Relaxed),
            1,
            "locate() must run once no matter how many times probe() is called"
        );
    }

    #[test]
    fn probe_failure_does_not_register_device() {
        let probe = Probe::new(Box::new(AlwaysFail));
        assert!(probe.probe(ProbeKind::Device).is_err());
        assert!(!probe.is_available());
    }

    #[test]
    fn tuning_resolution_reflects_bridge() {
        let probe = Probe::new(Box::new(AlwaysOk));
        let bridge = SimHostRuntimeBridge::new(21, "Pixel 6");
        probe.resolve_tuning(&bridge);
        assert_eq!(probe.tuning().preroll, crate::config::PREROLL_MODERN);
    }

    struct CountingLocator {
        ok: bool,
        calls: std::sync::atomic::AtomicU32,
    }

    impl CountingLocator {
        fn new(ok: bool) -> Self {
            Self {
                ok,
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    impl LibraryLocator for CountingLocator {
        fn locate(&self) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.ok {
                Ok(())
            } else {
                Err(BackendError::PlatformUnavailable("missing".into()))
            }
        }
    }

    // Lets the test keep an `Arc` handle to read `calls` after the `Box`
    // has taken ownership for `Probe`.
    impl LibraryLocator for std::sync::Arc<CountingLocator> {
        fn locate(&self) -> Result<(), BackendError> {
            (**self).locate()
        }
    }
}
