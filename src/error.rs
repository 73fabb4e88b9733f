//! Typed backend errors.

/// Errors the pump/device/registry/probe layers can produce.
///
/// Mirrors the shape of `clip-dr`'s `commands/recording/error.rs::AudioError`:
/// one flat `thiserror` enum rather than per-module error types, since every
/// caller in this crate ultimately surfaces one of these to the OpenAL core.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Platform audio library not found, failed to load, or a required
    /// symbol could not be resolved.
    #[error("platform audio library unavailable: {0}")]
    PlatformUnavailable(String),

    /// `open` was called before a successful probe registered the device.
    #[error("invalid device: probe never succeeded")]
    InvalidDevice,

    /// Engine or output-mix creation/realize failed.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    /// Player creation or configuration failed during `reset`.
    #[error("device reset failed: {0}")]
    ResetFailed(String),

    /// Allocator failure constructing ring or device state.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Platform buffer queue refused an enqueue; caller retries next tick.
    #[error("enqueue transiently failed: {0}")]
    EnqueueTransient(String),
}
