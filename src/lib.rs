//! Core ring-buffer audio pump and device lifecycle for an OpenAL
//! playback backend targeting a callback-driven low-level output service
//! (OpenSL ES). See [`dispatch::OpenslBackend`] for the entry point and
//! [`collaborators`] for the trait boundary a host embeds real platform
//! bindings behind.

pub mod collaborators;
pub mod config;
pub mod consumer;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod probe;
pub mod producer;
pub mod registry;
pub mod ring;

pub use collaborators::{AudioCallbackSink, HostRuntimeBridge, Mixer, PcmFormat, PlatformAudioApi, PlayState};
pub use config::TuningProfile;
pub use device::{Device, DeviceId, LifecycleState};
pub use dispatch::{AlcBackend, DeviceSnapshot, OpenslBackend, RegistrySnapshot};
pub use error::BackendError;
pub use probe::{Probe, ProbeKind};
pub use registry::DeviceRegistry;
