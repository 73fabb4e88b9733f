//! Tuning tables resolved once from OS version / device model.
//!
//! Kept as pure functions over plain inputs (no JNI/bridge call inside this
//! module) so the resolution logic is unit-testable without a host runtime.

/// Payload capacity when nothing overrides it.
pub const DEFAULT_BUFFER_BYTES: usize = 4096;
/// Payload capacity at or below 22 050 Hz (half of [`DEFAULT_BUFFER_BYTES`]).
pub const LOW_RATE_BUFFER_BYTES: usize = DEFAULT_BUFFER_BYTES / 2;
/// Payload capacity on named low-memory/low-latency devices.
pub const LOW_MEMORY_BUFFER_BYTES: usize = 1024;

/// Ring depth on platform API >= 16 (Jellybean and later).
pub const RING_DEPTH_MODERN: u32 = 8;
/// Ring depth on platform API < 16, and on named low-latency devices
/// regardless of API level.
pub const RING_DEPTH_LEGACY: u32 = 4;

/// Producer lead on platform API >= 16.
pub const PREROLL_MODERN: u32 = 5;
/// Producer lead on platform API < 16, and on named low-latency devices
/// regardless of API level.
pub const PREROLL_LEGACY: u32 = 1;

/// OS version at or above which the "modern" ring depth/preroll apply.
pub const MODERN_API_THRESHOLD: i32 = 16;

/// Device models known to need less buffering, taken verbatim from
/// `original_source/Alc/backends/opensl.c`'s `low_buffer_models` table.
/// Matched by prefix, matching the original's `strncmp`.
pub const LOW_BUFFER_MODELS: &[&str] = &[
    "GT-I9300",
    "GT-I9305",
    "SHV-E210",
    "SGH-T999",
    "SGH-I747",
    "SGH-N064",
    "SC-06D",
    "SGH-N035",
    "SC-03E",
    "SCH-R530",
    "SCH-I535",
    "SPH-L710",
    "GT-I9308",
    "SCH-I939",
    "Kindle Fire",
];

fn is_low_buffer_model(device_model: &str) -> bool {
    LOW_BUFFER_MODELS.iter().any(|m| device_model.starts_with(m))
}

/// Resolved tuning for one probe/host-runtime-bridge attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningProfile {
    pub ring_depth: u32,
    pub preroll: u32,
    /// Payload capacity cap in bytes, independent of sample rate — the
    /// device-model-driven override (1024) when applicable, else the
    /// unscaled default (4096). The sample-rate halving in
    /// [`TuningProfile::active_buffer_bytes`] is applied on top of this cap,
    /// never by reallocating ring storage (slot storage is sized once, at
    /// this cap, and never resized across `reset`).
    pub buffer_bytes_cap: usize,
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self {
            ring_depth: RING_DEPTH_LEGACY,
            preroll: PREROLL_LEGACY,
            buffer_bytes_cap: DEFAULT_BUFFER_BYTES,
        }
    }
}

impl TuningProfile {
    /// Resolve ring depth, preroll, and buffer-size cap from the OS version
    /// and device model reported by the host runtime bridge.
    pub fn resolve(os_version: i32, device_model: &str) -> Self {
        let (mut ring_depth, mut preroll) = if os_version >= MODERN_API_THRESHOLD {
            (RING_DEPTH_MODERN, PREROLL_MODERN)
        } else {
            (RING_DEPTH_LEGACY, PREROLL_LEGACY)
        };

        let mut buffer_bytes_cap = DEFAULT_BUFFER_BYTES;
        if is_low_buffer_model(device_model) {
            log::info!("opensl_pump: using reduced buffering for device model '{device_model}'");
            buffer_bytes_cap = LOW_MEMORY_BUFFER_BYTES;
            ring_depth = RING_DEPTH_LEGACY;
            preroll = PREROLL_LEGACY;
        }

        Self {
            ring_depth,
            preroll,
            buffer_bytes_cap,
        }
    }

    /// Active payload length in bytes for a given sample rate, sliced out of
    /// the fixed `buffer_bytes_cap` slot storage.
    pub fn active_buffer_bytes(&self, sample_rate_hz: u32) -> usize {
        if sample_rate_hz <= 22_050 {
            (self.buffer_bytes_cap / 2).max(1)
        } else {
            self.buffer_bytes_cap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_api_defaults() {
        let t = TuningProfile::resolve(17, "Pixel 6");
        assert_eq!(t.ring_depth, RING_DEPTH_MODERN);
        assert_eq!(t.preroll, PREROLL_MODERN);
        assert_eq!(t.buffer_bytes_cap, DEFAULT_BUFFER_BYTES);
    }

    #[test]
    fn legacy_api_defaults() {
        let t = TuningProfile::resolve(14, "Pixel 6");
        assert_eq!(t.ring_depth, RING_DEPTH_LEGACY);
        assert_eq!(t.preroll, PREROLL_LEGACY);
    }

    #[test]
    fn low_buffer_model_overrides_regardless_of_api() {
        let modern = TuningProfile::resolve(21, "GT-I9300");
        assert_eq!(modern.preroll, PREROLL_LEGACY);
        assert_eq!(modern.ring_depth, RING_DEPTH_LEGACY);
        assert_eq!(modern.buffer_bytes_cap, LOW_MEMORY_BUFFER_BYTES);
    }

    #[test]
    fn low_buffer_model_prefix_match() {
        // original uses strncmp against the model prefix — a suffixed
        // variant string should still match.
        assert!(is_low_buffer_model("GT-I9300-XX"));
        assert!(!is_low_buffer_model("Pixel 6"));
    }

    #[test]
    fn low_sample_rate_halves_buffer() {
        let t = TuningProfile::resolve(21, "Pixel 6");
        assert_eq!(t.active_buffer_bytes(44_100), DEFAULT_BUFFER_BYTES);
        assert_eq!(t.active_buffer_bytes(22_050), LOW_RATE_BUFFER_BYTES);
    }
}
