//! Engine configuration.
//!
//! Constants for the audio defaults plus the explicit settings object the
//! engine is constructed from. Nothing here is global mutable state: a
//! [`PlaybackController`](crate::audio::engine::PlaybackController) owns its
//! settings and changes them only through its own setters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default output sample rate (44.1 kHz).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default note duration in seconds. Cached tones are generated at this length.
pub const DEFAULT_DURATION: f64 = 1.0;

/// Longest note or chord the engine will synthesize, in seconds.
pub const MAX_DURATION: f64 = 10.0;

/// Default master volume.
pub const DEFAULT_VOLUME: f32 = 0.7;

/// Volume change applied by `volume_up` / `volume_down`.
pub const VOLUME_STEP: f32 = 0.05;

/// Minimum and maximum master volume.
pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 1.0;

/// Output buffer sizes tried in order when opening the stream.
/// Start small for latency, fall back to larger for compatibility.
pub const BUFFER_SIZES: [u32; 4] = [512, 1024, 2048, 4096];

/// Samples written per chunk. The stop flag is checked between chunks.
pub const CHUNK_FRAMES: usize = 512;

/// Consecutive stream failures tolerated before the engine goes silent.
pub const MAX_STREAM_ERRORS: u32 = 3;

/// How long `stop()` waits for the background playback task.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `close()` waits for background tasks.
pub const CLOSE_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Duration of a song event that does not declare one.
pub const DEFAULT_EVENT_DURATION: f64 = 0.5;

/// How the tone cache is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Every basetone, note and instrument is generated at construction.
    #[default]
    Eager,
    /// Only the initial basetone is generated at construction; other
    /// basetones are filled in on first use.
    Lazy,
}

/// Tuning for the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Candidate buffer sizes (frames), tried in order.
    pub buffer_sizes: Vec<u32>,
    /// Samples per write chunk.
    pub chunk_frames: usize,
    /// Consecutive failure budget.
    pub max_errors: u32,
    /// Bounded wait used by `stop()`.
    #[serde(with = "millis")]
    pub stop_timeout: Duration,
    /// Bounded wait used by `close()`.
    #[serde(with = "millis")]
    pub close_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_sizes: BUFFER_SIZES.to_vec(),
            chunk_frames: CHUNK_FRAMES,
            max_errors: MAX_STREAM_ERRORS,
            stop_timeout: STOP_JOIN_TIMEOUT,
            close_timeout: CLOSE_JOIN_TIMEOUT,
        }
    }
}

/// Construction parameters for the engine.
///
/// Instrument and basetone are kept as the raw names a caller supplied; they
/// are validated when the engine is built and an invalid value prevents
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Default note duration in seconds (the cached duration).
    pub duration: f64,
    /// Play synchronously on the caller's thread when true.
    pub blocking: bool,
    /// Initial instrument name.
    pub instrument: String,
    /// Initial basetone name.
    pub basetone: String,
    /// Initial master volume in [0, 1].
    pub volume: f32,
    /// Tone cache population strategy.
    pub cache_policy: CachePolicy,
    /// Seed for the saxophone breathiness noise. `None` draws from entropy.
    pub breath_seed: Option<u64>,
    /// Output stream tuning.
    pub stream: StreamConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            duration: DEFAULT_DURATION,
            blocking: true,
            instrument: "piano".to_string(),
            basetone: "C".to_string(),
            volume: DEFAULT_VOLUME,
            cache_policy: CachePolicy::Eager,
            breath_seed: None,
            stream: StreamConfig::default(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.instrument, "piano");
        assert_eq!(settings.basetone, "C");
        assert!((settings.volume - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.stream.buffer_sizes, vec![512, 1024, 2048, 4096]);
        assert_eq!(settings.stream.max_errors, 3);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: EngineSettings = serde_json::from_str(
            r#"{"instrument": "violin", "cache_policy": "lazy", "stream": {"stop_timeout": 50}}"#,
        )
        .unwrap();
        assert_eq!(settings.instrument, "violin");
        assert_eq!(settings.basetone, "C");
        assert_eq!(settings.cache_policy, CachePolicy::Lazy);
        assert_eq!(settings.stream.stop_timeout, Duration::from_millis(50));
        assert_eq!(settings.stream.chunk_frames, CHUNK_FRAMES);
    }
}
