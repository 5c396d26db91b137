//! Audio engine for note synthesis and playback.
//!
//! This module turns resolved frequencies into sound. It provides:
//! - Additive synthesis of four instrument timbres
//! - A precomputed tone cache for low-latency playback
//! - A persistent, self-healing output stream over rodio
//! - The playback controller tying them together
//! - WAV export of songs

pub mod cache;
pub mod engine;
pub mod export;
pub mod mock;
pub mod output;
pub mod stream;
pub mod synth;

pub use cache::ToneCache;
pub use engine::{PlaybackController, SettingsSnapshot, SongPlayback};
pub use export::{export_song_to_wav, ExportSummary};
pub use output::{list_output_devices, AudioOutput, DeviceInfo, OutputError, RodioOutput};
pub use stream::{StreamEngine, StreamState, WriteOutcome};
pub use synth::{NoiseSource, Synthesizer};
