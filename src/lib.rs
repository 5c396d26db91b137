//! pianocode - A low-latency note synthesis and playback engine.
//!
//! Notes are written as scale-degree symbols (`"1"`..`"7"`, with `#`/`b`
//! accidentals and `.`/`^` register prefixes) relative to a basetone, and
//! played with one of four synthesized instruments.
//!
//! ```no_run
//! use pianocode::{EngineSettings, PlaybackController};
//!
//! let engine = PlaybackController::with_default_output(EngineSettings::default())?;
//! engine.play_note("1", None)?;
//! engine.play_chord(&["1", "3", "5"], Some(1.5))?;
//! # Ok::<(), pianocode::EngineError>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod music;
pub mod preferences;
pub mod song;

// Re-export commonly used types
pub use audio::{PlaybackController, SettingsSnapshot, SongPlayback};
pub use config::{CachePolicy, EngineSettings, StreamConfig};
pub use error::{EngineError, Result};
pub use music::{resolve, Basetone, Instrument, Note};
pub use preferences::{JsonPreferences, NoPreferences, PreferenceStore, Preferences};
pub use song::{Song, SongEvent, SongSummary};
