//! Error types for the playback engine.
//!
//! User input errors are rejected synchronously and leave prior state
//! untouched. Device and stream errors are mostly absorbed by the engine
//! (logged and turned into silent no-ops); only construction-time validation
//! and song loading surface them to callers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The note symbol is not part of the three-octave vocabulary.
    #[error("invalid note: {0}")]
    InvalidNote(String),

    /// The basetone is not one of the 12 pitch classes.
    #[error("invalid basetone: {0} (choose from C, C#, D, D#, E, F, F#, G, G#, A, A#, B)")]
    InvalidBasetone(String),

    /// The instrument is not one of piano, guitar, saxophone, violin.
    #[error("invalid instrument: {0} (choose from piano, guitar, saxophone, violin)")]
    InvalidInstrument(String),

    /// Volume outside of [0, 1].
    #[error("volume must be between 0.0 and 1.0, got {0}")]
    InvalidVolume(f32),

    /// Duration not positive or longer than the engine allows.
    #[error("invalid duration: {0}s")]
    InvalidDuration(f64),

    /// Frequency that is not a positive, finite number of Hz.
    #[error("invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// A chord without any notes.
    #[error("cannot play an empty chord")]
    EmptyChord,

    /// No audio output device could be reached.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The output stream stopped being active or a chunk write failed.
    #[error("audio stream unhealthy: {0}")]
    StreamUnhealthy(String),

    /// The consecutive stream failure budget is spent.
    #[error("stream error budget exhausted after {0} consecutive failures")]
    StreamExhausted(u32),

    /// The song description file does not exist.
    #[error("song not found: {}", .0.display())]
    SongNotFound(PathBuf),

    /// The song description is not a valid document.
    #[error("failed to parse song {}: {message}", .path.display())]
    SongParse { path: PathBuf, message: String },

    /// Any other I/O failure while reading a song file.
    #[error("failed to read song {}: {source}", .path.display())]
    SongIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// WAV rendering or writing failed.
    #[error("export failed: {0}")]
    Export(String),

    /// Preferences could not be read or written.
    #[error("preferences error: {0}")]
    Preferences(String),
}

impl EngineError {
    /// Returns true for errors caused by invalid caller input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidNote(_)
                | EngineError::InvalidBasetone(_)
                | EngineError::InvalidInstrument(_)
                | EngineError::InvalidVolume(_)
                | EngineError::InvalidDuration(_)
                | EngineError::InvalidFrequency(_)
                | EngineError::EmptyChord
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_classified() {
        assert!(EngineError::InvalidNote("x".into()).is_input_error());
        assert!(EngineError::InvalidVolume(2.0).is_input_error());
        assert!(EngineError::EmptyChord.is_input_error());
        assert!(EngineError::InvalidFrequency(f64::NAN).is_input_error());
        assert!(!EngineError::DeviceUnavailable("none".into()).is_input_error());
        assert!(!EngineError::SongNotFound(PathBuf::from("a.json")).is_input_error());
    }

    #[test]
    fn test_messages_name_the_offending_value() {
        let err = EngineError::InvalidInstrument("banjo".into());
        assert!(err.to_string().contains("banjo"));

        let err = EngineError::SongNotFound(PathBuf::from("songs/missing.json"));
        assert!(err.to_string().contains("songs/missing.json"));
    }
}
