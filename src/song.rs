//! Song descriptions.
//!
//! A song is a JSON document:
//!
//! ```json
//! {
//!     "title": "Ode to Joy",
//!     "basetone": "C",
//!     "notes": [
//!         {"note": "3", "duration": 0.5},
//!         {"note": ["1", "3", "5"], "duration": 1.0}
//!     ]
//! }
//! ```
//!
//! Note symbols may also be written as bare integers (`{"note": 1}`).
//! Document-level problems (missing file, invalid JSON, unknown basetone)
//! are errors for the whole song. Problems with a single event are only
//! reported when that event is resolved, so a sequencer can skip it and
//! carry on.

use crate::audio::cache::ToneCache;
use crate::config::{DEFAULT_EVENT_DURATION, MAX_DURATION};
use crate::error::{EngineError, Result};
use crate::music::{Basetone, Instrument, Note};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

fn default_title() -> String {
    "Unknown Song".to_string()
}

/// A song: an ordered list of notes and chords in one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    #[serde(default = "default_title")]
    pub title: String,

    /// Key the song is written in. Events are played in this basetone
    /// regardless of the engine's current one.
    #[serde(default)]
    pub basetone: Basetone,

    #[serde(default)]
    pub notes: Vec<SongEvent>,
}

/// One entry of a song, kept as raw JSON so that a bad entry does not
/// invalidate the rest of the song. Usually `{"note": ..., "duration": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongEvent(Value);

/// Why a single song event could not be played.
#[derive(Debug, Error, PartialEq)]
pub enum SongEventError {
    #[error("event is not an object: {0}")]
    NotAnObject(String),

    #[error("missing 'note' field")]
    MissingNote,

    #[error("invalid note {0}")]
    InvalidNote(String),

    #[error("empty chord")]
    EmptyChord,

    #[error("invalid duration {0}")]
    InvalidDuration(String),
}

/// A validated event, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub notes: Vec<Note>,
    pub chord: bool,
    pub duration: f64,
}

fn parse_note(value: &Value) -> std::result::Result<Note, SongEventError> {
    let symbol = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_i64() => n.to_string(),
        other => return Err(SongEventError::InvalidNote(other.to_string())),
    };
    symbol
        .parse()
        .map_err(|_| SongEventError::InvalidNote(value.to_string()))
}

fn parse_duration(value: Option<&Value>) -> std::result::Result<f64, SongEventError> {
    let duration = match value {
        None => return Ok(DEFAULT_EVENT_DURATION),
        Some(Value::Number(n)) => n.as_f64(),
        Some(_) => None,
    };
    match duration {
        Some(d) if d > 0.0 && d <= MAX_DURATION => Ok(d),
        _ => Err(SongEventError::InvalidDuration(
            value.map(Value::to_string).unwrap_or_default(),
        )),
    }
}

impl SongEvent {
    /// A single note.
    pub fn note(symbol: &str, duration: f64) -> Self {
        Self(json!({ "note": symbol, "duration": duration }))
    }

    /// A chord.
    pub fn chord(symbols: &[&str], duration: f64) -> Self {
        Self(json!({ "note": symbols, "duration": duration }))
    }

    /// The event as written in the song document.
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Validates the event.
    pub fn resolve(&self) -> std::result::Result<ResolvedEvent, SongEventError> {
        let fields = match &self.0 {
            Value::Object(fields) => fields,
            other => return Err(SongEventError::NotAnObject(other.to_string())),
        };
        let note = match fields.get("note") {
            None | Some(Value::Null) => return Err(SongEventError::MissingNote),
            Some(note) => note,
        };
        let duration = parse_duration(fields.get("duration"))?;

        match note {
            Value::Array(values) => {
                if values.is_empty() {
                    return Err(SongEventError::EmptyChord);
                }
                let notes = values
                    .iter()
                    .map(parse_note)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ResolvedEvent {
                    notes,
                    chord: true,
                    duration,
                })
            }
            value => Ok(ResolvedEvent {
                notes: vec![parse_note(value)?],
                chord: false,
                duration,
            }),
        }
    }
}

impl From<Value> for SongEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl ResolvedEvent {
    /// Renders the event's samples from the cache.
    pub fn render(
        &self,
        cache: &ToneCache,
        basetone: Basetone,
        instrument: Instrument,
        volume: f32,
    ) -> Result<Vec<f32>> {
        if self.chord {
            cache.chord(basetone, &self.notes, instrument, self.duration, volume)
        } else {
            Ok(cache.lookup(basetone, self.notes[0], instrument, self.duration, volume))
        }
    }
}

impl Song {
    /// Creates an empty song.
    pub fn new(title: impl Into<String>, basetone: Basetone) -> Self {
        Self {
            title: title.into(),
            basetone,
            notes: Vec::new(),
        }
    }

    /// Parses a song from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a song file.
    ///
    /// # Errors
    ///
    /// `SongNotFound` if the file does not exist, `SongParse` if it is not a
    /// valid song document, `SongIo` for other read failures.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::SongNotFound(path.to_path_buf()),
            _ => EngineError::SongIo {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_json(&json).map_err(|e| EngineError::SongParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Total length in seconds of the playable events.
    pub fn duration_seconds(&self) -> f64 {
        self.notes
            .iter()
            .filter_map(|e| e.resolve().ok())
            .map(|e| e.duration)
            .sum()
    }
}

/// Result of sequencing a song.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SongSummary {
    pub title: String,
    /// Events played (or rendered).
    pub played: usize,
    /// Events skipped because they were malformed.
    pub skipped: usize,
    /// True if the song was stopped before its end.
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_document() {
        let song = Song::from_json(
            r#"{
                "title": "Scale",
                "basetone": "G",
                "notes": [
                    {"note": "1", "duration": 0.25},
                    {"note": 2},
                    {"note": ["1", 3, "5"], "duration": 1.0}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(song.title, "Scale");
        assert_eq!(song.basetone, Basetone::G);
        assert_eq!(song.notes.len(), 3);
        assert_eq!(song.notes[1].resolve().unwrap().duration, 0.5);

        let chord = song.notes[2].resolve().unwrap();
        assert!(chord.chord);
        assert_eq!(chord.notes.len(), 3);
        assert_eq!(chord.notes[1].to_string(), "3");

        let single = song.notes[1].resolve().unwrap();
        assert!(!single.chord);
        assert_eq!(single.notes[0].to_string(), "2");
    }

    #[test]
    fn test_defaults() {
        let song = Song::from_json("{}").unwrap();
        assert_eq!(song.title, "Unknown Song");
        assert_eq!(song.basetone, Basetone::C);
        assert!(song.notes.is_empty());
    }

    #[test]
    fn test_event_errors() {
        let missing = SongEvent::from(json!({ "duration": 0.5 }));
        assert_eq!(missing.resolve(), Err(SongEventError::MissingNote));

        assert!(matches!(
            SongEvent::note("9", 0.5).resolve(),
            Err(SongEventError::InvalidNote(_))
        ));
        assert_eq!(
            SongEvent::chord(&[], 0.5).resolve(),
            Err(SongEventError::EmptyChord)
        );
        assert!(matches!(
            SongEvent::note("1", -1.0).resolve(),
            Err(SongEventError::InvalidDuration(_))
        ));
        let boolean = SongEvent::from(json!({ "note": true, "duration": 0.5 }));
        assert!(matches!(boolean.resolve(), Err(SongEventError::InvalidNote(_))));
    }

    #[test]
    fn test_malformed_events_do_not_fail_the_document() {
        let song = Song::from_json(
            r#"{
                "notes": [
                    {"note": "1", "duration": 0.5},
                    {"note": "2", "duration": "slow"},
                    42,
                    {"note": "4", "duration": null},
                    "5",
                    {"note": "3"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(song.notes.len(), 6);

        assert!(song.notes[0].resolve().is_ok());
        assert_eq!(
            song.notes[1].resolve(),
            Err(SongEventError::InvalidDuration("\"slow\"".into()))
        );
        assert_eq!(
            song.notes[2].resolve(),
            Err(SongEventError::NotAnObject("42".into()))
        );
        assert_eq!(
            song.notes[3].resolve(),
            Err(SongEventError::InvalidDuration("null".into()))
        );
        assert!(matches!(
            song.notes[4].resolve(),
            Err(SongEventError::NotAnObject(_))
        ));
        assert_eq!(song.notes[5].resolve().unwrap().duration, 0.5);
        assert!((song.duration_seconds() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_and_oversized_durations_are_invalid() {
        for duration in [0.0, MAX_DURATION + 1.0] {
            assert!(matches!(
                SongEvent::note("1", duration).resolve(),
                Err(SongEventError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(Song::load(&path), Err(EngineError::SongNotFound(p)) if p == path));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"notes\": [").unwrap();
        assert!(matches!(
            Song::load(file.path()),
            Err(EngineError::SongParse { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"basetone": "H", "notes": []}}"#).unwrap();
        assert!(matches!(
            Song::load(file.path()),
            Err(EngineError::SongParse { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"notes": "1 2 3"}}"#).unwrap();
        assert!(matches!(
            Song::load(file.path()),
            Err(EngineError::SongParse { .. })
        ));
    }

    #[test]
    fn test_duration_seconds() {
        let mut song = Song::new("t", Basetone::C);
        song.notes.push(SongEvent::note("1", 0.5));
        song.notes.push(SongEvent::chord(&["1", "3"], 1.0));
        assert!((song.duration_seconds() - 1.5).abs() < 1e-12);
    }
}
