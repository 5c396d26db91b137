//! Musical vocabulary: basetones, note symbols, instruments, and the
//! resolution of a note in a key to a frequency.

mod basetone;
mod instrument;
mod note;

pub use basetone::Basetone;
pub use instrument::Instrument;
pub use note::{Accidental, Note, Register};

use crate::error::Result;

/// Frequency of `note` when scale degree "1" is `basetone`.
///
/// `reference_frequency(basetone) * 2^(offset / 12)`
pub fn frequency(note: Note, basetone: Basetone) -> f64 {
    basetone.reference_frequency() * 2f64.powf(note.semitone_offset() as f64 / 12.0)
}

/// Resolves a note symbol and basetone name to a frequency in Hz.
///
/// # Errors
///
/// `InvalidNote` if the symbol is not in the vocabulary, `InvalidBasetone`
/// if the basetone is not one of the 12 pitch classes.
///
/// # Examples
///
/// ```
/// let hz = pianocode::music::resolve("6", "C").unwrap();
/// assert!((hz - 440.0).abs() < 0.1);
/// ```
pub fn resolve(note: &str, basetone: &str) -> Result<f64> {
    let note: Note = note.parse()?;
    let basetone: Basetone = basetone.parse()?;
    Ok(frequency(note, basetone))
}

/// Finds the note of `basetone` whose frequency is within 0.01 Hz of `hz`.
pub fn note_for_frequency(hz: f64, basetone: Basetone) -> Option<Note> {
    Note::all().find(|note| (frequency(*note, basetone) - hz).abs() < 0.01)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_resolve_formula_for_all_pairs() {
        for basetone in Basetone::ALL {
            for note in Note::all() {
                let expected = basetone.reference_frequency()
                    * 2f64.powf(note.semitone_offset() as f64 / 12.0);
                let actual = resolve(&note.to_string(), basetone.name()).unwrap();
                assert!((actual - expected).abs() < 1e-9, "{note} in {basetone}");
            }
        }
    }

    #[test]
    fn test_octaves_double() {
        let low = resolve(".1", "A").unwrap();
        let mid = resolve("1", "A").unwrap();
        let high = resolve("^1", "A").unwrap();
        assert!((mid - 440.0).abs() < 1e-9);
        assert!((low - 220.0).abs() < 1e-9);
        assert!((high - 880.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(resolve("9", "C"), Err(EngineError::InvalidNote(_))));
        assert!(matches!(resolve("1", "X"), Err(EngineError::InvalidBasetone(_))));
    }

    #[test]
    fn test_note_for_frequency() {
        let hz = resolve("5", "G").unwrap();
        let note = note_for_frequency(hz, Basetone::G).unwrap();
        assert_eq!(note.semitone_offset(), 7);
        assert!(note_for_frequency(1000.5, Basetone::C).is_none());
    }
}
