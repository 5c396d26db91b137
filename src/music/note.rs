//! Note symbols.
//!
//! A note symbol encodes register, accidental and scale degree:
//!
//! - `.` prefix: low register (one octave below the basetone)
//! - no prefix: middle register
//! - `^` prefix: high register (one octave above)
//! - `#` / `b` before the digit: sharp / flat
//! - digit `1`-`7`: the major-scale degree
//!
//! So `^#4` is the high fa-sharp and `.b7` the low ti-flat. Only the
//! spellings that land between two scale degrees exist (`#3` and `b4` do
//! not), which gives 17 spellings per register and 36 distinct pitches.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semitones above the tonic for each major-scale degree 1-7.
const DEGREE_SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Solfege syllables for each degree.
const SOLFEGE: [&str; 7] = ["do", "re", "mi", "fa", "sol", "la", "ti"];

/// Octave band of a note relative to the basetone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Low,
    Middle,
    High,
}

impl Register {
    fn octave_shift(self) -> i32 {
        match self {
            Register::Low => -12,
            Register::Middle => 0,
            Register::High => 12,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Register::Low => ".",
            Register::Middle => "",
            Register::High => "^",
        }
    }
}

/// Sharp, flat or natural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accidental {
    Natural,
    Sharp,
    Flat,
}

/// A validated note symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note {
    register: Register,
    accidental: Accidental,
    /// Scale degree 1-7.
    degree: u8,
}

impl Note {
    /// Creates a note, rejecting degrees outside 1-7 and spellings that do
    /// not exist (`#3`, `#7`, `b1`, `b4`).
    pub fn new(register: Register, accidental: Accidental, degree: u8) -> Option<Self> {
        if !(1..=7).contains(&degree) {
            return None;
        }
        let valid = match accidental {
            Accidental::Natural => true,
            Accidental::Sharp => matches!(degree, 1 | 2 | 4 | 5 | 6),
            Accidental::Flat => matches!(degree, 2 | 3 | 5 | 6 | 7),
        };
        valid.then_some(Self {
            register,
            accidental,
            degree,
        })
    }

    /// Semitone offset relative to the basetone's reference frequency (-12 to +23).
    pub fn semitone_offset(&self) -> i32 {
        let base = DEGREE_SEMITONES[(self.degree - 1) as usize];
        let shift = match self.accidental {
            Accidental::Natural => 0,
            Accidental::Sharp => 1,
            Accidental::Flat => -1,
        };
        self.register.octave_shift() + base + shift
    }

    pub fn register(&self) -> Register {
        self.register
    }

    pub fn accidental(&self) -> Accidental {
        self.accidental
    }

    pub fn degree(&self) -> u8 {
        self.degree
    }

    /// Human-readable solfege name, e.g. "low re", "fa#", "high ti-flat".
    pub fn solfege(&self) -> String {
        let syllable = SOLFEGE[(self.degree - 1) as usize];
        let accidental = match self.accidental {
            Accidental::Natural => "",
            Accidental::Sharp => "#",
            Accidental::Flat => "-flat",
        };
        match self.register {
            Register::Low => format!("low {}{}", syllable, accidental),
            Register::Middle => format!("{}{}", syllable, accidental),
            Register::High => format!("high {}{}", syllable, accidental),
        }
    }

    /// Every valid spelling, low register first.
    pub fn all() -> impl Iterator<Item = Note> {
        [Register::Low, Register::Middle, Register::High]
            .into_iter()
            .flat_map(|register| {
                (1..=7u8).flat_map(move |degree| {
                    [Accidental::Natural, Accidental::Sharp, Accidental::Flat]
                        .into_iter()
                        .filter_map(move |accidental| Note::new(register, accidental, degree))
                })
            })
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accidental = match self.accidental {
            Accidental::Natural => "",
            Accidental::Sharp => "#",
            Accidental::Flat => "b",
        };
        write!(f, "{}{}{}", self.register.prefix(), accidental, self.degree)
    }
}

impl FromStr for Note {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidNote(s.to_string());
        let mut rest = s.trim();

        let register = if let Some(r) = rest.strip_prefix('.') {
            rest = r;
            Register::Low
        } else if let Some(r) = rest.strip_prefix('^') {
            rest = r;
            Register::High
        } else {
            Register::Middle
        };

        let accidental = if let Some(r) = rest.strip_prefix('#') {
            rest = r;
            Accidental::Sharp
        } else if let Some(r) = rest.strip_prefix('b') {
            rest = r;
            Accidental::Flat
        } else {
            Accidental::Natural
        };

        if rest.len() != 1 {
            return Err(invalid());
        }
        let degree = rest.parse::<u8>().map_err(|_| invalid())?;
        Note::new(register, accidental, degree).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Note {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Note> for String {
    fn from(value: Note) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn offset(symbol: &str) -> i32 {
        symbol.parse::<Note>().unwrap().semitone_offset()
    }

    #[test]
    fn test_vocabulary_size() {
        let notes: Vec<Note> = Note::all().collect();
        assert_eq!(notes.len(), 51);

        let pitches: HashSet<i32> = notes.iter().map(|n| n.semitone_offset()).collect();
        assert_eq!(pitches.len(), 36);
        assert_eq!(pitches.iter().min(), Some(&-12));
        assert_eq!(pitches.iter().max(), Some(&23));
    }

    #[test]
    fn test_offsets() {
        assert_eq!(offset(".1"), -12);
        assert_eq!(offset(".b2"), -11);
        assert_eq!(offset(".7"), -1);
        assert_eq!(offset("1"), 0);
        assert_eq!(offset("#4"), 6);
        assert_eq!(offset("b5"), 6);
        assert_eq!(offset("7"), 11);
        assert_eq!(offset("^1"), 12);
        assert_eq!(offset("^#4"), 18);
        assert_eq!(offset("^7"), 23);
    }

    #[test]
    fn test_display_roundtrips_symbol() {
        for note in Note::all() {
            assert_eq!(note.to_string().parse::<Note>().unwrap(), note);
        }
    }

    #[test]
    fn test_reject_invalid_symbols() {
        for symbol in ["", "0", "8", "#3", "#7", "b1", "b4", "^^1", "1#", "11", "x", "._1"] {
            assert!(
                matches!(symbol.parse::<Note>(), Err(EngineError::InvalidNote(_))),
                "{symbol} should be rejected"
            );
        }
    }

    #[test]
    fn test_solfege() {
        assert_eq!("1".parse::<Note>().unwrap().solfege(), "do");
        assert_eq!(".2".parse::<Note>().unwrap().solfege(), "low re");
        assert_eq!("^#4".parse::<Note>().unwrap().solfege(), "high fa#");
    }
}
