//! Basetones: the pitch class assigned to scale degree "1".

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the 12 pitch classes, each with a fixed octave-4 reference frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Basetone {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl Basetone {
    /// All basetones in chromatic order starting at C.
    pub const ALL: [Basetone; 12] = [
        Basetone::C,
        Basetone::CSharp,
        Basetone::D,
        Basetone::DSharp,
        Basetone::E,
        Basetone::F,
        Basetone::FSharp,
        Basetone::G,
        Basetone::GSharp,
        Basetone::A,
        Basetone::ASharp,
        Basetone::B,
    ];

    /// Reference frequency in Hz for octave 4.
    pub fn reference_frequency(self) -> f64 {
        match self {
            Basetone::C => 261.63,
            Basetone::CSharp => 277.18,
            Basetone::D => 293.66,
            Basetone::DSharp => 311.13,
            Basetone::E => 329.63,
            Basetone::F => 349.23,
            Basetone::FSharp => 369.99,
            Basetone::G => 392.00,
            Basetone::GSharp => 415.30,
            Basetone::A => 440.00,
            Basetone::ASharp => 466.16,
            Basetone::B => 493.88,
        }
    }

    /// The conventional name, e.g. "C#".
    pub fn name(self) -> &'static str {
        match self {
            Basetone::C => "C",
            Basetone::CSharp => "C#",
            Basetone::D => "D",
            Basetone::DSharp => "D#",
            Basetone::E => "E",
            Basetone::F => "F",
            Basetone::FSharp => "F#",
            Basetone::G => "G",
            Basetone::GSharp => "G#",
            Basetone::A => "A",
            Basetone::ASharp => "A#",
            Basetone::B => "B",
        }
    }
}

impl Default for Basetone {
    fn default() -> Self {
        Basetone::C
    }
}

impl fmt::Display for Basetone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Basetone {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Basetone::ALL
            .iter()
            .copied()
            .find(|b| b.name() == s.trim())
            .ok_or_else(|| EngineError::InvalidBasetone(s.to_string()))
    }
}

impl TryFrom<String> for Basetone {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Basetone> for String {
    fn from(value: Basetone) -> Self {
        value.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_names() {
        for basetone in Basetone::ALL {
            assert_eq!(basetone.name().parse::<Basetone>().unwrap(), basetone);
        }
    }

    #[test]
    fn test_reject_unknown() {
        assert!(matches!(
            "H".parse::<Basetone>(),
            Err(EngineError::InvalidBasetone(_))
        ));
        assert!("Db".parse::<Basetone>().is_err());
        assert!("".parse::<Basetone>().is_err());
    }

    #[test]
    fn test_reference_frequencies_ascend() {
        let freqs: Vec<f64> = Basetone::ALL.iter().map(|b| b.reference_frequency()).collect();
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Basetone::A.reference_frequency(), 440.0);
    }
}
