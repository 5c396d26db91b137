//! Instruments select a harmonic/envelope recipe in the synthesizer.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    #[default]
    Piano,
    Guitar,
    Saxophone,
    Violin,
}

impl Instrument {
    pub const ALL: [Instrument; 4] = [
        Instrument::Piano,
        Instrument::Guitar,
        Instrument::Saxophone,
        Instrument::Violin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Instrument::Piano => "piano",
            Instrument::Guitar => "guitar",
            Instrument::Saxophone => "saxophone",
            Instrument::Violin => "violin",
        }
    }

    /// Whether repeated synthesis with the same arguments is bit-identical.
    /// The saxophone's breathiness term is noisy unless seeded.
    pub fn is_deterministic(self) -> bool {
        self != Instrument::Saxophone
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Instrument {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Instrument::ALL
            .iter()
            .copied()
            .find(|i| i.name() == name)
            .ok_or_else(|| EngineError::InvalidInstrument(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("piano".parse::<Instrument>().unwrap(), Instrument::Piano);
        assert_eq!("Violin".parse::<Instrument>().unwrap(), Instrument::Violin);
        assert!(matches!(
            "banjo".parse::<Instrument>(),
            Err(EngineError::InvalidInstrument(name)) if name == "banjo"
        ));
    }

    #[test]
    fn test_only_saxophone_is_noisy() {
        let noisy: Vec<_> = Instrument::ALL
            .into_iter()
            .filter(|i| !i.is_deterministic())
            .collect();
        assert_eq!(noisy, vec![Instrument::Saxophone]);
    }
}
