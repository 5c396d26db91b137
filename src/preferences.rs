//! Persistence of user-facing settings.
//!
//! The engine calls a [`PreferenceStore`] after every successful setter.
//! Failures are logged by the engine and never undo the change.

use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use crate::music::{Basetone, Instrument};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The persisted subset of engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub instrument: Instrument,
    pub basetone: Basetone,
    pub volume: f32,
}

impl Preferences {
    /// Seeds construction parameters with stored values.
    pub fn apply_to(&self, settings: &mut EngineSettings) {
        settings.instrument = self.instrument.name().to_string();
        settings.basetone = self.basetone.name().to_string();
        settings.volume = self.volume;
    }
}

/// Where setters persist their new values.
pub trait PreferenceStore: Send + Sync {
    fn save(&self, preferences: &Preferences) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreferences;

impl PreferenceStore for NoPreferences {
    fn save(&self, _preferences: &Preferences) -> Result<()> {
        Ok(())
    }
}

/// Stores preferences as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonPreferences {
    path: PathBuf,
}

impl JsonPreferences {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads stored preferences. A missing file is not an error.
    pub fn load(&self) -> Result<Option<Preferences>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::Preferences(e.to_string())),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| EngineError::Preferences(format!("{}: {}", self.path.display(), e)))
    }
}

impl PreferenceStore for JsonPreferences {
    fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::Preferences(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(preferences)
            .map_err(|e| EngineError::Preferences(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| EngineError::Preferences(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPreferences::new(dir.path().join("config/user_preferences.json"));
        assert_eq!(store.load().unwrap(), None);

        let prefs = Preferences {
            instrument: Instrument::Saxophone,
            basetone: Basetone::FSharp,
            volume: 0.4,
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load().unwrap(), Some(prefs.clone()));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"saxophone\""));
        assert!(raw.contains("\"F#\""));

        let mut settings = EngineSettings::default();
        prefs.apply_to(&mut settings);
        assert_eq!(settings.instrument, "saxophone");
        assert_eq!(settings.basetone, "F#");
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonPreferences::new(&path).load(),
            Err(EngineError::Preferences(_))
        ));
    }
}
