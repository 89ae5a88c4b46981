//! Persistent user settings, stored as RON.

use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::mapping::DEFAULT_SCHEME_ID;
use crate::pipeline::{DEFAULT_NOTE_MAX, DEFAULT_NOTE_MIN, TransformConfig};
use crate::playback::{MAX_SPEED, MIN_SPEED};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheme_id: String,
    pub note_min: u8,
    pub note_max: u8,
    pub remove_percussion: bool,
    pub max_voices: usize,
    pub speed: f32,
    pub count_in_beats: u32,
    pub looping: bool,
    pub stuck_key_timeout_secs: f64,
    /// Preferred input port name fragment; `None` means no auto-connect.
    pub midi_port: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheme_id: DEFAULT_SCHEME_ID.to_owned(),
            note_min: DEFAULT_NOTE_MIN,
            note_max: DEFAULT_NOTE_MAX,
            remove_percussion: true,
            max_voices: 0,
            speed: 1.0,
            count_in_beats: 4,
            looping: false,
            stuck_key_timeout_secs: 10.0,
            midi_port: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            ron::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.note_min >= self.note_max {
            return Err(Error::Config(format!(
                "note range {}..{} is empty",
                self.note_min, self.note_max
            )));
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(Error::Config(format!(
                "speed {} outside [{MIN_SPEED}, {MAX_SPEED}]",
                self.speed
            )));
        }
        Ok(())
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            note_min: self.note_min,
            note_max: self.note_max,
            remove_percussion: self.remove_percussion,
            max_voices: self.max_voices,
            ..TransformConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.scheme_id, "wwm_36");
        assert_eq!(settings.transform_config().note_min, DEFAULT_NOTE_MIN);
    }

    #[test]
    fn ron_round_trip() {
        let mut settings = Settings::default();
        settings.speed = 1.5;
        settings.midi_port = Some("Piano".to_owned());
        let text = ron::ser::to_string_pretty(&settings, PrettyConfig::default()).unwrap();
        let back: Settings = ron::from_str(&text).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let back: Settings = ron::from_str("(speed: 0.5)").unwrap();
        assert_eq!(back.speed, 0.5);
        assert_eq!(back.scheme_id, "wwm_36");
    }

    #[test]
    fn bad_range_rejected() {
        let settings = Settings {
            note_min: 80,
            note_max: 60,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn bad_speed_rejected() {
        let settings = Settings {
            speed: 3.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
