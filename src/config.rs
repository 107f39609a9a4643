use crate::engine::EngineDefaults;
use crate::error::SpeechError;
use crate::voices::VoicePreferences;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Named speaking-rate presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePreset {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl RatePreset {
    /// Numeric rate passed to the engine
    pub fn to_numeric(self) -> f32 {
        match self {
            RatePreset::Slow => 0.7,
            RatePreset::Normal => 0.98,
            RatePreset::Fast => 1.3,
        }
    }
}

impl std::str::FromStr for RatePreset {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slow" => Ok(RatePreset::Slow),
            "normal" => Ok(RatePreset::Normal),
            "fast" => Ok(RatePreset::Fast),
            other => Err(SpeechError::Config(format!(
                "Unknown rate '{}'. Available: slow, normal, fast",
                other
            ))),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Backend
    pub backend: String,
    pub espeak_binary: String,

    // Speech
    pub lang: String,
    pub rate: RatePreset,
    pub pitch: f32,

    // Voice selection
    pub preferred_voice: Option<String>,
    pub prefer_local: bool,

    // Meta
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "espeak".to_string(),
            espeak_binary: "espeak-ng".to_string(),
            lang: "en-US".to_string(),
            rate: RatePreset::Normal,
            pitch: 1.02,
            preferred_voice: None,
            prefer_local: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location, or fall back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from `path`.
    ///
    /// A missing file yields defaults. A corrupt file is moved aside to
    /// `*.json.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn voice_preferences(&self) -> VoicePreferences {
        VoicePreferences {
            preferred_voice_name: self.preferred_voice.clone(),
            prefer_local: self.prefer_local,
        }
    }

    /// Engine defaults described by this config
    pub fn engine_defaults(&self) -> EngineDefaults {
        EngineDefaults {
            lang: self.lang.clone(),
            rate: self.rate.to_numeric(),
            pitch: self.pitch,
            preferences: self.voice_preferences(),
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("civic-speech")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend, "espeak");
        assert_eq!(config.lang, "en-US");
        assert_eq!(config.rate, RatePreset::Normal);
        assert!(!config.prefer_local);
    }

    #[test]
    fn test_rate_presets() {
        assert_eq!(RatePreset::Slow.to_numeric(), 0.7);
        assert_eq!(RatePreset::Normal.to_numeric(), 0.98);
        assert_eq!(RatePreset::Fast.to_numeric(), 1.3);
        assert_eq!("FAST".parse::<RatePreset>().ok(), Some(RatePreset::Fast));
        assert!(matches!(
            "warp".parse::<RatePreset>(),
            Err(SpeechError::Config(_))
        ));
    }

    #[test]
    fn test_engine_defaults_from_config() {
        let config = Config {
            rate: RatePreset::Slow,
            preferred_voice: Some("Samantha".into()),
            ..Config::default()
        };
        let defaults = config.engine_defaults();
        assert_eq!(defaults.rate, 0.7);
        assert_eq!(defaults.pitch, 1.02);
        assert_eq!(
            defaults.preferences.preferred_voice_name.as_deref(),
            Some("Samantha")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"rate":"fast"}"#).expect("Failed to parse");
        assert_eq!(config.rate, RatePreset::Fast);
        assert_eq!(config.lang, "en-US");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested/config.json");

        let config = Config {
            lang: "my-MM".into(),
            prefer_local: true,
            ..Config::default()
        };
        config.save_to(&path).expect("Failed to save");

        let restored = Config::load_from(&path).expect("Failed to load");
        assert_eq!(restored.lang, "my-MM");
        assert!(restored.prefer_local);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = Config::load_from(&dir.path().join("absent.json")).expect("Failed to load");
        assert_eq!(config.backend, "espeak");
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not valid json").expect("Failed to write");

        let config = Config::load_from(&path).expect("Failed to load");
        assert_eq!(config.lang, "en-US");
        assert!(!path.exists());
        assert!(dir.path().join("config.json.corrupt").exists());
    }
}
