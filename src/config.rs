use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::ADSRConfig;
use crate::error::ConfigError;
use crate::indicator::KeyboardLayout;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub parser: ParserConfig,
    pub playback: PlaybackConfig,
    pub indicator: IndicatorConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Event ceiling for down-sampling; `None` keeps every event.
    pub max_events: Option<usize>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_events: Some(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub default_speed: f64,
    /// Longest rest honored between two events, after speed scaling.
    pub max_silence_ms: u64,
    /// How long a key highlight or indicator stays lit.
    pub highlight_ms: u64,
}

impl PlaybackConfig {
    pub fn max_silence(&self) -> Duration {
        Duration::from_millis(self.max_silence_ms)
    }

    pub fn highlight(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            max_silence_ms: 5000,
            highlight_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub layout: KeyboardLayout,
    /// 0.0 -> 1.0
    pub brightness: f32,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            layout: KeyboardLayout::Piano88,
            brightness: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub volume: f32,
    pub adsr: ADSRConfig,
    /// Substring of a MIDI output port name; when set, notes also go out over MIDI.
    pub midi_out_port: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.3,
            adsr: ADSRConfig {
                attack: 0.005,
                decay: 0.3,
                sustain: 0.4,
                release: 0.4,
            },
            midi_out_port: None,
        }
    }
}

impl PlayerConfig {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: PlayerConfig = ron::from_str(&ron_string)?;
        Ok(config)
    }

    /// Missing or invalid files fall back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), "using default config: {e}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keyglow.ron");

        let mut config = PlayerConfig::default();
        config.parser.max_events = None;
        config.playback.default_speed = 1.5;
        config.indicator.layout = KeyboardLayout::Keyboard61;
        config.audio.midi_out_port = Some("FluidSynth".to_string());
        config.save(&path).unwrap();

        let loaded = PlayerConfig::load(&path).unwrap();
        assert_eq!(loaded.parser.max_events, None);
        assert_eq!(loaded.playback.default_speed, 1.5);
        assert_eq!(loaded.indicator.layout, KeyboardLayout::Keyboard61);
        assert_eq!(loaded.audio.midi_out_port.as_deref(), Some("FluidSynth"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyglow.ron");
        fs::write(&path, "(playback: (max_silence_ms: 2000))").unwrap();

        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.playback.max_silence_ms, 2000);
        assert_eq!(config.playback.highlight_ms, 200);
        assert_eq!(config.parser.max_events, Some(500));
    }

    #[test]
    fn bad_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.ron");
        assert_eq!(PlayerConfig::load_or_default(&missing).playback.max_silence_ms, 5000);

        let broken = dir.path().join("broken.ron");
        fs::write(&broken, "(playback: [").unwrap();
        assert!(matches!(PlayerConfig::load(&broken), Err(ConfigError::Parse(_))));
        assert_eq!(PlayerConfig::load_or_default(&broken).parser.max_events, Some(500));
    }
}
