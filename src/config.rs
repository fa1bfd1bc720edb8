//! Configuration — JSON settings for the engine, voices and sample location.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dsp::engine::AudioEngine;
use crate::error::ConfigError;
use crate::voice::VoiceSettings;

/// Highest decay floor accepted. Voices leave the graph once they settle at
/// the floor, so it has to be close to silence.
pub const MAX_DECAY_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PianoConfig {
    /// Output sample rate of the audio engine.
    pub sample_rate: u32,
    pub voice: VoiceSettings,
    /// Directory holding one folder of samples per instrument.
    pub sample_root: Option<PathBuf>,
    pub default_instrument: String,
    /// Initial sustain toggle.
    pub sustain: bool,
    /// Initial soften toggle.
    pub soften: bool,
}

impl Default for PianoConfig {
    fn default() -> Self {
        PianoConfig {
            sample_rate: 44100,
            voice: VoiceSettings::default(),
            sample_root: None,
            default_instrument: "piano".to_string(),
            sustain: false,
            soften: false,
        }
    }
}

impl PianoConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PianoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.voice;
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if !(v.release_seconds > 0.0) {
            return Err(ConfigError::Invalid("voice.release_seconds must be positive".into()));
        }
        if !(v.decay_seconds > v.release_seconds) {
            return Err(ConfigError::Invalid(format!(
                "voice.decay_seconds ({}) must be longer than voice.release_seconds ({})",
                v.decay_seconds, v.release_seconds
            )));
        }
        if !(v.decay_floor > 0.0 && v.decay_floor <= MAX_DECAY_FLOOR) {
            return Err(ConfigError::Invalid(format!(
                "voice.decay_floor ({}) must be in (0, {MAX_DECAY_FLOOR}]",
                v.decay_floor
            )));
        }
        for (name, gain) in [("attack_gain", v.attack_gain), ("soft_attack_gain", v.soft_attack_gain)] {
            if !(gain > v.decay_floor) {
                return Err(ConfigError::Invalid(format!(
                    "voice.{name} ({gain}) must be above voice.decay_floor ({})",
                    v.decay_floor
                )));
            }
        }
        if self.default_instrument.trim().is_empty() {
            return Err(ConfigError::Invalid("default_instrument must not be empty".into()));
        }
        Ok(())
    }

    /// An audio engine at the configured rate that drops voices once they
    /// settle at the voice decay floor.
    pub fn audio_engine(&self) -> AudioEngine {
        AudioEngine::new(self.sample_rate as f64).with_silence_floor(self.voice.decay_floor)
    }

    /// The configured sample directory, or the platform data directory.
    #[cfg(feature = "native")]
    pub fn resolved_sample_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.sample_root {
            return Some(root.clone());
        }
        directories::ProjectDirs::from("", "", "pianokeys").map(|dirs| dirs.data_dir().join("samples"))
    }
}
