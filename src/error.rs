//! Error types shared across the crate.
//!
//! Conditions the piano treats as normal (unmapped keys, stray releases,
//! octave shifts past the keyboard range) are not errors and never show up
//! here.

use crate::keymap::Pitch;

/// A pitch string could not be parsed (e.g. "H4", "C#", "E#3").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid pitch '{0}'")]
pub struct PitchParseError(pub String);

/// A key map violated one of its construction invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyMapError {
    #[error("Key map is empty")]
    Empty,

    #[error("Input key '{0}' is mapped more than once")]
    DuplicateKey(String),

    #[error("Key '{key}' ({pitch}) is not above the previous key")]
    OutOfOrder { key: String, pitch: Pitch },

    #[error("Key '{key}' has octave {octave}, outside {min}..={max}")]
    OctaveOutOfRange {
        key: String,
        octave: u8,
        min: u8,
        max: u8,
    },
}

/// Errors surfaced when triggering a voice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("No sample loaded for pitch {pitch}")]
    MissingSample { pitch: Pitch },

    #[error("No sample bank is loaded")]
    NoSampleBank,
}

/// Errors from fetching or decoding an instrument's sample set.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Sample fetch failed: {0}")]
    Fetch(String),

    #[error("Sample server reported: {0}")]
    Remote(String),

    #[error("Invalid base64 data for {pitch}: {source}")]
    Base64 {
        pitch: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Could not decode audio for {pitch}: {reason}")]
    Decode { pitch: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed sample response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Load superseded by a newer request")]
    Superseded,
}

impl LoadError {
    /// Short reason string stored in a failed load state.
    pub fn reason(&self) -> String {
        match self {
            LoadError::Remote(reason) | LoadError::Fetch(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors from loading or validating a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error for the input controller and the CLI.
#[derive(Debug, thiserror::Error)]
pub enum PianoError {
    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pitch(#[from] PitchParseError),

    #[error(transparent)]
    KeyMap(#[from] KeyMapError),
}
