pub mod config;
pub mod dsp;
pub mod error;
pub mod input;
pub mod keymap;
pub mod sample_bank;
pub mod store;
pub mod tracker;
pub mod voice;

pub use config::PianoConfig;
pub use error::{ConfigError, KeyMapError, LoadError, PianoError, PitchParseError, VoiceError};
pub use input::{InputAction, InputController, InputEvent, InputKind, KeyTransition};
pub use keymap::{Accidental, KeyMap, Note, PianoKeyDescriptor, Pitch};
pub use sample_bank::{LoadState, SampleBank, SampleBankLoader, SampleSource};
pub use store::{KeyStateEvent, KeyStateStore};
pub use tracker::KeyPressTracker;
pub use voice::{NotePlayer, SharedGraph, VoiceEngine, VoiceSettings};

use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the pianokeys-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: the default key layout as a list of key descriptors.
#[wasm_bindgen]
pub fn default_key_map() -> Result<JsValue, JsValue> {
    let map = KeyMap::default();
    serde_wasm_bindgen::to_value(&map.descriptors()).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// The key map after `octave_shift` octave steps (negative shifts down).
/// Steps past the keyboard range are no-ops.
pub fn shifted_key_map(octave_shift: i32) -> KeyMap {
    let mut map = KeyMap::default();
    for _ in 0..octave_shift.unsigned_abs().min(u32::from(keymap::HIGHEST_OCTAVE)) {
        map = if octave_shift > 0 { map.shift_up() } else { map.shift_down() };
    }
    map
}

/// WASM-exposed: pitch name ("C4") for a computer key after an octave shift.
#[wasm_bindgen]
pub fn pitch_for_key(key: &str, octave_shift: i32) -> Option<String> {
    shifted_key_map(octave_shift)
        .resolve(key)
        .map(|k| k.pitch().to_string())
}
