//! Key map — computer keys to piano keys, with bounded octave shifting.
//!
//! The map is an ordered list of descriptors, lowest pitch first. Shifting
//! the octave replaces every descriptor at once, or nothing at all when the
//! shift would leave the playable range.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KeyMapError, PitchParseError};

/// Lowest octave a key may be shifted to.
pub const LOWEST_OCTAVE: u8 = 1;
/// Highest octave a key may be shifted to.
pub const HIGHEST_OCTAVE: u8 = 7;

// ── Notes & Pitches ─────────────────────────────────────────

/// The twelve note names, spelled with flats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Note {
    C,
    Db,
    D,
    Eb,
    E,
    F,
    Gb,
    G,
    Ab,
    A,
    Bb,
    B,
}

/// Whether a key is a white (natural) or black (flat) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accidental {
    Natural,
    Flat,
}

impl Note {
    pub const ALL: [Note; 12] = [
        Note::C,
        Note::Db,
        Note::D,
        Note::Eb,
        Note::E,
        Note::F,
        Note::Gb,
        Note::G,
        Note::Ab,
        Note::A,
        Note::Bb,
        Note::B,
    ];

    /// Semitones above C.
    pub fn semitone(self) -> u8 {
        self as u8
    }

    pub fn accidental(self) -> Accidental {
        match self {
            Note::Db | Note::Eb | Note::Gb | Note::Ab | Note::Bb => Accidental::Flat,
            _ => Accidental::Natural,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Note::C => "C",
            Note::Db => "Db",
            Note::D => "D",
            Note::Eb => "Eb",
            Note::E => "E",
            Note::F => "F",
            Note::Gb => "Gb",
            Note::G => "G",
            Note::Ab => "Ab",
            Note::A => "A",
            Note::Bb => "Bb",
            Note::B => "B",
        }
    }

    fn from_semitone(semitone: u8) -> Note {
        Note::ALL[(semitone % 12) as usize]
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A note in a specific octave, e.g. "C4". Sample banks are keyed by pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pitch {
    pub note: Note,
    pub octave: u8,
}

impl Pitch {
    pub fn new(note: Note, octave: u8) -> Self {
        Pitch { note, octave }
    }

    /// MIDI note number (C4 = 60).
    pub fn midi_note(&self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.note.semitone() as i32
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.note, self.octave)
    }
}

impl FromStr for Pitch {
    type Err = PitchParseError;

    /// Parse "C4", "Db3" or the sharp alias "C#3" (stored as "Db3").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PitchParseError(s.to_string());
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            return Err(invalid());
        }

        let natural = match bytes[0].to_ascii_uppercase() {
            b'C' => 0,
            b'D' => 2,
            b'E' => 4,
            b'F' => 5,
            b'G' => 7,
            b'A' => 9,
            b'B' => 11,
            _ => return Err(invalid()),
        };

        let (semitone, rest) = match bytes.get(1) {
            // Cb, Fb, E#, B# are enharmonic with a different letter; not accepted.
            Some(b'b') if !matches!(natural, 0 | 5) => (natural - 1, &s[2..]),
            Some(b'#') if !matches!(natural, 4 | 11) => (natural + 1, &s[2..]),
            Some(b'b' | b'#') => return Err(invalid()),
            _ => (natural, &s[1..]),
        };

        // A single digit: no sign, no padding, octaves 0..=9.
        let octave = match rest.as_bytes() {
            [d @ b'0'..=b'9'] => d - b'0',
            _ => return Err(invalid()),
        };
        Ok(Pitch::new(Note::from_semitone(semitone), octave))
    }
}

impl TryFrom<String> for Pitch {
    type Error = PitchParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pitch> for String {
    fn from(pitch: Pitch) -> Self {
        pitch.to_string()
    }
}

// ── Descriptors ─────────────────────────────────────────────

/// One playable piano key and the computer key that plays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PianoKeyDescriptor {
    pub input_key_id: String,
    pub note: Note,
    pub octave: u8,
    pub accidental: Accidental,
}

impl PianoKeyDescriptor {
    pub fn new(input_key_id: &str, note: Note, octave: u8) -> Self {
        PianoKeyDescriptor {
            input_key_id: input_key_id.to_lowercase(),
            note,
            octave,
            accidental: note.accidental(),
        }
    }

    pub fn pitch(&self) -> Pitch {
        Pitch::new(self.note, self.octave)
    }

    fn with_octave(&self, octave: u8) -> Self {
        PianoKeyDescriptor {
            octave,
            ..self.clone()
        }
    }
}

/// Default layout: three octaves from C3, starting at `q`.
const DEFAULT_LAYOUT: [(&str, Note, u8); 36] = [
    ("q", Note::C, 3),
    ("2", Note::Db, 3),
    ("w", Note::D, 3),
    ("3", Note::Eb, 3),
    ("e", Note::E, 3),
    ("r", Note::F, 3),
    ("5", Note::Gb, 3),
    ("t", Note::G, 3),
    ("6", Note::Ab, 3),
    ("y", Note::A, 3),
    ("7", Note::Bb, 3),
    ("u", Note::B, 3),
    ("i", Note::C, 4),
    ("9", Note::Db, 4),
    ("o", Note::D, 4),
    ("0", Note::Eb, 4),
    ("p", Note::E, 4),
    ("[", Note::F, 4),
    ("=", Note::Gb, 4),
    ("]", Note::G, 4),
    ("a", Note::Ab, 4),
    ("z", Note::A, 4),
    ("s", Note::Bb, 4),
    ("x", Note::B, 4),
    ("c", Note::C, 5),
    ("f", Note::Db, 5),
    ("v", Note::D, 5),
    ("g", Note::Eb, 5),
    ("b", Note::E, 5),
    ("n", Note::F, 5),
    ("j", Note::Gb, 5),
    ("m", Note::G, 5),
    ("k", Note::Ab, 5),
    (",", Note::A, 5),
    ("l", Note::Bb, 5),
    (".", Note::B, 5),
];

// ── Key Map ─────────────────────────────────────────────────

/// Ordered computer-key → piano-key association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    keys: Vec<PianoKeyDescriptor>,
    index: HashMap<String, usize>,
}

impl KeyMap {
    /// Build a map, checking unique ids, ascending pitch and octave range.
    pub fn new(keys: Vec<PianoKeyDescriptor>) -> Result<Self, KeyMapError> {
        if keys.is_empty() {
            return Err(KeyMapError::Empty);
        }

        let mut index = HashMap::with_capacity(keys.len());
        let mut previous: Option<i32> = None;
        for (i, key) in keys.iter().enumerate() {
            if !(LOWEST_OCTAVE..=HIGHEST_OCTAVE).contains(&key.octave) {
                return Err(KeyMapError::OctaveOutOfRange {
                    key: key.input_key_id.clone(),
                    octave: key.octave,
                    min: LOWEST_OCTAVE,
                    max: HIGHEST_OCTAVE,
                });
            }
            let midi = key.pitch().midi_note();
            if previous.is_some_and(|p| midi <= p) {
                return Err(KeyMapError::OutOfOrder {
                    key: key.input_key_id.clone(),
                    pitch: key.pitch(),
                });
            }
            previous = Some(midi);
            if index.insert(key.input_key_id.clone(), i).is_some() {
                return Err(KeyMapError::DuplicateKey(key.input_key_id.clone()));
            }
        }

        Ok(KeyMap { keys, index })
    }

    /// Look up the piano key for a computer key (case-insensitive).
    pub fn resolve(&self, input_key_id: &str) -> Option<&PianoKeyDescriptor> {
        let i = match self.index.get(input_key_id) {
            Some(&i) => i,
            None => *self.index.get(&input_key_id.to_lowercase())?,
        };
        self.keys.get(i)
    }

    pub fn contains(&self, input_key_id: &str) -> bool {
        self.resolve(input_key_id).is_some()
    }

    pub fn descriptors(&self) -> &[PianoKeyDescriptor] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The lowest key (first in order).
    pub fn lowest(&self) -> &PianoKeyDescriptor {
        &self.keys[0]
    }

    /// The highest key (last in order).
    pub fn highest(&self) -> &PianoKeyDescriptor {
        &self.keys[self.keys.len() - 1]
    }

    /// Octaves of the lowest and highest keys.
    pub fn octave_range(&self) -> (u8, u8) {
        (self.lowest().octave, self.highest().octave)
    }

    pub fn can_shift_up(&self) -> bool {
        self.highest().octave < HIGHEST_OCTAVE
    }

    pub fn can_shift_down(&self) -> bool {
        self.lowest().octave > LOWEST_OCTAVE
    }

    /// Every key one octave higher, or an unchanged copy at the top of the range.
    pub fn shift_up(&self) -> KeyMap {
        if !self.can_shift_up() {
            return self.clone();
        }
        self.transposed(|octave| octave + 1)
    }

    /// Every key one octave lower, or an unchanged copy at the bottom of the range.
    pub fn shift_down(&self) -> KeyMap {
        if !self.can_shift_down() {
            return self.clone();
        }
        self.transposed(|octave| octave - 1)
    }

    fn transposed(&self, f: impl Fn(u8) -> u8) -> KeyMap {
        KeyMap {
            keys: self.keys.iter().map(|k| k.with_octave(f(k.octave))).collect(),
            index: self.index.clone(),
        }
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        let keys = DEFAULT_LAYOUT
            .iter()
            .map(|&(id, note, octave)| PianoKeyDescriptor::new(id, note, octave))
            .collect::<Vec<_>>();
        let index = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.input_key_id.clone(), i))
            .collect();
        KeyMap { keys, index }
    }
}
