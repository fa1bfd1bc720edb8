//! Voice engine — starts, releases and tracks one voice handle per pitch.
//!
//! A trigger starts a voice at the attack gain and immediately schedules a
//! long exponential decay, so a note fades like a struck piano string even
//! if it is never released. A release schedules a much shorter damped fade
//! from wherever the gain currently is.
//!
//! Only the most recent voice at a pitch is tracked. Retriggering replaces
//! the handle without stopping the older voice, which keeps decaying on its
//! own; a later release therefore only affects the newest voice.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dsp::engine::{AudioGraph, VoiceId};
use crate::dsp::envelope::GainEnvelope;
use crate::error::VoiceError;
use crate::keymap::Pitch;
use crate::sample_bank::SampleBank;

/// Audio graph shared between the voice engine and whoever renders it.
pub type SharedGraph<G> = Rc<RefCell<G>>;

/// Gain constants for voices. The natural decay must be much longer than
/// the damped release.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Initial gain of a struck note.
    pub attack_gain: f64,
    /// Initial gain while "soften" is on.
    pub soft_attack_gain: f64,
    /// Gain the decay and release ramps settle at.
    pub decay_floor: f64,
    /// Natural decay length in seconds.
    pub decay_seconds: f64,
    /// Damped release length in seconds.
    pub release_seconds: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        VoiceSettings {
            attack_gain: 1.0,
            soft_attack_gain: 0.5,
            decay_floor: 0.01,
            decay_seconds: 10.0,
            release_seconds: 0.5,
        }
    }
}

/// Runtime handle for the voice most recently started at a pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceHandle {
    pub pitch: Pitch,
    pub id: VoiceId,
    /// Audio clock time the voice started.
    pub started_at: f64,
}

/// What the input controller needs from a voice engine.
pub trait NotePlayer {
    /// Start a voice for `pitch` using the bank's buffer for that pitch.
    fn trigger(&mut self, pitch: Pitch, bank: &SampleBank) -> Result<VoiceId, VoiceError>;

    /// Damp the tracked voice at `pitch`. Returns false if none was tracked.
    fn release(&mut self, pitch: Pitch) -> bool;

    /// Damp every tracked voice, returning how many were released.
    fn release_all(&mut self) -> usize;

    /// Use the soft attack gain for subsequent triggers.
    fn set_soften(&mut self, soften: bool);

    /// Drop handles for voices that have finished sounding.
    fn reap_finished(&mut self) -> usize {
        0
    }
}

pub struct VoiceEngine<G: AudioGraph> {
    graph: SharedGraph<G>,
    settings: VoiceSettings,
    soften: bool,
    voices: HashMap<Pitch, VoiceHandle>,
}

impl<G: AudioGraph> VoiceEngine<G> {
    pub fn new(graph: SharedGraph<G>, settings: VoiceSettings) -> Self {
        VoiceEngine {
            graph,
            settings,
            soften: false,
            voices: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn graph(&self) -> &SharedGraph<G> {
        &self.graph
    }

    /// The tracked handle at `pitch`, if any.
    pub fn handle(&self, pitch: Pitch) -> Option<&VoiceHandle> {
        self.voices.get(&pitch)
    }

    /// Number of tracked handles.
    pub fn tracked(&self) -> usize {
        self.voices.len()
    }

    fn attack_gain(&self) -> f64 {
        if self.soften {
            self.settings.soft_attack_gain
        } else {
            self.settings.attack_gain
        }
    }
}

impl<G: AudioGraph> NotePlayer for VoiceEngine<G> {
    fn trigger(&mut self, pitch: Pitch, bank: &SampleBank) -> Result<VoiceId, VoiceError> {
        let Some(buffer) = bank.get(pitch) else {
            warn!(%pitch, instrument = bank.instrument(), "No sample for pitch");
            return Err(VoiceError::MissingSample { pitch });
        };

        let attack = self.attack_gain();
        let mut graph = self.graph.borrow_mut();
        let now = graph.current_time();

        let mut gain = GainEnvelope::new(attack);
        gain.set_value_at_time(attack, now);
        gain.exponential_ramp_to_value_at_time(
            self.settings.decay_floor,
            now + self.settings.decay_seconds,
        );

        let id = graph.start_voice(buffer.clone(), gain);
        let previous = self.voices.insert(
            pitch,
            VoiceHandle {
                pitch,
                id,
                started_at: now,
            },
        );
        debug!(%pitch, voice = id.get(), superseded = ?previous.map(|h| h.id.get()), "Voice triggered");
        Ok(id)
    }

    fn release(&mut self, pitch: Pitch) -> bool {
        let Some(handle) = self.voices.remove(&pitch) else {
            return false;
        };

        let mut graph = self.graph.borrow_mut();
        let now = graph.current_time();
        // The voice may already have decayed out of the graph.
        if let Some(gain) = graph.gain_mut(handle.id) {
            gain.cancel_and_hold_at_time(now);
            gain.exponential_ramp_to_value_at_time(
                self.settings.decay_floor,
                now + self.settings.release_seconds,
            );
        }
        debug!(%pitch, voice = handle.id.get(), "Voice released");
        true
    }

    fn release_all(&mut self) -> usize {
        let pitches: Vec<Pitch> = self.voices.keys().copied().collect();
        pitches.into_iter().filter(|&p| self.release(p)).count()
    }

    fn set_soften(&mut self, soften: bool) {
        self.soften = soften;
    }

    fn reap_finished(&mut self) -> usize {
        let ended = self.graph.borrow_mut().take_ended();
        if ended.is_empty() {
            return 0;
        }
        let before = self.voices.len();
        self.voices.retain(|_, h| !ended.contains(&h.id));
        let reaped = before - self.voices.len();
        if reaped > 0 {
            debug!(reaped, "Finished voice handles evicted");
        }
        reaped
    }
}
