//! Key-state store — what the rendering layer observes.
//!
//! The input controller writes press state and octave bounds here; UI code
//! reads the current state or subscribes to change events. Nothing in the
//! core depends on whether anyone is listening.

use std::collections::BTreeSet;

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// A change to the observable key state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStateEvent {
    Pressed(String),
    Released(String),
    OctaveChanged { lowest: u8, highest: u8 },
    /// Every key was released at once (focus loss).
    Reset,
}

#[derive(Debug)]
pub struct KeyStateStore {
    pressed: BTreeSet<String>,
    octave_range: (u8, u8),
    events: broadcast::Sender<KeyStateEvent>,
}

impl KeyStateStore {
    pub fn new(octave_range: (u8, u8)) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        KeyStateStore {
            pressed: BTreeSet::new(),
            octave_range,
            events,
        }
    }

    /// Receive every change made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<KeyStateEvent> {
        self.events.subscribe()
    }

    pub fn is_pressed(&self, input_key_id: &str) -> bool {
        self.pressed.contains(input_key_id)
    }

    /// Pressed keys in sorted order.
    pub fn pressed_keys(&self) -> impl Iterator<Item = &str> {
        self.pressed.iter().map(String::as_str)
    }

    pub fn octave_range(&self) -> (u8, u8) {
        self.octave_range
    }

    pub(crate) fn mark_pressed(&mut self, input_key_id: &str) {
        if self.pressed.insert(input_key_id.to_string()) {
            self.emit(KeyStateEvent::Pressed(input_key_id.to_string()));
        }
    }

    pub(crate) fn mark_released(&mut self, input_key_id: &str) {
        if self.pressed.remove(input_key_id) {
            self.emit(KeyStateEvent::Released(input_key_id.to_string()));
        }
    }

    pub(crate) fn set_octave_range(&mut self, lowest: u8, highest: u8) {
        if self.octave_range != (lowest, highest) {
            self.octave_range = (lowest, highest);
            self.emit(KeyStateEvent::OctaveChanged { lowest, highest });
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pressed.clear();
        self.emit(KeyStateEvent::Reset);
    }

    fn emit(&self, event: KeyStateEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.events.send(event);
    }
}
