//! Key press tracker — which input keys are currently held.
//!
//! Suppresses OS key-repeat "down" events and stray "up" events. It has a
//! single owner (the input event stream) and does no locking.

use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct KeyPressTracker {
    held: HashSet<String>,
}

impl KeyPressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press. Returns true only if the key was not already held;
    /// on false the caller must not retrigger audio.
    pub fn on_press(&mut self, input_key_id: &str) -> bool {
        if self.held.contains(input_key_id) {
            return false;
        }
        self.held.insert(input_key_id.to_string())
    }

    /// Record a release. Returns true only if the key was held.
    pub fn on_release(&mut self, input_key_id: &str) -> bool {
        self.held.remove(input_key_id)
    }

    pub fn is_held(&self, input_key_id: &str) -> bool {
        self.held.contains(input_key_id)
    }

    pub fn held(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Forget every held key, returning what was held.
    pub fn clear(&mut self) -> Vec<String> {
        self.held.drain().collect()
    }
}
