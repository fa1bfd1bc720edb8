//! Input controller — turns keyboard and pointer events into notes.
//!
//! Each input key is either up or down. A down event on a mapped key that is
//! up triggers its pitch; an up event on a key that is down releases it
//! (unless sustain is on, in which case the voice decays on its own). Repeats
//! and strays are absorbed by the press tracker. Pointer over/out events are
//! treated as releases so a key dragged off while the button is held does not
//! stick.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{PianoError, VoiceError};
use crate::keymap::{KeyMap, Pitch};
use crate::sample_bank::SampleBank;
use crate::store::KeyStateStore;
use crate::tracker::KeyPressTracker;
use crate::voice::NotePlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Keyboard,
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Down,
    Up,
    /// Pointer entered a key while dragging.
    Over,
    /// Pointer left a key while dragging.
    Out,
}

/// A normalized input event, built once at the platform boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    /// Device the event came from. Keyboard and pointer share one key state,
    /// so this only tags log records.
    pub kind: InputKind,
    pub action: InputAction,
    pub key_id: String,
}

impl InputEvent {
    pub fn new(kind: InputKind, action: InputAction, key_id: &str) -> Self {
        InputEvent {
            kind,
            action,
            key_id: key_id.to_lowercase(),
        }
    }

    pub fn key_down(key_id: &str) -> Self {
        Self::new(InputKind::Keyboard, InputAction::Down, key_id)
    }

    pub fn key_up(key_id: &str) -> Self {
        Self::new(InputKind::Keyboard, InputAction::Up, key_id)
    }

    pub fn pointer_down(key_id: &str) -> Self {
        Self::new(InputKind::Pointer, InputAction::Down, key_id)
    }

    pub fn pointer_up(key_id: &str) -> Self {
        Self::new(InputKind::Pointer, InputAction::Up, key_id)
    }

    pub fn pointer_over(key_id: &str) -> Self {
        Self::new(InputKind::Pointer, InputAction::Over, key_id)
    }

    pub fn pointer_out(key_id: &str) -> Self {
        Self::new(InputKind::Pointer, InputAction::Out, key_id)
    }

    fn is_release(&self) -> bool {
        !matches!(self.action, InputAction::Down)
    }
}

/// What an event did to the key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Pressed(Pitch),
    Released(Pitch),
    /// Repeat, stray release or unmapped key.
    Ignored,
}

pub struct InputController<P: NotePlayer> {
    keymap: KeyMap,
    tracker: KeyPressTracker,
    player: P,
    store: KeyStateStore,
    bank: Option<Arc<SampleBank>>,
    /// Pitch each held key sounded when pressed.
    held_pitches: HashMap<String, Pitch>,
    sustain: bool,
    soften: bool,
}

impl<P: NotePlayer> InputController<P> {
    pub fn new(keymap: KeyMap, player: P) -> Self {
        let store = KeyStateStore::new(keymap.octave_range());
        InputController {
            keymap,
            tracker: KeyPressTracker::new(),
            player,
            store,
            bank: None,
            held_pitches: HashMap::new(),
            sustain: false,
            soften: false,
        }
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    pub fn store(&self) -> &KeyStateStore {
        &self.store
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn sample_bank(&self) -> Option<&Arc<SampleBank>> {
        self.bank.as_ref()
    }

    pub fn sustain(&self) -> bool {
        self.sustain
    }

    pub fn soften(&self) -> bool {
        self.soften
    }

    /// Process one event in arrival order.
    ///
    /// A press on a key with no playable sample still marks the key down and
    /// returns the voice error; the matching release is handled normally.
    pub fn handle(&mut self, event: &InputEvent) -> Result<KeyTransition, PianoError> {
        if event.is_release() {
            Ok(self.release_key(event))
        } else {
            self.press_key(event)
        }
    }

    fn press_key(&mut self, event: &InputEvent) -> Result<KeyTransition, PianoError> {
        let key_id = event.key_id.as_str();
        let Some(pitch) = self.keymap.resolve(key_id).map(|k| k.pitch()) else {
            debug!(key = key_id, kind = ?event.kind, "Ignoring unmapped key");
            return Ok(KeyTransition::Ignored);
        };
        if !self.tracker.on_press(key_id) {
            debug!(key = key_id, kind = ?event.kind, "Suppressed repeat press");
            return Ok(KeyTransition::Ignored);
        }
        debug!(key = key_id, kind = ?event.kind, %pitch, "Key pressed");

        self.held_pitches.insert(key_id.to_string(), pitch);
        self.store.mark_pressed(key_id);

        let bank = self.bank.as_deref().ok_or(VoiceError::NoSampleBank)?;
        self.player.trigger(pitch, bank)?;
        Ok(KeyTransition::Pressed(pitch))
    }

    fn release_key(&mut self, event: &InputEvent) -> KeyTransition {
        let key_id = event.key_id.as_str();
        if !self.tracker.on_release(key_id) {
            debug!(key = key_id, kind = ?event.kind, action = ?event.action, "Ignoring release of idle key");
            return KeyTransition::Ignored;
        }
        self.store.mark_released(key_id);

        let pitch = match self.held_pitches.remove(key_id) {
            Some(pitch) => pitch,
            None => match self.keymap.resolve(key_id) {
                Some(k) => k.pitch(),
                None => return KeyTransition::Ignored,
            },
        };
        if !self.sustain {
            self.player.release(pitch);
        }
        KeyTransition::Released(pitch)
    }

    /// Released keys let their voices decay naturally while sustain is on.
    pub fn set_sustain(&mut self, sustain: bool) {
        self.sustain = sustain;
    }

    pub fn set_soften(&mut self, soften: bool) {
        self.soften = soften;
        self.player.set_soften(soften);
    }

    /// Replace the bank used for new triggers. Sounding voices keep their buffers.
    pub fn set_sample_bank(&mut self, bank: Arc<SampleBank>) {
        info!(instrument = bank.instrument(), samples = bank.len(), "Sample bank selected");
        self.bank = Some(bank);
    }

    pub fn clear_sample_bank(&mut self) {
        self.bank = None;
    }

    /// Move the keyboard up an octave. Returns false at the top of the range.
    pub fn shift_octave_up(&mut self) -> bool {
        if !self.keymap.can_shift_up() {
            return false;
        }
        self.keymap = self.keymap.shift_up();
        self.publish_octave_range();
        true
    }

    /// Move the keyboard down an octave. Returns false at the bottom of the range.
    pub fn shift_octave_down(&mut self) -> bool {
        if !self.keymap.can_shift_down() {
            return false;
        }
        self.keymap = self.keymap.shift_down();
        self.publish_octave_range();
        true
    }

    fn publish_octave_range(&mut self) {
        let (lowest, highest) = self.keymap.octave_range();
        debug!(lowest, highest, "Octave range changed");
        self.store.set_octave_range(lowest, highest);
    }

    /// Forget every held key and damp every voice. Use when the window loses
    /// focus and the matching up events may never arrive.
    pub fn focus_lost(&mut self) -> usize {
        let cleared = self.tracker.clear();
        self.held_pitches.clear();
        let released = self.player.release_all();
        self.store.reset();
        if !cleared.is_empty() || released > 0 {
            info!(keys = cleared.len(), voices = released, "Released held keys on focus loss");
        }
        cleared.len()
    }

    /// Drop voice handles whose sound has ended.
    pub fn reap_finished(&mut self) -> usize {
        self.player.reap_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::engine::{AudioEngine, VoiceId};
    use crate::dsp::sampler::SampleBuffer;
    use crate::keymap::Note;
    use crate::store::KeyStateEvent;
    use crate::voice::{VoiceEngine, VoiceSettings};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Trigger(Pitch),
        Release(Pitch),
        ReleaseAll,
        Soften(bool),
    }

    #[derive(Default)]
    struct RecordingPlayer {
        calls: Vec<Call>,
        sounding: Vec<Pitch>,
        next_id: u64,
    }

    impl RecordingPlayer {
        fn triggers(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, Call::Trigger(_))).count()
        }

        fn releases(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, Call::Release(_))).count()
        }
    }

    impl NotePlayer for RecordingPlayer {
        fn trigger(&mut self, pitch: Pitch, bank: &SampleBank) -> Result<VoiceId, VoiceError> {
            if bank.get(pitch).is_none() {
                return Err(VoiceError::MissingSample { pitch });
            }
            self.calls.push(Call::Trigger(pitch));
            self.sounding.push(pitch);
            self.next_id += 1;
            Ok(VoiceId::new(self.next_id))
        }

        fn release(&mut self, pitch: Pitch) -> bool {
            self.calls.push(Call::Release(pitch));
            let before = self.sounding.len();
            self.sounding.retain(|&p| p != pitch);
            before != self.sounding.len()
        }

        fn release_all(&mut self) -> usize {
            self.calls.push(Call::ReleaseAll);
            std::mem::take(&mut self.sounding).len()
        }

        fn set_soften(&mut self, soften: bool) {
            self.calls.push(Call::Soften(soften));
        }
    }

    fn pitch(note: Note, octave: u8) -> Pitch {
        Pitch::new(note, octave)
    }

    /// A bank with a buffer for every pitch from octave 1 to 7.
    fn full_bank() -> Arc<SampleBank> {
        let buffer = Arc::new(SampleBuffer::new(vec![0.25; 100], 1000));
        let buffers = (1..=7)
            .flat_map(|o| Note::ALL.iter().map(move |&n| Pitch::new(n, o)))
            .map(|p| (p, buffer.clone()))
            .collect();
        Arc::new(SampleBank::new("piano", buffers))
    }

    fn controller() -> InputController<RecordingPlayer> {
        let mut c = InputController::new(KeyMap::default(), RecordingPlayer::default());
        c.set_sample_bank(full_bank());
        c
    }

    #[test]
    fn press_then_release_without_sustain() {
        let mut c = controller();
        assert_eq!(c.handle(&InputEvent::key_down("q")).unwrap(), KeyTransition::Pressed(pitch(Note::C, 3)));
        assert_eq!(c.handle(&InputEvent::key_up("q")).unwrap(), KeyTransition::Released(pitch(Note::C, 3)));
        assert_eq!(
            c.player().calls,
            vec![Call::Trigger(pitch(Note::C, 3)), Call::Release(pitch(Note::C, 3))]
        );
    }

    #[test]
    fn sustain_skips_release() {
        let mut c = controller();
        c.set_sustain(true);
        c.handle(&InputEvent::key_down("q")).unwrap();
        let up = c.handle(&InputEvent::key_up("q")).unwrap();

        assert_eq!(up, KeyTransition::Released(pitch(Note::C, 3)), "Key state still goes up");
        assert_eq!(c.player().calls, vec![Call::Trigger(pitch(Note::C, 3))]);
        assert!(!c.store().is_pressed("q"));
    }

    #[test]
    fn key_repeat_triggers_once() {
        let mut c = controller();
        for _ in 0..5 {
            c.handle(&InputEvent::key_down("w")).unwrap();
        }
        assert_eq!(c.player().triggers(), 1);
    }

    #[test]
    fn stray_release_is_ignored() {
        let mut c = controller();
        assert_eq!(c.handle(&InputEvent::key_up("q")).unwrap(), KeyTransition::Ignored);
        assert_eq!(c.handle(&InputEvent::pointer_out("e")).unwrap(), KeyTransition::Ignored);
        assert_eq!(c.player().releases(), 0);
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        let mut c = controller();
        assert_eq!(c.handle(&InputEvent::key_down("h")).unwrap(), KeyTransition::Ignored);
        assert_eq!(c.handle(&InputEvent::key_up("h")).unwrap(), KeyTransition::Ignored);
        assert_eq!(c.handle(&InputEvent::key_down("Shift")).unwrap(), KeyTransition::Ignored);
        assert!(c.player().calls.is_empty());
        assert_eq!(c.store().pressed_keys().count(), 0);
    }

    #[test]
    fn uppercase_key_resolves() {
        let mut c = controller();
        c.handle(&InputEvent::key_down("Q")).unwrap();
        assert!(c.store().is_pressed("q"));
        c.handle(&InputEvent::key_up("q")).unwrap();
        assert_eq!(c.player().releases(), 1, "Case must not split one key into two");
    }

    #[test]
    fn constructors_tag_device_and_action() {
        let cases = [
            (InputEvent::key_down("Q"), InputKind::Keyboard, InputAction::Down),
            (InputEvent::key_up("Q"), InputKind::Keyboard, InputAction::Up),
            (InputEvent::pointer_down("Q"), InputKind::Pointer, InputAction::Down),
            (InputEvent::pointer_up("Q"), InputKind::Pointer, InputAction::Up),
            (InputEvent::pointer_over("Q"), InputKind::Pointer, InputAction::Over),
            (InputEvent::pointer_out("Q"), InputKind::Pointer, InputAction::Out),
        ];
        for (event, kind, action) in cases {
            assert_eq!(event.kind, kind);
            assert_eq!(event.action, action);
            assert_eq!(event.key_id, "q");
            assert_eq!(event.is_release(), action != InputAction::Down);
        }
    }

    #[test]
    fn pointer_out_releases_held_key() {
        let mut c = controller();
        c.handle(&InputEvent::pointer_down("i")).unwrap();
        c.handle(&InputEvent::pointer_out("i")).unwrap();
        assert_eq!(
            c.player().calls,
            vec![Call::Trigger(pitch(Note::C, 4)), Call::Release(pitch(Note::C, 4))]
        );
        assert_eq!(c.handle(&InputEvent::pointer_up("i")).unwrap(), KeyTransition::Ignored);
        assert_eq!(c.player().releases(), 1, "Button up after leaving must not release twice");
    }

    #[test]
    fn pointer_over_releases_held_key() {
        let mut c = controller();
        c.handle(&InputEvent::pointer_down("t")).unwrap();
        assert_eq!(
            c.handle(&InputEvent::pointer_over("t")).unwrap(),
            KeyTransition::Released(pitch(Note::G, 3))
        );
    }

    #[test]
    fn keyboard_and_pointer_share_key_state() {
        let mut c = controller();
        c.handle(&InputEvent::key_down("e")).unwrap();
        c.handle(&InputEvent::pointer_down("e")).unwrap();
        assert_eq!(c.player().triggers(), 1);
        c.handle(&InputEvent::pointer_up("e")).unwrap();
        assert_eq!(c.handle(&InputEvent::key_up("e")).unwrap(), KeyTransition::Ignored);
    }

    #[test]
    fn triggers_match_presses_from_up() {
        use InputEvent as E;
        let mut c = controller();
        let sequence = [
            E::key_down("y"),
            E::key_down("y"),
            E::key_up("y"),
            E::key_up("y"),
            E::key_down("y"),
            E::pointer_out("y"),
            E::key_up("y"),
            E::key_down("y"),
            E::key_down("y"),
            E::key_up("y"),
        ];
        let presses_from_up = sequence
            .iter()
            .map(|e| c.handle(e).unwrap())
            .filter(|t| matches!(t, KeyTransition::Pressed(_)))
            .count();

        assert_eq!(presses_from_up, 3);
        assert_eq!(c.player().triggers(), 3);
        assert_eq!(c.player().releases(), 3);
    }

    #[test]
    fn release_after_octave_shift_uses_press_pitch() {
        let mut c = controller();
        c.handle(&InputEvent::key_down("q")).unwrap();
        assert!(c.shift_octave_up());
        c.handle(&InputEvent::key_up("q")).unwrap();
        c.handle(&InputEvent::key_down("q")).unwrap();

        assert_eq!(
            c.player().calls,
            vec![
                Call::Trigger(pitch(Note::C, 3)),
                Call::Release(pitch(Note::C, 3)),
                Call::Trigger(pitch(Note::C, 4)),
            ]
        );
    }

    #[test]
    fn octave_shift_is_bounded() {
        let mut c = controller();
        let mut rx = c.store().subscribe();

        assert!(c.shift_octave_up());
        assert!(c.shift_octave_up());
        assert_eq!(c.keymap().octave_range(), (5, 7));
        assert!(!c.shift_octave_up(), "Highest octave is already 7");
        assert_eq!(c.store().octave_range(), (5, 7));

        assert_eq!(rx.try_recv().unwrap(), KeyStateEvent::OctaveChanged { lowest: 4, highest: 6 });
        assert_eq!(rx.try_recv().unwrap(), KeyStateEvent::OctaveChanged { lowest: 5, highest: 7 });
        assert!(rx.try_recv().is_err(), "Rejected shift must not publish");

        for _ in 0..4 {
            c.shift_octave_down();
        }
        assert_eq!(c.keymap().octave_range(), (1, 3));
        assert!(!c.shift_octave_down());
    }

    #[test]
    fn missing_bank_keeps_key_state() {
        let mut c = InputController::new(KeyMap::default(), RecordingPlayer::default());
        let err = c.handle(&InputEvent::key_down("q")).unwrap_err();
        assert!(matches!(err, PianoError::Voice(VoiceError::NoSampleBank)));
        assert!(c.store().is_pressed("q"));

        assert_eq!(c.handle(&InputEvent::key_up("q")).unwrap(), KeyTransition::Released(pitch(Note::C, 3)));
        assert!(!c.store().is_pressed("q"));
    }

    #[test]
    fn missing_sample_leaves_other_pitches_playable() {
        let mut c = InputController::new(KeyMap::default(), RecordingPlayer::default());
        let buffer = Arc::new(SampleBuffer::new(vec![0.25; 100], 1000));
        c.set_sample_bank(Arc::new(SampleBank::new(
            "sparse",
            [(pitch(Note::D, 3), buffer)].into_iter().collect(),
        )));

        let err = c.handle(&InputEvent::key_down("q")).unwrap_err();
        assert!(matches!(
            err,
            PianoError::Voice(VoiceError::MissingSample { pitch: p }) if p == pitch(Note::C, 3)
        ));
        assert_eq!(c.handle(&InputEvent::key_down("w")).unwrap(), KeyTransition::Pressed(pitch(Note::D, 3)));
    }

    #[test]
    fn focus_loss_resets_everything() {
        let mut c = controller();
        let mut rx = c.store().subscribe();
        c.handle(&InputEvent::key_down("q")).unwrap();
        c.handle(&InputEvent::key_down("w")).unwrap();

        assert_eq!(c.focus_lost(), 2);
        assert_eq!(c.store().pressed_keys().count(), 0);
        assert_eq!(c.player().calls.last(), Some(&Call::ReleaseAll));

        assert_eq!(c.handle(&InputEvent::key_up("q")).unwrap(), KeyTransition::Ignored);
        assert!(matches!(c.handle(&InputEvent::key_down("q")).unwrap(), KeyTransition::Pressed(_)));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&KeyStateEvent::Reset));
    }

    #[test]
    fn store_tracks_pressed_keys() {
        let mut c = controller();
        c.handle(&InputEvent::key_down("e")).unwrap();
        c.handle(&InputEvent::key_down("r")).unwrap();
        assert_eq!(c.store().pressed_keys().collect::<Vec<_>>(), vec!["e", "r"]);
        c.handle(&InputEvent::key_up("e")).unwrap();
        assert_eq!(c.store().pressed_keys().collect::<Vec<_>>(), vec!["r"]);
    }

    #[test]
    fn soften_reaches_player() {
        let mut c = controller();
        c.set_soften(true);
        assert!(c.soften());
        assert_eq!(c.player().calls, vec![Call::Soften(true)]);
    }

    #[test]
    fn drives_real_voice_engine() {
        let graph = Rc::new(RefCell::new(AudioEngine::new(1000.0)));
        let player = VoiceEngine::new(graph.clone(), VoiceSettings::default());
        let mut c = InputController::new(KeyMap::default(), player);
        c.set_sample_bank(full_bank());

        c.handle(&InputEvent::key_down("q")).unwrap();
        c.handle(&InputEvent::key_down("w")).unwrap();
        assert_eq!(graph.borrow().active_voices(), 2);
        assert_eq!(c.player().tracked(), 2);

        c.handle(&InputEvent::key_up("q")).unwrap();
        assert_eq!(c.player().tracked(), 1);

        graph.borrow_mut().render_seconds(0.2);
        assert_eq!(c.reap_finished(), 1, "The 0.1s buffer has run out");
        assert_eq!(c.player().tracked(), 0);
    }
}
