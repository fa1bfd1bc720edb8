//! Audio Engine — the shared output graph every voice plays through.
//!
//! The engine is constructed explicitly and handed to the voice engine; there
//! is no global audio context. Each voice owns an independent buffer source
//! and gain envelope. Rendering advances the audio clock, mixes the voices
//! into the main output and mirrors the same block into the capture sink so
//! a recording stays in sync with what is heard.

use std::sync::Arc;

use tracing::{debug, warn};

use super::envelope::GainEnvelope;
use super::sampler::{BufferSource, SampleBuffer};

/// Samples rendered per internal block.
const BLOCK_SIZE: usize = 128;

/// Identifies one voice in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

impl VoiceId {
    pub fn new(raw: u64) -> Self {
        VoiceId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Operations the voice engine needs from an audio graph.
///
/// Scheduling calls are fire-and-forget: they record automation against the
/// audio clock and return immediately.
pub trait AudioGraph {
    /// Current audio clock time in seconds.
    fn current_time(&self) -> f64;

    /// Start `buffer` now through a gain node driven by `gain`, connected to
    /// both the main output and the capture sink.
    fn start_voice(&mut self, buffer: Arc<SampleBuffer>, gain: GainEnvelope) -> VoiceId;

    /// The gain automation of a voice that has not ended yet.
    fn gain_mut(&mut self, id: VoiceId) -> Option<&mut GainEnvelope>;

    /// Voices that have ended since the last call.
    fn take_ended(&mut self) -> Vec<VoiceId>;
}

struct GraphVoice {
    id: VoiceId,
    source: BufferSource,
    gain: GainEnvelope,
}

/// Software audio graph rendering mono f32 blocks.
pub struct AudioEngine {
    pub sample_rate: f64,
    frames_rendered: u64,
    voices: Vec<GraphVoice>,
    next_id: u64,
    ended: Vec<VoiceId>,
    /// Applied to the summed block before tanh soft clipping.
    master_gain: f64,
    mix: Vec<f64>,
    max_voices: usize,
    /// Voices whose automation has finished at or below this gain are dropped.
    silence_floor: f64,
    capture: Option<Vec<f32>>,
}

impl AudioEngine {
    pub fn new(sample_rate: f64) -> Self {
        AudioEngine {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
            next_id: 1,
            ended: Vec::new(),
            master_gain: 0.8,
            mix: Vec::with_capacity(BLOCK_SIZE),
            max_voices: 128,
            silence_floor: 0.01,
            capture: None,
        }
    }

    pub fn with_silence_floor(mut self, floor: f64) -> Self {
        self.silence_floor = floor;
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices.max(1);
        self
    }

    pub fn set_master_gain(&mut self, gain: f64) {
        self.master_gain = gain;
    }

    /// Number of voices still sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Begin recording everything rendered from now on.
    pub fn start_capture(&mut self) {
        self.capture = Some(Vec::new());
    }

    /// Stop recording and return what was captured.
    pub fn take_capture(&mut self) -> Vec<f32> {
        self.capture.take().unwrap_or_default()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Render `frames` samples of the main output, advancing the clock.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut output = Vec::with_capacity(frames);
        let mut done = 0;
        while done < frames {
            let this_block = BLOCK_SIZE.min(frames - done);
            self.render_block(this_block, &mut output);
            done += this_block;
        }
        output
    }

    /// Render `seconds` of audio.
    pub fn render_seconds(&mut self, seconds: f64) -> Vec<f32> {
        let frames = (seconds * self.sample_rate).round().max(0.0) as usize;
        self.render(frames)
    }

    fn render_block(&mut self, frames: usize, output: &mut Vec<f32>) {
        self.mix.clear();
        self.mix.resize(frames, 0.0);
        let start = self.frames_rendered;

        for voice in self.voices.iter_mut() {
            for (i, slot) in self.mix.iter_mut().enumerate() {
                let Some(sample) = voice.source.next_sample() else {
                    break;
                };
                let t = (start + i as u64) as f64 / self.sample_rate;
                *slot += sample * voice.gain.value_at(t);
            }
        }

        let block_start = output.len();
        let master = self.master_gain;
        output.extend(self.mix.iter().map(|&s| (s * master).tanh() as f32));
        if let Some(capture) = self.capture.as_mut() {
            capture.extend_from_slice(&output[block_start..]);
        }

        self.frames_rendered += frames as u64;
        let now = self.current_time();
        let floor = self.silence_floor;
        let ended = &mut self.ended;
        self.voices.retain(|v| {
            let finished = v.source.is_finished() || v.gain.is_settled_below(now, floor);
            if finished {
                debug!(voice = v.id.0, "Voice ended");
                ended.push(v.id);
            }
            !finished
        });
    }
}

impl AudioGraph for AudioEngine {
    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate
    }

    fn start_voice(&mut self, buffer: Arc<SampleBuffer>, gain: GainEnvelope) -> VoiceId {
        if self.voices.len() >= self.max_voices {
            let oldest = self.voices.remove(0);
            warn!(
                max_voices = self.max_voices,
                voice = oldest.id.0,
                "Voice limit reached, dropping oldest"
            );
            self.ended.push(oldest.id);
        }

        let id = VoiceId(self.next_id);
        self.next_id += 1;
        self.voices.push(GraphVoice {
            id,
            source: BufferSource::new(buffer, self.sample_rate),
            gain,
        });
        id
    }

    fn gain_mut(&mut self, id: VoiceId) -> Option<&mut GainEnvelope> {
        self.voices
            .iter_mut()
            .find(|v| v.id == id)
            .map(|v| &mut v.gain)
    }

    fn take_ended(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.ended)
    }
}
