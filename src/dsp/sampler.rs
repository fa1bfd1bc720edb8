//! Sample playback — decoded buffers and the cursor that reads them.
//!
//! A buffer keeps its native sample rate; the playback cursor converts to
//! the engine rate with linear interpolation.

use std::sync::Arc;

/// A decoded, mono sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Mono f64 samples.
    pub data: Vec<f64>,
    /// Native sample rate of the audio.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f64>, sample_rate: u32) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Create from interleaved 16-bit PCM, averaging channels down to mono.
    pub fn from_interleaved_i16(pcm: &[i16], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let data = pcm
            .chunks(channels)
            .map(|frame| frame.iter().map(|&s| s as f64 / 32768.0).sum::<f64>() / frame.len() as f64)
            .collect();
        SampleBuffer { data, sample_rate }
    }

    /// Create from interleaved f32 samples, averaging channels down to mono.
    pub fn from_interleaved_f32(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let data = samples
            .chunks(channels)
            .map(|frame| frame.iter().map(|&s| s as f64).sum::<f64>() / frame.len() as f64)
            .collect();
        SampleBuffer { data, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length in seconds at the native rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.sample_rate as f64
    }

    /// Read a sample with linear interpolation at a fractional position.
    pub fn read_interpolated(&self, position: f64) -> f64 {
        if self.data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= self.data.len() - 1 {
            return if idx < self.data.len() {
                self.data[idx]
            } else {
                0.0
            };
        }

        let frac = position - idx as f64;
        self.data[idx] * (1.0 - frac) + self.data[idx + 1] * frac
    }
}

/// Plays one buffer once from the start, at the engine's sample rate.
#[derive(Debug, Clone)]
pub struct BufferSource {
    buffer: Arc<SampleBuffer>,
    /// Current read position in the buffer (fractional).
    position: f64,
    /// Buffer samples advanced per engine sample.
    step: f64,
}

impl BufferSource {
    pub fn new(buffer: Arc<SampleBuffer>, engine_sample_rate: f64) -> Self {
        let step = if engine_sample_rate > 0.0 {
            buffer.sample_rate as f64 / engine_sample_rate
        } else {
            1.0
        };
        BufferSource {
            buffer,
            position: 0.0,
            step,
        }
    }

    /// Next sample, or `None` once the buffer is exhausted.
    pub fn next_sample(&mut self) -> Option<f64> {
        if self.is_finished() {
            return None;
        }
        let sample = self.buffer.read_interpolated(self.position);
        self.position += self.step;
        Some(sample)
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.buffer.len() as f64
    }
}
