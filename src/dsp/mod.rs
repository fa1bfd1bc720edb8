//! DSP — the audio graph voices are played through.
//!
//! Everything here is pure Rust and deterministic: the same engine drives a
//! realtime output callback and offline rendering of a recorded take.

pub mod engine;
pub mod envelope;
pub mod renderer;
pub mod sampler;
