//! DSP — per-voice synthesis in pure Rust.
//!
//! Everything below runs inside the render quantum: sample playback,
//! envelopes, the resonant lowpass and the voice that ties them together.
//! The same code serves real-time rendering (via the WASM wrapper) and the
//! offline WAV bounce.

pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod mixer;
pub mod renderer;
pub mod sampler;
pub mod units;
pub mod voice;
