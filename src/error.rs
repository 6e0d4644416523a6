use thiserror::Error;

/// Errors raised by the control plane: sound-bank construction, config
/// loading, snapshot (de)serialization and offline rendering.
///
/// The render and MIDI dispatch paths never produce these. Bad input there is
/// clamped, substituted or dropped and reported through `tracing`.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Unknown generator type {0}")]
    UnknownGenerator(i32),

    #[error("Zone references sample {index}, but the bank only has {available}")]
    SampleOutOfRange { index: usize, available: usize },

    #[error("Preset zone references instrument {index}, but the bank only has {available}")]
    InstrumentOutOfRange { index: usize, available: usize },

    #[error("Sample '{name}' has no audio data")]
    EmptySample { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, SynthError>;
