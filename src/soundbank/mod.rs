//! Sound-bank data model: generators, modulators, zones and samples.
//!
//! Everything here is immutable once a bank is handed to the processor.

pub mod bank;
pub mod generator;
pub mod modulator;
pub mod sample;
pub mod zone;

pub use bank::{PresetHandle, PresetId, PresetListEntry, SoundBank, SoundBankSource, VoiceSynthesisData};
pub use generator::{Generator, GeneratorArray, GeneratorType, GENERATORS_AMOUNT};
pub use modulator::{CurveType, Modulator, ModulatorSource, TransformType, DEFAULT_MODULATORS};
pub use sample::Sample;
pub use zone::{Instrument, KeyRange, Preset, Zone};
