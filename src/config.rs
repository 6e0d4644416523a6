//! Engine construction options.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::synth::master::MasterParameters;
use crate::synth::voices::StealPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthConfig {
    pub sample_rate: f32,
    /// Channels created up front; more are added on demand.
    pub channel_count: usize,
    pub enable_event_system: bool,
    /// Fill the reverb and chorus send buses.
    pub enable_effects: bool,
    /// Processor clock at construction, in seconds.
    pub initial_time: f64,
    pub min_note_length: f64,
    pub steal_policy: StealPolicy,
    pub master_parameters: MasterParameters,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: 44100.0,
            channel_count: 16,
            enable_event_system: true,
            enable_effects: true,
            initial_time: 0.0,
            min_note_length: 0.03,
            steal_policy: StealPolicy::default(),
            master_parameters: MasterParameters::default(),
        }
    }
}

impl SynthConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::SynthError;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SynthConfig::from_json(
            r#"{"sampleRate": 48000, "stealPolicy": "weighted", "masterParameters": {"voiceCap": 64}}"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.steal_policy, StealPolicy::Weighted);
        assert_eq!(config.master_parameters.voice_cap, 64);
        assert_eq!(config.master_parameters.master_gain, 1.0);
        assert_eq!(config.channel_count, 16);
        assert_eq!(config.min_note_length, 0.03);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"channelCount": 32, "enableEffects": false}}"#).unwrap();
        let config = SynthConfig::from_file(file.path()).unwrap();
        assert_eq!(config.channel_count, 32);
        assert!(!config.enable_effects);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SynthConfig::from_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SynthError::Io(_)));
    }
}
