use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Mono PCM sample with its tuning and loop metadata.
///
/// Audio data sits behind an `Arc` so sounding voices keep it alive even if
/// the bank that owned it is swapped out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub name: String,
    pub sample_rate: u32,
    /// MIDI key at which the sample plays at its recorded pitch.
    pub original_key: u8,
    /// Pitch correction in cents.
    #[serde(default)]
    pub pitch_correction: i8,
    #[serde(default)]
    pub loop_start: usize,
    #[serde(default)]
    pub loop_end: usize,
    pub data: Arc<[f32]>,
}

impl Sample {
    pub fn new(name: impl Into<String>, data: Vec<f32>, sample_rate: u32, original_key: u8) -> Self {
        let len = data.len();
        Sample {
            name: name.into(),
            sample_rate,
            original_key,
            pitch_correction: 0,
            loop_start: 0,
            loop_end: len,
            data: data.into(),
        }
    }

    /// Create from 16-bit PCM.
    pub fn from_i16(name: impl Into<String>, pcm: &[i16], sample_rate: u32, original_key: u8) -> Self {
        let data = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        Sample::new(name, data, sample_rate, original_key)
    }

    pub fn with_loop(mut self, start: usize, end: usize) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_i16_normalizes() {
        let s = Sample::from_i16("t", &[0, 16384, -32768], 44100, 60);
        assert_eq!(s.len(), 3);
        assert!((s.data[1] - 0.5).abs() < 1e-6);
        assert!((s.data[2] + 1.0).abs() < 1e-6);
        assert_eq!(s.loop_end, 3);
    }

    #[test]
    fn json_round_trip() {
        let s = Sample::new("sine", vec![0.0, 0.5, -0.5], 22050, 69).with_loop(1, 3);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"originalKey\":69"));
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
