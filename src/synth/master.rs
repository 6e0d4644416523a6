//! Synth-wide parameters and MIDI Tuning Standard tables.

use serde::{Deserialize, Serialize};

use crate::dsp::sampler::InterpolationType;
use crate::dsp::voice::KeyTuning;
use crate::midi::SynthSystem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterParameters {
    pub master_gain: f32,
    /// -1 (left) to 1 (right).
    pub master_pan: f32,
    pub voice_cap: usize,
    pub interpolation_type: InterpolationType,
    pub midi_system: SynthSystem,
    pub monophonic_retrigger_mode: bool,
    pub reverb_gain: f32,
    pub chorus_gain: f32,
    #[serde(rename = "blackMIDIMode")]
    pub black_midi_mode: bool,
    /// Semitones, added to every melodic channel.
    pub transposition: f32,
    /// Sysex device ID filter; -1 accepts every ID.
    #[serde(rename = "deviceID")]
    pub device_id: i32,
}

impl Default for MasterParameters {
    fn default() -> Self {
        MasterParameters {
            master_gain: 1.0,
            master_pan: 0.0,
            voice_cap: 350,
            interpolation_type: InterpolationType::Hermite,
            midi_system: SynthSystem::Gs,
            monophonic_retrigger_mode: false,
            reverb_gain: 1.0,
            chorus_gain: 1.0,
            black_midi_mode: false,
            transposition: 0.0,
            device_id: -1,
        }
    }
}

/// One master parameter and its new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parameter", content = "value", rename_all = "camelCase")]
pub enum MasterParameter {
    MasterGain(f32),
    MasterPan(f32),
    VoiceCap(usize),
    InterpolationType(InterpolationType),
    MidiSystem(SynthSystem),
    MonophonicRetriggerMode(bool),
    ReverbGain(f32),
    ChorusGain(f32),
    #[serde(rename = "blackMIDIMode")]
    BlackMidiMode(bool),
    Transposition(f32),
    #[serde(rename = "deviceID")]
    DeviceId(i32),
}

impl MasterParameters {
    pub fn apply(&mut self, change: MasterParameter) {
        match change {
            MasterParameter::MasterGain(v) => self.master_gain = v.max(0.0),
            MasterParameter::MasterPan(v) => self.master_pan = v.clamp(-1.0, 1.0),
            MasterParameter::VoiceCap(v) => self.voice_cap = v,
            MasterParameter::InterpolationType(v) => self.interpolation_type = v,
            MasterParameter::MidiSystem(v) => self.midi_system = v,
            MasterParameter::MonophonicRetriggerMode(v) => self.monophonic_retrigger_mode = v,
            MasterParameter::ReverbGain(v) => self.reverb_gain = v,
            MasterParameter::ChorusGain(v) => self.chorus_gain = v,
            MasterParameter::BlackMidiMode(v) => self.black_midi_mode = v,
            MasterParameter::Transposition(v) => self.transposition = v,
            MasterParameter::DeviceId(v) => self.device_id = v,
        }
    }

    /// Left and right scaling for the master pan. Unity in the centre.
    pub fn pan_gains(&self) -> (f32, f32) {
        let pan = self.master_pan.clamp(-1.0, 1.0);
        ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
    }
}

/// Per-program key tunings set through MIDI Tuning Standard sysex.
#[derive(Debug, Clone, Default)]
pub struct TuningTables {
    programs: Vec<Option<Box<[KeyTuning; 128]>>>,
}

impl TuningTables {
    pub fn new() -> Self {
        TuningTables {
            programs: vec![None; 128],
        }
    }

    pub fn get(&self, program: u8) -> Option<&[KeyTuning; 128]> {
        self.programs.get(program as usize)?.as_deref()
    }

    pub fn set(&mut self, program: u8, key: u8, tuning: KeyTuning) {
        if self.programs.len() < 128 {
            self.programs.resize(128, None);
        }
        let Some(slot) = self.programs.get_mut(program as usize & 127) else {
            return;
        };
        let table = slot.get_or_insert_with(|| Box::new([KeyTuning::default(); 128]));
        table[key as usize & 127] = tuning;
    }

    pub fn clear(&mut self) {
        self.programs.iter_mut().for_each(|p| *p = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_json_names() {
        let m = MasterParameters::default();
        assert_eq!(m.voice_cap, 350);
        assert_eq!(m.device_id, -1);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["blackMIDIMode"], false);
        assert_eq!(json["deviceID"], -1);
        assert_eq!(json["interpolationType"], "hermite");
        assert_eq!(json["midiSystem"], "gs");

        let partial: MasterParameters = serde_json::from_str(r#"{"voiceCap": 16}"#).unwrap();
        assert_eq!(partial.voice_cap, 16);
        assert_eq!(partial.master_gain, 1.0);
    }

    #[test]
    fn apply_changes() {
        let mut m = MasterParameters::default();
        m.apply(MasterParameter::MasterPan(3.0));
        assert_eq!(m.master_pan, 1.0);
        assert_eq!(m.pan_gains(), (0.0, 1.0));
        m.apply(MasterParameter::MidiSystem(SynthSystem::Xg));
        assert_eq!(m.midi_system, SynthSystem::Xg);

        let json = serde_json::to_string(&MasterParameter::VoiceCap(8)).unwrap();
        assert_eq!(json, r#"{"parameter":"voiceCap","value":8}"#);
    }

    #[test]
    fn tuning_tables() {
        let mut t = TuningTables::new();
        assert!(t.get(0).is_none());
        t.set(0, 60, KeyTuning { midi_note: Some(61), cents: 12.5 });
        let table = t.get(0).unwrap();
        assert_eq!(table[60].midi_note, Some(61));
        assert_eq!(table[59], KeyTuning::default());
        t.clear();
        assert!(t.get(0).is_none());
    }
}
