//! In-memory sound bank and the lookup trait the synthesizer consumes.
//!
//! Banks are arenas: presets point at instruments and instrument zones at
//! samples by index. Samples are `Arc`-shared so voices keep their PCM
//! alive across a bank swap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::generator::Generator;
use super::modulator::{merge_modulators, Modulator, DEFAULT_MODULATORS};
use super::sample::Sample;
use super::zone::{Instrument, Preset};
use crate::error::{Result, SynthError};
use crate::midi::{MidiPatch, MidiPatchNamed, SynthSystem};

/// Index of a preset within its bank.
pub type PresetId = usize;

/// A resolved preset, as stored on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetHandle {
    pub id: PresetId,
    pub patch: MidiPatch,
    pub name: String,
    pub is_any_drums: bool,
}

impl PresetHandle {
    pub fn named_patch(&self) -> MidiPatchNamed {
        MidiPatchNamed {
            patch: self.patch,
            name: self.name.clone(),
        }
    }
}

/// Everything needed to assemble one voice for a note.
#[derive(Debug, Clone)]
pub struct VoiceSynthesisData {
    /// Instrument global then local generators.
    pub instrument_generators: Vec<Generator>,
    /// Preset global then local generators.
    pub preset_generators: Vec<Generator>,
    pub modulators: Vec<Modulator>,
    pub sample: Arc<Sample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetListEntry {
    #[serde(flatten)]
    pub patch: MidiPatchNamed,
    pub is_any_drums: bool,
}

/// The sound-bank collaborator. Implementations must be immutable once
/// shared with a processor.
pub trait SoundBankSource: Send + Sync {
    fn lookup_preset(&self, patch: &MidiPatch, system: SynthSystem) -> Option<PresetHandle>;

    fn synthesis_data(&self, preset: PresetId, note: u8, velocity: u8) -> Vec<VoiceSynthesisData>;

    fn preset_list(&self) -> Vec<PresetListEntry>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundBank {
    #[serde(default)]
    pub name: String,
    pub samples: Vec<Arc<Sample>>,
    pub instruments: Vec<Instrument>,
    pub presets: Vec<Preset>,
    /// Replaces the built-in default modulators when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_modulators: Option<Vec<Modulator>>,
}

impl SoundBank {
    pub fn new(name: impl Into<String>) -> Self {
        SoundBank {
            name: name.into(),
            ..SoundBank::default()
        }
    }

    /// Parse and validate a JSON bank descriptor.
    pub fn from_json(json: &str) -> Result<Self> {
        let bank: SoundBank = serde_json::from_str(json)?;
        bank.validate()?;
        debug!(
            name = %bank.name,
            presets = bank.presets.len(),
            samples = bank.samples.len(),
            "Loaded sound bank"
        );
        Ok(bank)
    }

    pub fn add_sample(&mut self, sample: Sample) -> usize {
        self.samples.push(Arc::new(sample));
        self.samples.len() - 1
    }

    pub fn add_instrument(&mut self, instrument: Instrument) -> usize {
        self.instruments.push(instrument);
        self.instruments.len() - 1
    }

    pub fn add_preset(&mut self, preset: Preset) -> PresetId {
        self.presets.push(preset);
        self.presets.len() - 1
    }

    /// Check every cross-reference in the arena.
    pub fn validate(&self) -> Result<()> {
        for sample in &self.samples {
            if sample.is_empty() {
                return Err(SynthError::EmptySample {
                    name: sample.name.clone(),
                });
            }
        }
        for instrument in &self.instruments {
            for zone in &instrument.zones {
                if zone.sample >= self.samples.len() {
                    return Err(SynthError::SampleOutOfRange {
                        index: zone.sample,
                        available: self.samples.len(),
                    });
                }
            }
        }
        for preset in &self.presets {
            for zone in &preset.zones {
                if zone.instrument >= self.instruments.len() {
                    return Err(SynthError::InstrumentOutOfRange {
                        index: zone.instrument,
                        available: self.instruments.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn handle(&self, id: PresetId) -> PresetHandle {
        let preset = &self.presets[id];
        PresetHandle {
            id,
            patch: preset.patch,
            name: preset.name.clone(),
            is_any_drums: preset.is_any_drums(),
        }
    }

    /// Resolve a patch, falling back the way GM/GS/XG hardware does when
    /// there is no exact match.
    pub fn select_preset(&self, patch: &MidiPatch, system: SynthSystem) -> Option<PresetId> {
        if self.presets.is_empty() {
            return None;
        }
        let find = |pred: &dyn Fn(&Preset) -> bool| self.presets.iter().position(pred);
        let wants_drums = patch.is_gm_gs_drum || system.is_xg_drum_bank(patch.bank_msb);

        if wants_drums {
            return find(&|p| p.is_any_drums() && p.patch.program == patch.program)
                .or_else(|| find(&|p| p.is_any_drums()))
                .or(Some(0));
        }

        find(&|p| p.patch == *patch)
            .or_else(|| match system {
                // GS variations live in the MSB, XG variations in the LSB.
                SynthSystem::Gs | SynthSystem::Gm => find(&|p| {
                    !p.is_any_drums()
                        && p.patch.program == patch.program
                        && p.patch.bank_msb == patch.bank_msb
                }),
                SynthSystem::Xg => find(&|p| {
                    !p.is_any_drums()
                        && p.patch.program == patch.program
                        && p.patch.bank_lsb == patch.bank_lsb
                }),
                SynthSystem::Gm2 => None,
            })
            .or_else(|| {
                find(&|p| {
                    !p.is_any_drums()
                        && p.patch.program == patch.program
                        && p.patch.bank_msb == 0
                        && p.patch.bank_lsb == 0
                })
            })
            .or_else(|| find(&|p| !p.is_any_drums() && p.patch.program == patch.program))
            .or_else(|| find(&|p| !p.is_any_drums()))
            .or(Some(0))
    }
}

impl SoundBankSource for SoundBank {
    fn lookup_preset(&self, patch: &MidiPatch, system: SynthSystem) -> Option<PresetHandle> {
        self.select_preset(patch, system).map(|id| self.handle(id))
    }

    fn synthesis_data(&self, preset: PresetId, note: u8, velocity: u8) -> Vec<VoiceSynthesisData> {
        let Some(preset) = self.presets.get(preset) else {
            return Vec::new();
        };
        let defaults = self.default_modulators.as_deref().unwrap_or(&DEFAULT_MODULATORS);
        let mut out = Vec::new();
        for preset_zone in &preset.zones {
            if !preset_zone.zone.matches(&preset.global_zone, note, velocity) {
                continue;
            }
            let Some(instrument) = self.instruments.get(preset_zone.instrument) else {
                continue;
            };
            let preset_generators: Vec<Generator> = preset
                .global_zone
                .value_generators()
                .chain(preset_zone.zone.value_generators())
                .copied()
                .collect();
            for inst_zone in &instrument.zones {
                if !inst_zone.zone.matches(&instrument.global_zone, note, velocity) {
                    continue;
                }
                let Some(sample) = self.samples.get(inst_zone.sample) else {
                    continue;
                };
                out.push(VoiceSynthesisData {
                    instrument_generators: instrument
                        .global_zone
                        .value_generators()
                        .chain(inst_zone.zone.value_generators())
                        .copied()
                        .collect(),
                    preset_generators: preset_generators.clone(),
                    modulators: merge_modulators(
                        &instrument.global_zone.modulators,
                        &inst_zone.zone.modulators,
                        defaults,
                        &preset.global_zone.modulators,
                        &preset_zone.zone.modulators,
                    ),
                    sample: Arc::clone(sample),
                });
            }
        }
        out
    }

    fn preset_list(&self) -> Vec<PresetListEntry> {
        self.presets
            .iter()
            .map(|p| PresetListEntry {
                patch: MidiPatchNamed {
                    patch: p.patch,
                    name: p.name.clone(),
                },
                is_any_drums: p.is_any_drums(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundbank::generator::GeneratorType as G;
    use crate::soundbank::zone::Zone;

    fn bank() -> SoundBank {
        let mut bank = SoundBank::new("test");
        let s = bank.add_sample(Sample::new("dc", vec![0.5; 64], 44100, 60));
        let low = bank.add_instrument(
            Instrument::new("split")
                .global(Zone::new().with(G::Pan, 100))
                .zone(Zone::new().keys(0, 59).with(G::CoarseTune, 1), s)
                .zone(Zone::new().keys(60, 127), s),
        );
        bank.add_preset(Preset::new("Piano", MidiPatch::melodic(0)).zone(Zone::new(), low));
        bank.add_preset(
            Preset::new("Bright", MidiPatch::new(1, 8, 0, false))
                .zone(Zone::new().with(G::Pan, -50), low),
        );
        bank.add_preset(Preset::new("Standard", MidiPatch::drums(0)).zone(Zone::new(), low));
        bank
    }

    #[test]
    fn exact_and_fallback_lookup() {
        let b = bank();
        let id = |p: MidiPatch, s| b.select_preset(&p, s).unwrap();
        assert_eq!(id(MidiPatch::new(1, 8, 0, false), SynthSystem::Gs), 1);
        // GS ignores the LSB when the MSB matches.
        assert_eq!(id(MidiPatch::new(1, 8, 3, false), SynthSystem::Gs), 1);
        // Unknown variation falls back to the program in any bank.
        assert_eq!(id(MidiPatch::new(1, 9, 0, false), SynthSystem::Gs), 1);
        // Unknown program falls back to the first melodic preset.
        assert_eq!(id(MidiPatch::melodic(40), SynthSystem::Gs), 0);
        assert_eq!(id(MidiPatch::drums(25), SynthSystem::Gs), 2);
        assert_eq!(id(MidiPatch::new(0, 127, 0, false), SynthSystem::Xg), 2);
    }

    #[test]
    fn empty_bank_has_no_presets() {
        assert!(SoundBank::new("x").lookup_preset(&MidiPatch::melodic(0), SynthSystem::Gs).is_none());
    }

    #[test]
    fn synthesis_data_respects_ranges_and_layers() {
        let b = bank();
        let low = b.synthesis_data(1, 40, 100);
        assert_eq!(low.len(), 1);
        let inst = &low[0].instrument_generators;
        assert!(inst.contains(&Generator::of(G::Pan, 100)));
        assert!(inst.contains(&Generator::of(G::CoarseTune, 1)));
        assert_eq!(low[0].preset_generators, vec![Generator::of(G::Pan, -50)]);
        assert_eq!(low[0].modulators.len(), DEFAULT_MODULATORS.len());

        let high = b.synthesis_data(1, 72, 100);
        assert_eq!(high.len(), 1);
        assert!(!high[0].instrument_generators.contains(&Generator::of(G::CoarseTune, 1)));
        assert!(b.synthesis_data(99, 60, 100).is_empty());
    }

    #[test]
    fn validation_rejects_dangling_indices() {
        let mut b = bank();
        b.add_preset(Preset::new("broken", MidiPatch::melodic(5)).zone(Zone::new(), 7));
        assert!(matches!(
            b.validate(),
            Err(SynthError::InstrumentOutOfRange { index: 7, .. })
        ));
    }

    #[test]
    fn json_round_trip_validates() {
        let json = serde_json::to_string(&bank()).unwrap();
        let back = SoundBank::from_json(&json).unwrap();
        assert_eq!(back.presets.len(), 3);
        assert_eq!(back.preset_list()[2].patch.name, "Standard");
        assert!(back.preset_list()[2].is_any_drums);

        let broken = json.replace("\"sample\":0", "\"sample\":4");
        assert!(matches!(
            SoundBank::from_json(&broken),
            Err(SynthError::SampleOutOfRange { index: 4, .. })
        ));
    }
}
