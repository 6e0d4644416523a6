//! Zones, instruments and presets: the layered structure voices are built from.

use serde::{Deserialize, Serialize};

use super::generator::{Generator, GeneratorType};
use super::modulator::Modulator;
use crate::midi::MidiPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub low: u8,
    pub high: u8,
}

impl KeyRange {
    pub fn new(low: u8, high: u8) -> Self {
        KeyRange { low, high }
    }

    pub fn contains(&self, value: u8) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Key/velocity-scoped bundle of generators and modulators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_range: Option<KeyRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_range: Option<KeyRange>,
    #[serde(default)]
    pub generators: Vec<Generator>,
    #[serde(default)]
    pub modulators: Vec<Modulator>,
}

impl Zone {
    pub fn new() -> Self {
        Zone::default()
    }

    pub fn keys(mut self, low: u8, high: u8) -> Self {
        self.key_range = Some(KeyRange::new(low, high));
        self
    }

    pub fn velocities(mut self, low: u8, high: u8) -> Self {
        self.velocity_range = Some(KeyRange::new(low, high));
        self
    }

    pub fn with(mut self, generator_type: GeneratorType, value: i16) -> Self {
        self.generators.push(Generator::of(generator_type, value));
        self
    }

    pub fn with_modulator(mut self, modulator: Modulator) -> Self {
        self.modulators.push(modulator);
        self
    }

    /// Whether this zone (falling back to `global`'s ranges) covers the note.
    pub fn matches(&self, global: &Zone, note: u8, velocity: u8) -> bool {
        let keys = self.key_range.or(global.key_range);
        let vels = self.velocity_range.or(global.velocity_range);
        keys.is_none_or(|r| r.contains(note)) && vels.is_none_or(|r| r.contains(velocity))
    }

    /// Generators excluding the range types, which only scope the zone.
    pub(crate) fn value_generators(&self) -> impl Iterator<Item = &Generator> {
        self.generators.iter().filter(|g| !g.generator_type.is_range())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentZone {
    #[serde(flatten)]
    pub zone: Zone,
    /// Index into the bank's samples.
    pub sample: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub name: String,
    #[serde(default)]
    pub global_zone: Zone,
    pub zones: Vec<InstrumentZone>,
}

impl Instrument {
    pub fn new(name: impl Into<String>) -> Self {
        Instrument {
            name: name.into(),
            global_zone: Zone::default(),
            zones: Vec::new(),
        }
    }

    pub fn zone(mut self, zone: Zone, sample: usize) -> Self {
        self.zones.push(InstrumentZone { zone, sample });
        self
    }

    pub fn global(mut self, zone: Zone) -> Self {
        self.global_zone = zone;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetZone {
    #[serde(flatten)]
    pub zone: Zone,
    /// Index into the bank's instruments.
    pub instrument: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    #[serde(flatten)]
    pub patch: MidiPatch,
    #[serde(default)]
    pub global_zone: Zone,
    pub zones: Vec<PresetZone>,
}

impl Preset {
    pub fn new(name: impl Into<String>, patch: MidiPatch) -> Self {
        Preset {
            name: name.into(),
            patch,
            global_zone: Zone::default(),
            zones: Vec::new(),
        }
    }

    pub fn zone(mut self, zone: Zone, instrument: usize) -> Self {
        self.zones.push(PresetZone { zone, instrument });
        self
    }

    pub fn global(mut self, zone: Zone) -> Self {
        self.global_zone = zone;
        self
    }

    /// GM/GS drum kit or an XG drum bank.
    pub fn is_any_drums(&self) -> bool {
        self.patch.is_gm_gs_drum || matches!(self.patch.bank_msb, 120 | 126 | 127)
    }
}
