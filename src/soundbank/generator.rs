//! Generator types, their published limits, and zone summation.
//!
//! A generator is one numeric synthesis parameter. Voices carry a dense
//! array of every generator, indexed by [`GeneratorType`] as `usize`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// Number of generator slots (types 0..=62).
pub const GENERATORS_AMOUNT: usize = 63;

/// Dense per-voice generator storage.
pub type GeneratorArray = [i16; GENERATORS_AMOUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum GeneratorType {
    StartAddrsOffset = 0,
    EndAddrOffset = 1,
    StartloopAddrsOffset = 2,
    EndloopAddrsOffset = 3,
    StartAddrsCoarseOffset = 4,
    ModLfoToPitch = 5,
    VibLfoToPitch = 6,
    ModEnvToPitch = 7,
    InitialFilterFc = 8,
    InitialFilterQ = 9,
    ModLfoToFilterFc = 10,
    ModEnvToFilterFc = 11,
    EndAddrsCoarseOffset = 12,
    ModLfoToVolume = 13,
    Unused1 = 14,
    ChorusEffectsSend = 15,
    ReverbEffectsSend = 16,
    Pan = 17,
    Unused2 = 18,
    Unused3 = 19,
    Unused4 = 20,
    DelayModLfo = 21,
    FreqModLfo = 22,
    DelayVibLfo = 23,
    FreqVibLfo = 24,
    DelayModEnv = 25,
    AttackModEnv = 26,
    HoldModEnv = 27,
    DecayModEnv = 28,
    SustainModEnv = 29,
    ReleaseModEnv = 30,
    KeyNumToModEnvHold = 31,
    KeyNumToModEnvDecay = 32,
    DelayVolEnv = 33,
    AttackVolEnv = 34,
    HoldVolEnv = 35,
    DecayVolEnv = 36,
    SustainVolEnv = 37,
    ReleaseVolEnv = 38,
    KeyNumToVolEnvHold = 39,
    KeyNumToVolEnvDecay = 40,
    Instrument = 41,
    Reserved1 = 42,
    KeyRange = 43,
    VelRange = 44,
    StartloopAddrsCoarseOffset = 45,
    KeyNum = 46,
    Velocity = 47,
    InitialAttenuation = 48,
    Reserved2 = 49,
    EndloopAddrsCoarseOffset = 50,
    CoarseTune = 51,
    FineTune = 52,
    SampleId = 53,
    SampleModes = 54,
    Reserved3 = 55,
    ScaleTuning = 56,
    ExclusiveClass = 57,
    OverridingRootKey = 58,
    Unused5 = 59,
    EndOper = 60,
    VibLfoToVolume = 61,
    VibLfoToFilterFc = 62,
}

use GeneratorType as G;

const ALL_TYPES: [GeneratorType; GENERATORS_AMOUNT] = [
    G::StartAddrsOffset,
    G::EndAddrOffset,
    G::StartloopAddrsOffset,
    G::EndloopAddrsOffset,
    G::StartAddrsCoarseOffset,
    G::ModLfoToPitch,
    G::VibLfoToPitch,
    G::ModEnvToPitch,
    G::InitialFilterFc,
    G::InitialFilterQ,
    G::ModLfoToFilterFc,
    G::ModEnvToFilterFc,
    G::EndAddrsCoarseOffset,
    G::ModLfoToVolume,
    G::Unused1,
    G::ChorusEffectsSend,
    G::ReverbEffectsSend,
    G::Pan,
    G::Unused2,
    G::Unused3,
    G::Unused4,
    G::DelayModLfo,
    G::FreqModLfo,
    G::DelayVibLfo,
    G::FreqVibLfo,
    G::DelayModEnv,
    G::AttackModEnv,
    G::HoldModEnv,
    G::DecayModEnv,
    G::SustainModEnv,
    G::ReleaseModEnv,
    G::KeyNumToModEnvHold,
    G::KeyNumToModEnvDecay,
    G::DelayVolEnv,
    G::AttackVolEnv,
    G::HoldVolEnv,
    G::DecayVolEnv,
    G::SustainVolEnv,
    G::ReleaseVolEnv,
    G::KeyNumToVolEnvHold,
    G::KeyNumToVolEnvDecay,
    G::Instrument,
    G::Reserved1,
    G::KeyRange,
    G::VelRange,
    G::StartloopAddrsCoarseOffset,
    G::KeyNum,
    G::Velocity,
    G::InitialAttenuation,
    G::Reserved2,
    G::EndloopAddrsCoarseOffset,
    G::CoarseTune,
    G::FineTune,
    G::SampleId,
    G::SampleModes,
    G::Reserved3,
    G::ScaleTuning,
    G::ExclusiveClass,
    G::OverridingRootKey,
    G::Unused5,
    G::EndOper,
    G::VibLfoToVolume,
    G::VibLfoToFilterFc,
];

/// Published range, default and NRPN scale of one generator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorLimits {
    pub min: i32,
    pub max: i32,
    pub def: i32,
    /// Multiplier applied to SF2 NRPN data entry offsets.
    pub nrpn: i32,
}

const fn lim(min: i32, max: i32, def: i32, nrpn: i32) -> GeneratorLimits {
    GeneratorLimits { min, max, def, nrpn }
}

const OPEN: GeneratorLimits = lim(-32768, 32767, 0, 0);

/// Limits indexed by generator type.
pub const GENERATOR_LIMITS: [GeneratorLimits; GENERATORS_AMOUNT] = [
    lim(0, 32768, 0, 1),          // startAddrsOffset
    lim(-32768, 32768, 0, 1),     // endAddrOffset
    lim(-32768, 32768, 0, 1),     // startloopAddrsOffset
    lim(-32768, 32768, 0, 1),     // endloopAddrsOffset
    lim(0, 32768, 0, 1),          // startAddrsCoarseOffset
    lim(-12000, 12000, 0, 2),     // modLfoToPitch
    lim(-12000, 12000, 0, 2),     // vibLfoToPitch
    lim(-12000, 12000, 0, 2),     // modEnvToPitch
    lim(1500, 13500, 13500, 2),   // initialFilterFc
    lim(0, 960, 0, 1),            // initialFilterQ
    lim(-12000, 12000, 0, 2),     // modLfoToFilterFc
    lim(-12000, 12000, 0, 2),     // modEnvToFilterFc
    lim(-32768, 32768, 0, 1),     // endAddrsCoarseOffset
    lim(-960, 960, 0, 1),         // modLfoToVolume
    OPEN,                         // unused1
    lim(0, 1000, 0, 1),           // chorusEffectsSend
    lim(0, 1000, 0, 1),           // reverbEffectsSend
    lim(-500, 500, 0, 1),         // pan
    OPEN,                         // unused2
    OPEN,                         // unused3
    OPEN,                         // unused4
    lim(-12000, 5000, -12000, 2), // delayModLFO
    lim(-16000, 4500, 0, 4),      // freqModLFO
    lim(-12000, 5000, -12000, 2), // delayVibLFO
    lim(-16000, 4500, 0, 4),      // freqVibLFO
    lim(-32768, 5000, -32768, 2), // delayModEnv
    lim(-32768, 8000, -32768, 2), // attackModEnv
    lim(-12000, 5000, -12000, 2), // holdModEnv
    lim(-12000, 8000, -12000, 2), // decayModEnv
    lim(0, 1000, 0, 1),           // sustainModEnv
    lim(-12000, 8000, -12000, 2), // releaseModEnv
    lim(-1200, 1200, 0, 1),       // keyNumToModEnvHold
    lim(-1200, 1200, 0, 1),       // keyNumToModEnvDecay
    lim(-12000, 5000, -12000, 2), // delayVolEnv
    lim(-12000, 8000, -12000, 2), // attackVolEnv
    lim(-12000, 5000, -12000, 2), // holdVolEnv
    lim(-12000, 8000, -12000, 2), // decayVolEnv
    lim(0, 1440, 0, 1),           // sustainVolEnv
    lim(-12000, 8000, -12000, 2), // releaseVolEnv
    lim(-1200, 1200, 0, 1),       // keyNumToVolEnvHold
    lim(-1200, 1200, 0, 1),       // keyNumToVolEnvDecay
    OPEN,                         // instrument
    OPEN,                         // reserved1
    OPEN,                         // keyRange
    OPEN,                         // velRange
    lim(-32768, 32768, 0, 1),     // startloopAddrsCoarseOffset
    lim(-1, 127, -1, 1),          // keyNum
    lim(-1, 127, -1, 1),          // velocity
    lim(0, 1440, 0, 1),           // initialAttenuation
    OPEN,                         // reserved2
    lim(-32768, 32768, 0, 1),     // endloopAddrsCoarseOffset
    lim(-120, 120, 0, 1),         // coarseTune
    lim(-12700, 12700, 0, 1),     // fineTune
    OPEN,                         // sampleID
    lim(0, 3, 0, 0),              // sampleModes
    OPEN,                         // reserved3
    lim(0, 1200, 100, 1),         // scaleTuning
    lim(0, 99999, 0, 0),          // exclusiveClass
    lim(-1, 127, -1, 0),          // overridingRootKey
    OPEN,                         // unused5
    OPEN,                         // endOper
    lim(-960, 960, 0, 1),         // vibLfoToVolume
    lim(-12000, 12000, 0, 2),     // vibLfoToFilterFc
];

impl GeneratorType {
    /// Look up a generator type by its numeric index.
    pub fn from_index(index: i32) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| ALL_TYPES.get(i).copied())
            .ok_or(SynthError::UnknownGenerator(index))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn limits(self) -> GeneratorLimits {
        GENERATOR_LIMITS[self.index()]
    }

    /// Clamp a (possibly summed) value into this type's range, saturating to `i16`.
    pub fn clamp(self, value: i32) -> i16 {
        let l = self.limits();
        saturate_i16(value.clamp(l.min, l.max))
    }

    /// Range generators scope a zone and never enter the voice array.
    pub fn is_range(self) -> bool {
        matches!(self, G::KeyRange | G::VelRange)
    }

    /// Types that shape the volume envelope; changing any of them requires
    /// the envelope boundaries to be recalculated.
    pub fn affects_volume_envelope(self) -> bool {
        matches!(
            self,
            G::InitialAttenuation
                | G::DelayVolEnv
                | G::AttackVolEnv
                | G::HoldVolEnv
                | G::DecayVolEnv
                | G::SustainVolEnv
                | G::ReleaseVolEnv
                | G::KeyNumToVolEnvHold
                | G::KeyNumToVolEnvDecay
        )
    }

    pub fn all() -> &'static [GeneratorType; GENERATORS_AMOUNT] {
        &ALL_TYPES
    }
}

pub(crate) fn saturate_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// A single generator value within a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    #[serde(rename = "type")]
    pub generator_type: GeneratorType,
    pub value: i16,
}

impl Generator {
    /// Build a generator from a raw type index. Unknown indices are rejected;
    /// with `validate` the value is clamped into the type's limits.
    pub fn new(type_index: i32, value: i32, validate: bool) -> Result<Self> {
        let generator_type = GeneratorType::from_index(type_index)?;
        let value = if validate {
            generator_type.clamp(value)
        } else {
            saturate_i16(value)
        };
        Ok(Generator {
            generator_type,
            value,
        })
    }

    pub fn of(generator_type: GeneratorType, value: i16) -> Self {
        Generator {
            generator_type,
            value,
        }
    }
}

/// Array holding every type's default value.
pub fn default_generators() -> GeneratorArray {
    let mut out = [0i16; GENERATORS_AMOUNT];
    for ty in ALL_TYPES {
        out[ty.index()] = saturate_i16(ty.limits().def);
    }
    out
}

/// Sum the instrument layer (absolute, default when absent) and the preset
/// layer (relative, zero when absent) into the effective generator array.
/// Each slot is clamped after summation.
pub fn combine_generators(instrument: &[Generator], preset: &[Generator]) -> GeneratorArray {
    let mut out = [0i16; GENERATORS_AMOUNT];
    for ty in ALL_TYPES {
        if ty.is_range() {
            continue;
        }
        let instrument_value = instrument
            .iter()
            .rev()
            .find(|g| g.generator_type == ty)
            .map(|g| g.value as i32)
            .unwrap_or(ty.limits().def);
        let preset_value = preset
            .iter()
            .rev()
            .find(|g| g.generator_type == ty)
            .map(|g| g.value as i32)
            .unwrap_or(0);
        out[ty.index()] = ty.clamp(instrument_value + preset_value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trip() {
        for (i, ty) in ALL_TYPES.iter().enumerate() {
            assert_eq!(ty.index(), i);
            assert_eq!(GeneratorType::from_index(i as i32).unwrap(), *ty);
        }
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            Generator::new(63, 0, true),
            Err(SynthError::UnknownGenerator(63))
        ));
        assert!(Generator::new(-1, 0, true).is_err());
    }

    #[test]
    fn validation_clamps_only_when_requested() {
        let g = Generator::new(G::Pan as i32, 900, true).unwrap();
        assert_eq!(g.value, 500);
        let g = Generator::new(G::Pan as i32, 900, false).unwrap();
        assert_eq!(g.value, 900);
    }

    #[test]
    fn defaults_match_limits() {
        let d = default_generators();
        assert_eq!(d[G::InitialFilterFc.index()], 13500);
        assert_eq!(d[G::ScaleTuning.index()], 100);
        assert_eq!(d[G::ReleaseVolEnv.index()], -12000);
        assert_eq!(d[G::KeyNum.index()], -1);
    }

    #[test]
    fn combined_values_stay_in_limits() {
        // Push every type far past both ends from both layers.
        for ty in GeneratorType::all() {
            if ty.is_range() {
                continue;
            }
            let l = ty.limits();
            for (a, b) in [(30000i16, 30000i16), (-30000, -30000), (i16::MAX, 1), (i16::MIN, -1)] {
                let out = combine_generators(&[Generator::of(*ty, a)], &[Generator::of(*ty, b)]);
                let v = out[ty.index()] as i32;
                assert!(
                    v >= l.min.max(i16::MIN as i32) && v <= l.max.min(i16::MAX as i32),
                    "{ty:?} produced {v}"
                );
            }
        }
    }

    #[test]
    fn clamping_happens_after_summation() {
        // Instrument alone is out of range, but the preset offset pulls it back.
        let out = combine_generators(
            &[Generator::of(G::Pan, 800)],
            &[Generator::of(G::Pan, -400)],
        );
        assert_eq!(out[G::Pan.index()], 400);

        // Clamping each layer first would give 120 - 100 = 20.
        let out = combine_generators(
            &[Generator::of(G::CoarseTune, 200)],
            &[Generator::of(G::CoarseTune, -100)],
        );
        assert_eq!(out[G::CoarseTune.index()], 100);
    }

    #[test]
    fn missing_instrument_value_uses_default() {
        let out = combine_generators(&[], &[Generator::of(G::InitialFilterFc, -2000)]);
        assert_eq!(out[G::InitialFilterFc.index()], 11500);
    }

    #[test]
    fn later_generators_override_earlier() {
        // Local zone entries are appended after global ones.
        let out = combine_generators(
            &[Generator::of(G::Pan, -200), Generator::of(G::Pan, 100)],
            &[],
        );
        assert_eq!(out[G::Pan.index()], 100);
    }

    #[test]
    fn serde_uses_camel_case_names() {
        let g = Generator::of(G::AttackVolEnv, -1200);
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, r#"{"type":"attackVolEnv","value":-1200}"#);
    }
}
