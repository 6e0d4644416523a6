//! Modulators: routings from a control source into a generator.
//!
//! A modulator multiplies a primary and a secondary source (each normalised
//! through a curve and polarity) by its transform amount. The result is added
//! to the destination generator of every voice that carries it.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::generator::GeneratorType;
use crate::midi::{cc, non_cc, source, ControllerTable};

/// Entries in each curve lookup table.
pub const CURVE_RESOLUTION: usize = 16384;

/// Legacy multiplier for effect-send modulators.
pub const EFFECT_MODULATOR_TRANSFORM_MULTIPLIER: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurveType {
    #[default]
    Linear = 0,
    Concave = 1,
    Convex = 2,
    Switch = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformType {
    #[default]
    Linear,
    Absolute,
}

static CONCAVE: Lazy<Vec<f32>> = Lazy::new(|| {
    let last = (CURVE_RESOLUTION - 1) as f32;
    (0..CURVE_RESOLUTION)
        .map(|i| {
            let x = i as f32 / last;
            if i == CURVE_RESOLUTION - 1 {
                1.0
            } else {
                (-(20.0 / 96.0) * ((1.0 - x) * (1.0 - x)).log10()).clamp(0.0, 1.0)
            }
        })
        .collect()
});

static CONVEX: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..CURVE_RESOLUTION)
        .map(|i| 1.0 - CONCAVE[CURVE_RESOLUTION - 1 - i])
        .collect()
});

fn table_lookup(table: &[f32], x: f32) -> f32 {
    let index = (x.clamp(0.0, 1.0) * (CURVE_RESOLUTION - 1) as f32) as usize;
    table[index]
}

/// Concave curve value for `x` in `[0, 1]`.
pub fn concave(x: f32) -> f32 {
    table_lookup(&CONCAVE, x)
}

/// Convex curve value for `x` in `[0, 1]`.
pub fn convex(x: f32) -> f32 {
    table_lookup(&CONVEX, x)
}

fn unipolar_curve(curve: CurveType, x: f32) -> f32 {
    match curve {
        CurveType::Linear => x,
        CurveType::Concave => concave(x),
        CurveType::Convex => convex(x),
        CurveType::Switch => {
            if x > 0.5 {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Map a normalised `[0, 1]` source value through direction, polarity and curve.
pub fn apply_curve(curve: CurveType, is_bipolar: bool, is_negative: bool, value: f32) -> f32 {
    let x = if is_negative { 1.0 - value } else { value };
    if !is_bipolar {
        return unipolar_curve(curve, x);
    }
    match curve {
        CurveType::Linear | CurveType::Switch => unipolar_curve(curve, x) * 2.0 - 1.0,
        // Concave and convex mirror around the centre.
        CurveType::Concave | CurveType::Convex => {
            let centered = x * 2.0 - 1.0;
            if centered < 0.0 {
                -unipolar_curve(curve, -centered)
            } else {
                unipolar_curve(curve, centered)
            }
        }
    }
}

/// Per-voice inputs a modulator source may read besides the controller table.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub controllers: &'a ControllerTable,
    pub midi_note: u8,
    pub velocity: u8,
    pub poly_pressure: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulatorSource {
    pub index: u8,
    #[serde(rename = "isCC")]
    pub is_cc: bool,
    pub is_bipolar: bool,
    pub is_negative: bool,
    pub curve: CurveType,
}

impl ModulatorSource {
    pub const fn cc(controller: u8) -> Self {
        ModulatorSource {
            index: controller,
            is_cc: true,
            is_bipolar: false,
            is_negative: false,
            curve: CurveType::Linear,
        }
    }

    pub const fn non_cc(index: u8) -> Self {
        ModulatorSource {
            index,
            is_cc: false,
            is_bipolar: false,
            is_negative: false,
            curve: CurveType::Linear,
        }
    }

    /// The "no controller" source, which evaluates to 1.
    pub const fn none() -> Self {
        Self::non_cc(source::NO_CONTROLLER)
    }

    pub const fn bipolar(mut self) -> Self {
        self.is_bipolar = true;
        self
    }

    pub const fn negative(mut self) -> Self {
        self.is_negative = true;
        self
    }

    pub const fn curve(mut self, curve: CurveType) -> Self {
        self.curve = curve;
        self
    }

    /// True when this source reads the given controller-table slot.
    pub fn reads(&self, is_cc: bool, index: u8) -> bool {
        self.is_cc == is_cc && self.index == index
    }

    /// True when the source can change while a voice is sounding.
    pub fn is_live(&self) -> bool {
        if self.is_cc {
            return true;
        }
        matches!(
            self.index,
            source::POLY_PRESSURE
                | source::CHANNEL_PRESSURE
                | source::PITCH_WHEEL
                | source::PITCH_WHEEL_RANGE
        )
    }

    /// Normalised input in `[0, 1]` before the curve, or `None` for sources
    /// that are not supported (those evaluate to 0).
    fn normalized_input(&self, ctx: &SourceContext<'_>) -> Option<f32> {
        const MAX_14BIT: f32 = 16383.0;
        if self.is_cc {
            let raw = ctx.controllers.get(self.index as usize).copied().unwrap_or(0);
            return Some(raw as f32 / MAX_14BIT);
        }
        let raw = match self.index {
            source::NO_CONTROLLER => 16383,
            source::NOTE_ON_VELOCITY => (ctx.velocity as i32) << 7,
            source::NOTE_ON_KEY_NUM => (ctx.midi_note as i32) << 7,
            source::POLY_PRESSURE => (ctx.poly_pressure as i32) << 7,
            source::CHANNEL_PRESSURE | source::PITCH_WHEEL => {
                ctx.controllers[non_cc(self.index)] as i32
            }
            source::PITCH_WHEEL_RANGE => {
                let raw = ctx.controllers[non_cc(self.index)] as i32;
                let cents = (raw >> 7) * 100 + (raw & 0x7f);
                return Some(cents as f32 / 12700.0);
            }
            _ => return None,
        };
        Some(raw as f32 / MAX_14BIT)
    }

    /// Evaluate this source for a voice.
    pub fn value(&self, ctx: &SourceContext<'_>) -> f32 {
        match self.normalized_input(ctx) {
            Some(x) => apply_curve(self.curve, self.is_bipolar, self.is_negative, x),
            None => 0.0,
        }
    }
}

/// On-disk shape of a modulator; flags are derived on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModulatorRepr {
    primary_source: ModulatorSource,
    #[serde(default = "ModulatorSource::none")]
    secondary_source: ModulatorSource,
    destination: GeneratorType,
    transform_amount: i16,
    #[serde(default)]
    transform_type: TransformType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModulatorRepr", into = "ModulatorRepr")]
pub struct Modulator {
    pub primary: ModulatorSource,
    pub secondary: ModulatorSource,
    pub destination: GeneratorType,
    pub transform_amount: i16,
    pub transform_type: TransformType,
    pub is_effect_modulator: bool,
    pub is_default_resonant_modulator: bool,
    /// Last evaluated contribution for the owning voice.
    pub current_value: f32,
}

impl From<ModulatorRepr> for Modulator {
    fn from(r: ModulatorRepr) -> Self {
        Modulator::new(
            r.primary_source,
            r.secondary_source,
            r.destination,
            r.transform_amount,
            r.transform_type,
        )
    }
}

impl From<Modulator> for ModulatorRepr {
    fn from(m: Modulator) -> Self {
        ModulatorRepr {
            primary_source: m.primary,
            secondary_source: m.secondary,
            destination: m.destination,
            transform_amount: m.transform_amount,
            transform_type: m.transform_type,
        }
    }
}

impl Modulator {
    pub fn new(
        primary: ModulatorSource,
        secondary: ModulatorSource,
        destination: GeneratorType,
        transform_amount: i16,
        transform_type: TransformType,
    ) -> Self {
        let plain_cc = |controller: u8| {
            primary == ModulatorSource::cc(controller) && secondary == ModulatorSource::none()
        };
        let is_effect_modulator = (plain_cc(cc::REVERB_DEPTH)
            && destination == GeneratorType::ReverbEffectsSend)
            || (plain_cc(cc::CHORUS_DEPTH) && destination == GeneratorType::ChorusEffectsSend);
        let is_default_resonant_modulator = primary
            == ModulatorSource::cc(cc::FILTER_RESONANCE).bipolar()
            && secondary == ModulatorSource::none()
            && destination == GeneratorType::InitialFilterQ;
        Modulator {
            primary,
            secondary,
            destination,
            transform_amount,
            transform_type,
            is_effect_modulator,
            is_default_resonant_modulator,
            current_value: 0.0,
        }
    }

    /// Single-source modulator with a linear transform.
    pub fn simple(primary: ModulatorSource, destination: GeneratorType, amount: i16) -> Self {
        Modulator::new(
            primary,
            ModulatorSource::none(),
            destination,
            amount,
            TransformType::Linear,
        )
    }

    /// Identity ignores the amount: two identical modulators must never both
    /// apply to a voice.
    pub fn is_identical(&self, other: &Modulator) -> bool {
        self.primary == other.primary
            && self.secondary == other.secondary
            && self.destination == other.destination
            && self.transform_type == other.transform_type
    }

    /// Copy of `self` with `other`'s amount added.
    pub fn sum_transform(&self, other: &Modulator) -> Modulator {
        let amount = (self.transform_amount as i32 + other.transform_amount as i32)
            .clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        Modulator::new(
            self.primary,
            self.secondary,
            self.destination,
            amount,
            self.transform_type,
        )
    }

    /// True if either source reads the given slot.
    pub fn uses_source(&self, is_cc: bool, index: u8) -> bool {
        self.primary.reads(is_cc, index) || self.secondary.reads(is_cc, index)
    }

    pub fn has_live_source(&self) -> bool {
        self.primary.is_live() || self.secondary.is_live()
    }

    /// Whether the contribution can drop below zero.
    pub fn can_be_negative(&self) -> bool {
        self.transform_type != TransformType::Absolute
            && (self.transform_amount < 0 || self.primary.is_bipolar || self.secondary.is_bipolar)
    }

    /// Evaluate for one voice and cache the result in `current_value`.
    pub fn compute(&mut self, ctx: &SourceContext<'_>) -> f32 {
        if self.transform_amount == 0 {
            self.current_value = 0.0;
            return 0.0;
        }
        let primary = self.primary.value(ctx);
        let secondary = self.secondary.value(ctx);
        let mut amount = self.transform_amount as f32;
        if self.is_effect_modulator && amount <= 1000.0 {
            amount = (amount * EFFECT_MODULATOR_TRANSFORM_MULTIPLIER).min(1000.0);
        }
        let mut value = primary * secondary * amount;
        if self.transform_type == TransformType::Absolute {
            value = value.abs();
        }
        self.current_value = value;
        value
    }
}

// ── Default modulators ──────────────────────────────────────

/// Modulators every voice gets unless the bank supplies an identical one.
pub static DEFAULT_MODULATORS: Lazy<Vec<Modulator>> = Lazy::new(build_default_modulators);

fn build_default_modulators() -> Vec<Modulator> {
    use CurveType::{Concave, Linear, Switch};
    use GeneratorType as G;
    let src = ModulatorSource::non_cc;
    let ctl = ModulatorSource::cc;
    vec![
        // SF2 2.04 defaults
        Modulator::simple(
            src(source::NOTE_ON_VELOCITY).negative().curve(Concave),
            G::InitialAttenuation,
            960,
        ),
        Modulator::simple(ctl(cc::MODULATION_WHEEL), G::VibLfoToPitch, 50),
        Modulator::simple(
            ctl(cc::MAIN_VOLUME).negative().curve(Concave),
            G::InitialAttenuation,
            960,
        ),
        Modulator::simple(src(source::CHANNEL_PRESSURE), G::VibLfoToPitch, 50),
        Modulator::new(
            src(source::PITCH_WHEEL).bipolar(),
            src(source::PITCH_WHEEL_RANGE),
            G::FineTune,
            12700,
            TransformType::Linear,
        ),
        Modulator::simple(ctl(cc::PAN).bipolar(), G::Pan, 500),
        Modulator::simple(
            ctl(cc::EXPRESSION).negative().curve(Concave),
            G::InitialAttenuation,
            960,
        ),
        Modulator::simple(ctl(cc::REVERB_DEPTH), G::ReverbEffectsSend, 200),
        Modulator::simple(ctl(cc::CHORUS_DEPTH), G::ChorusEffectsSend, 200),
        // Extended defaults
        Modulator::simple(src(source::POLY_PRESSURE), G::VibLfoToPitch, 50),
        Modulator::simple(ctl(cc::TREMOLO_DEPTH), G::ModLfoToVolume, 24),
        Modulator::simple(ctl(cc::ATTACK_TIME).bipolar(), G::AttackVolEnv, 6000),
        Modulator::simple(ctl(cc::RELEASE_TIME).bipolar(), G::ReleaseVolEnv, 3600),
        Modulator::simple(ctl(cc::DECAY_TIME).bipolar(), G::DecayVolEnv, 3600),
        Modulator::simple(ctl(cc::BRIGHTNESS).bipolar(), G::InitialFilterFc, 6000),
        Modulator::simple(
            ctl(cc::FILTER_RESONANCE).bipolar().curve(Linear),
            G::InitialFilterQ,
            250,
        ),
        Modulator::simple(ctl(cc::SOFT_PEDAL).curve(Switch), G::InitialAttenuation, 50),
        Modulator::simple(ctl(cc::SOFT_PEDAL).curve(Switch), G::InitialFilterFc, -2400),
    ]
}

/// Merge zone modulators into the list a voice will carry.
///
/// Instrument modulators come first (local replacing identical global ones),
/// then default modulators not already present. Preset modulators are summed
/// into an identical entry or appended.
pub fn merge_modulators(
    instrument_global: &[Modulator],
    instrument_local: &[Modulator],
    defaults: &[Modulator],
    preset_global: &[Modulator],
    preset_local: &[Modulator],
) -> Vec<Modulator> {
    let mut list: Vec<Modulator> = Vec::with_capacity(
        instrument_global.len() + instrument_local.len() + defaults.len() + preset_local.len(),
    );
    fn add_replacing(list: &mut Vec<Modulator>, m: &Modulator) {
        match list.iter_mut().find(|existing| existing.is_identical(m)) {
            Some(existing) => *existing = m.clone(),
            None => list.push(m.clone()),
        }
    }
    for m in instrument_global.iter().chain(instrument_local) {
        add_replacing(&mut list, m);
    }
    for m in defaults {
        if !list.iter().any(|existing| existing.is_identical(m)) {
            list.push(m.clone());
        }
    }

    let mut preset: Vec<Modulator> = Vec::new();
    for m in preset_global.iter().chain(preset_local) {
        add_replacing(&mut preset, m);
    }
    for m in &preset {
        match list.iter_mut().find(|existing| existing.is_identical(m)) {
            Some(existing) => *existing = existing.sum_transform(m),
            None => list.push(m.clone()),
        }
    }
    list
}
