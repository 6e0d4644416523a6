//! A single sounding note instance.
//!
//! A voice owns its generator arrays, merged modulators, envelopes, filter
//! and a cursor into shared sample data. Channels create and mutate voices;
//! the processor renders them once per quantum.

use std::sync::Arc;

use crate::dsp::envelope::{ModulationEnvelope, VolumeEnvelope};
use crate::dsp::filter::{CoefficientCache, LowpassFilter};
use crate::dsp::lfo;
use crate::dsp::sampler::{AudioSample, InterpolationType, LoopMode};
use crate::dsp::units::{abs_cents_to_hz, pan_gains, timecents_to_seconds};
use crate::midi::ControllerTable;
use crate::soundbank::bank::VoiceSynthesisData;
use crate::soundbank::generator::{
    combine_generators, saturate_i16, GeneratorArray, GeneratorType as G, GENERATORS_AMOUNT,
};
use crate::soundbank::modulator::{Modulator, SourceContext};

/// Compensates for banks authored against EMU hardware attenuation.
pub const EMU_ATTENUATION_CORRECTION: f32 = 0.4;

/// Exclusive-class cutoff, in timecents.
pub const EXCLUSIVE_CUTOFF_TIME: i16 = -2320;
pub const EXCLUSIVE_MOD_CUTOFF_TIME: i16 = -1130;

/// Modulated attenuation beyond which a voice is inaudible, in cB.
pub const MAX_AUDIBLE_ATTENUATION: i16 = 2500;

/// Release times that win over the generator values, in timecents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedRelease {
    pub volume: i16,
    pub modulation: i16,
}

/// MIDI Tuning Standard entry for one key.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyTuning {
    /// Key whose pitch is used, or `None` to keep the played key.
    pub midi_note: Option<u8>,
    pub cents: f32,
}

/// Channel-wide vibrato set through NRPN, independent of generators.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ChannelVibrato {
    pub rate: f64,
    pub depth: f64,
    pub delay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingFactors {
    pub volume: f32,
    pub pan: f32,
    pub filter: f32,
}

impl SmoothingFactors {
    /// Base factors scaled for the output rate.
    pub fn for_sample_rate(sample_rate: f32) -> Self {
        let scale = 44100.0 / sample_rate;
        SmoothingFactors {
            volume: 0.01 * scale,
            pan: 0.05 * scale,
            filter: 0.1 * scale,
        }
    }
}

/// Stereo output, reverb and chorus buses for one render call.
pub struct VoiceOutputs<'a> {
    pub left: &'a mut [f32],
    pub right: &'a mut [f32],
    pub reverb_left: &'a mut [f32],
    pub reverb_right: &'a mut [f32],
    pub chorus_left: &'a mut [f32],
    pub chorus_right: &'a mut [f32],
}

/// Everything from the channel and processor a voice needs to render.
pub struct RenderContext<'a> {
    pub time: f64,
    pub interpolation: InterpolationType,
    pub smoothing: SmoothingFactors,
    /// Channel tuning, fine transpose and master tuning, in cents.
    pub channel_tuning_cents: f32,
    pub octave_tuning: &'a [i8; 12],
    pub key_tunings: Option<&'a [KeyTuning; 128]>,
    pub vibrato: ChannelVibrato,
    pub modulation_multiplier: f32,
    /// Master gain times MIDI (sysex) volume.
    pub gain: f32,
    pub pan_left: f32,
    pub pan_right: f32,
    pub reverb_gain: f32,
    pub chorus_gain: f32,
    pub effects: bool,
    pub filter_cache: &'a mut CoefficientCache,
    pub scratch: &'a mut Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub sample: AudioSample,
    pub filter: LowpassFilter,
    pub volume_envelope: VolumeEnvelope,
    pub modulation_envelope: ModulationEnvelope,
    /// Unmodulated values, fixed at creation.
    pub generators: GeneratorArray,
    /// Generators with offsets and modulators applied.
    pub modulated_generators: GeneratorArray,
    pub modulators: Vec<Modulator>,
    /// Extra attenuation from the default resonance modulator, in cB.
    pub resonance_offset: f32,
    /// Key as received, used to match note-offs.
    pub midi_note: u8,
    /// Key after channel transposition.
    pub real_key: u8,
    /// Key used for pitch and key scaling, after the keyNum override.
    pub target_key: u8,
    pub velocity: u8,
    pub pressure: u8,
    pub channel: usize,
    pub exclusive_class: i32,
    pub start_time: f64,
    pub release_start_time: f64,
    pub is_in_release: bool,
    pub finished: bool,
    pub sustained: bool,
    pub has_rendered: bool,
    /// Per-voice gain from key modifiers.
    pub gain: f32,
    pub current_pan: f32,
    pub pan_override: Option<f32>,
    pub portamento_from_key: Option<u8>,
    pub portamento_duration: f64,
    pub forced_release: Option<ForcedRelease>,
    sample_rate_ratio: f64,
    pitch_correction: f64,
    /// Set when a modulator or LFO can lift a silent sustain.
    volume_modulated: bool,
}

impl Voice {
    /// Assemble a voice from bank data. Timing and channel identity are set
    /// by the caller, which must then run a full [`Voice::compute_modulators`].
    pub fn new(data: &VoiceSynthesisData, key: u8, velocity: u8, output_rate: f32) -> Self {
        let mut generators =
            combine_generators(&data.instrument_generators, &data.preset_generators);
        let att = G::InitialAttenuation.index();
        generators[att] = (generators[att] as f32 * EMU_ATTENUATION_CORRECTION).floor() as i16;

        let g = |ty: G| generators[ty.index()];
        let target_key = if g(G::KeyNum) >= 0 { g(G::KeyNum) as u8 } else { key };
        let velocity = if g(G::Velocity) >= 0 { g(G::Velocity) as u8 } else { velocity };
        let sample = &data.sample;
        let root_key = if g(G::OverridingRootKey) >= 0 {
            g(G::OverridingRootKey) as u8
        } else {
            sample.original_key
        };

        let offset = |fine: G, coarse: G| g(fine) as i64 + g(coarse) as i64 * 32768;
        let mut cursor = AudioSample::new(Arc::clone(&sample.data), root_key);
        cursor.set_bounds(
            offset(G::StartAddrsOffset, G::StartAddrsCoarseOffset),
            sample.len() as i64 + offset(G::EndAddrOffset, G::EndAddrsCoarseOffset),
            sample.loop_start as i64
                + offset(G::StartloopAddrsOffset, G::StartloopAddrsCoarseOffset),
            sample.loop_end as i64 + offset(G::EndloopAddrsOffset, G::EndloopAddrsCoarseOffset),
            LoopMode::from_generator(g(G::SampleModes)),
        );

        let volume_modulated = g(G::ModLfoToVolume) != 0
            || g(G::VibLfoToVolume) != 0
            || data.modulators.iter().any(can_raise_volume);

        Voice {
            sample: cursor,
            filter: LowpassFilter::new(),
            volume_envelope: VolumeEnvelope::new(output_rate),
            modulation_envelope: ModulationEnvelope::new(),
            modulated_generators: generators,
            exclusive_class: g(G::ExclusiveClass) as i32,
            current_pan: g(G::Pan) as f32,
            generators,
            modulators: data.modulators.clone(),
            resonance_offset: 0.0,
            midi_note: key,
            real_key: key,
            target_key,
            velocity,
            pressure: 0,
            channel: 0,
            start_time: 0.0,
            release_start_time: f64::INFINITY,
            is_in_release: false,
            finished: false,
            sustained: false,
            has_rendered: false,
            gain: 1.0,
            pan_override: None,
            portamento_from_key: None,
            portamento_duration: 0.0,
            forced_release: None,
            sample_rate_ratio: sample.sample_rate as f64 / output_rate as f64,
            pitch_correction: sample.pitch_correction as f64,
            volume_modulated,
        }
    }

    /// Copy of a cached template, re-timed to start at `time`.
    pub fn retimed(&self, time: f64) -> Voice {
        let mut v = self.clone();
        v.start_time = time;
        v
    }

    fn source_context<'a>(&self, controllers: &'a ControllerTable) -> SourceContext<'a> {
        SourceContext {
            controllers,
            midi_note: self.real_key,
            velocity: self.velocity,
            poly_pressure: self.pressure,
        }
    }

    /// Recompute modulated generators.
    ///
    /// With `source = None` everything is recomputed. With
    /// `Some((is_cc, index))` only destinations of modulators reading that
    /// source are refreshed.
    pub fn compute_modulators(
        &mut self,
        controllers: &ControllerTable,
        offsets: Option<&[i16; GENERATORS_AMOUNT]>,
        source: Option<(bool, u8)>,
    ) {
        let ctx = self.source_context(controllers);
        let base = |generators: &GeneratorArray, i: usize| {
            generators[i] as i32 + offsets.map_or(0, |o| o[i] as i32)
        };

        match source {
            None => {
                let mut sums = [0f32; GENERATORS_AMOUNT];
                for m in self.modulators.iter_mut() {
                    let value = m.compute(&ctx);
                    sums[m.destination.index()] += value;
                    if m.is_default_resonant_modulator {
                        self.resonance_offset = (value / 2.0).max(0.0);
                    }
                }
                for i in 0..GENERATORS_AMOUNT {
                    self.modulated_generators[i] =
                        saturate_i16(base(&self.generators, i) + sums[i] as i32);
                }
            }
            Some((is_cc, index)) => {
                let mut touched = [false; GENERATORS_AMOUNT];
                for m in self.modulators.iter_mut() {
                    if !m.uses_source(is_cc, index) {
                        continue;
                    }
                    let value = m.compute(&ctx);
                    if m.is_default_resonant_modulator {
                        self.resonance_offset = (value / 2.0).max(0.0);
                    }
                    touched[m.destination.index()] = true;
                }
                for (i, _) in touched.iter().enumerate().filter(|(_, t)| **t) {
                    let sum: f32 = self
                        .modulators
                        .iter()
                        .filter(|m| m.destination.index() == i)
                        .map(|m| m.current_value)
                        .sum();
                    self.modulated_generators[i] =
                        saturate_i16(base(&self.generators, i) + sum as i32);
                }
                if !touched.iter().enumerate().any(|(i, &t)| {
                    t && (G::all()[i].affects_volume_envelope() || is_mod_env_type(i))
                }) {
                    self.apply_forced_release();
                    return;
                }
            }
        }
        self.apply_forced_release();
        self.recalculate_envelopes();
    }

    fn apply_forced_release(&mut self) {
        if let Some(forced) = self.forced_release {
            self.modulated_generators[G::ReleaseVolEnv.index()] = forced.volume;
            self.modulated_generators[G::ReleaseModEnv.index()] = forced.modulation;
        }
    }

    fn recalculate_envelopes(&mut self) {
        self.volume_envelope
            .recalculate(&self.modulated_generators, self.target_key, self.volume_modulated);
        self.modulation_envelope
            .recalculate(&self.modulated_generators, self.start_time, self.target_key);
    }

    /// Schedule the release, never earlier than `min_note_length` after the
    /// start.
    pub fn release(&mut self, current_time: f64, min_note_length: f64) {
        self.release_start_time = current_time.max(self.start_time + min_note_length);
    }

    /// Cut the voice now with fixed short release times, for exclusive
    /// classes. Unlike [`Voice::release`] there is no minimum note length.
    pub fn exclusive_release(&mut self, current_time: f64) {
        self.forced_release = Some(ForcedRelease {
            volume: EXCLUSIVE_CUTOFF_TIME,
            modulation: EXCLUSIVE_MOD_CUTOFF_TIME,
        });
        self.apply_forced_release();
        self.release_start_time = self.release_start_time.min(current_time);
        self.enter_release(current_time);
    }

    /// Release with the given release times regardless of modulation.
    pub fn force_release(&mut self, current_time: f64, min_note_length: f64, forced: ForcedRelease) {
        self.forced_release = Some(forced);
        self.apply_forced_release();
        if self.is_in_release {
            // Restart the release with the shorter time from the current level.
            self.volume_envelope.start_release();
            self.modulation_envelope.start_release(current_time);
            self.recalculate_envelopes();
        } else {
            self.release(current_time, min_note_length);
        }
    }

    fn enter_release(&mut self, time: f64) {
        self.is_in_release = true;
        self.volume_envelope.start_release();
        self.modulation_envelope.start_release(time);
        self.recalculate_envelopes();
        if self.sample.loop_mode == LoopMode::LoopUntilRelease {
            self.sample.is_looping = false;
        }
    }

    /// Linear amplitude the voice is currently producing.
    pub fn current_amplitude(&self) -> f32 {
        self.volume_envelope.current_gain() * self.gain
    }

    /// Pitch in cents relative to the sample's recorded pitch.
    fn pitch_cents(&mut self, ctx: &RenderContext<'_>) -> (f64, f32, f32) {
        let m = |ty: G| self.modulated_generators[ty.index()] as f64;
        let time = ctx.time;
        let mut target_key = self.target_key as f64;
        let mut cents = m(G::FineTune)
            + ctx.octave_tuning[(self.real_key % 12) as usize] as f64
            + ctx.channel_tuning_cents as f64;
        let mut semitones = m(G::CoarseTune);

        if let Some(tuning) = ctx.key_tunings.map(|t| t[self.real_key as usize & 127]) {
            if let Some(note) = tuning.midi_note {
                target_key = note as f64;
                cents += tuning.cents as f64;
            }
        }

        if let Some(from) = self.portamento_from_key {
            let elapsed = if self.portamento_duration > 0.0 {
                ((time - self.start_time) / self.portamento_duration).min(1.0)
            } else {
                1.0
            };
            semitones -= (target_key - from as f64) * (1.0 - elapsed);
        }

        cents += (target_key - self.sample.root_key as f64) * m(G::ScaleTuning);

        let mut volume_excursion = 0.0f64;
        let mut filter_excursion = 0.0f64;

        let (vib_pitch, vib_volume, vib_filter) =
            (m(G::VibLfoToPitch), m(G::VibLfoToVolume), m(G::VibLfoToFilterFc));
        if vib_pitch != 0.0 || vib_volume != 0.0 || vib_filter != 0.0 {
            let start = self.start_time + timecents_to_seconds(m(G::DelayVibLfo) as i32);
            let value = lfo::triangle(start, abs_cents_to_hz(m(G::FreqVibLfo)), time);
            cents += value * vib_pitch * ctx.modulation_multiplier as f64;
            volume_excursion -= value * vib_volume;
            filter_excursion += value * vib_filter;
        }

        let (mod_pitch, mod_volume, mod_filter) =
            (m(G::ModLfoToPitch), m(G::ModLfoToVolume), m(G::ModLfoToFilterFc));
        if mod_pitch != 0.0 || mod_volume != 0.0 || mod_filter != 0.0 {
            let start = self.start_time + timecents_to_seconds(m(G::DelayModLfo) as i32);
            let value = lfo::triangle(start, abs_cents_to_hz(m(G::FreqModLfo)), time);
            cents += value * mod_pitch * ctx.modulation_multiplier as f64;
            volume_excursion -= value * mod_volume;
            filter_excursion += value * mod_filter;
        }

        if ctx.vibrato.depth > 0.0 {
            let value =
                lfo::triangle(self.start_time + ctx.vibrato.delay, ctx.vibrato.rate, time);
            cents += value * ctx.vibrato.depth;
        }

        let (env_pitch, env_filter) = (m(G::ModEnvToPitch), m(G::ModEnvToFilterFc));
        if env_pitch != 0.0 || env_filter != 0.0 {
            let value = self.modulation_envelope.update(time);
            cents += value * env_pitch;
            filter_excursion += value * env_filter;
        }

        (
            cents + semitones * 100.0,
            volume_excursion as f32,
            filter_excursion as f32,
        )
    }

    /// Render one block, accumulating into `out`. Sets `finished` when done.
    pub fn render(&mut self, ctx: &mut RenderContext<'_>, out: &mut VoiceOutputs<'_>) {
        let len = out.left.len();
        if self.finished || len == 0 {
            return;
        }
        if !self.is_in_release && ctx.time >= self.release_start_time {
            self.enter_release(ctx.time);
        }
        if self.modulated_generators[G::InitialAttenuation.index()] > MAX_AUDIBLE_ATTENUATION {
            if self.is_in_release {
                self.finished = true;
            }
            return;
        }
        self.has_rendered = true;

        let (cents, volume_excursion, filter_excursion) = self.pitch_cents(ctx);
        self.sample.playback_step = self.sample_rate_ratio
            * 2f64.powf(self.pitch_correction / 1200.0)
            * 2f64.powf(cents / 1200.0);

        let buffer = &mut *ctx.scratch;
        buffer.clear();
        buffer.resize(len, 0.0);
        let held_silent = self.sample.loop_mode == LoopMode::StartOnRelease && !self.is_in_release;
        if !held_silent && self.sample.render(buffer, ctx.interpolation) {
            self.finished = true;
        }

        let m = |ty: G| self.modulated_generators[ty.index()];
        self.filter.apply(
            buffer,
            m(G::InitialFilterFc) as f32,
            m(G::InitialFilterQ).max(0),
            filter_excursion,
            ctx.smoothing.filter,
            ctx.filter_cache,
        );

        let attenuation_offset = volume_excursion + self.resonance_offset;
        if self
            .volume_envelope
            .apply(buffer, attenuation_offset, ctx.smoothing.volume)
        {
            self.finished = true;
        }

        let pan = match self.pan_override {
            Some(pan) => pan,
            None => {
                self.current_pan += (m(G::Pan) as f32 - self.current_pan) * ctx.smoothing.pan;
                self.current_pan
            }
        };
        let gain = ctx.gain * self.gain;
        let (pan_l, pan_r) = pan_gains(pan);
        let gain_left = pan_l * gain * ctx.pan_left;
        let gain_right = pan_r * gain * ctx.pan_right;

        if ctx.effects {
            let reverb_send = m(G::ReverbEffectsSend);
            if reverb_send > 0 {
                let reverb = ctx.reverb_gain * gain * reverb_send as f32 / 3070.0;
                for (i, s) in buffer.iter().enumerate() {
                    out.reverb_left[i] += reverb * s;
                    out.reverb_right[i] += reverb * s;
                }
            }
            let chorus_send = m(G::ChorusEffectsSend);
            if chorus_send > 0 {
                let chorus = ctx.chorus_gain * chorus_send as f32 / 2000.0;
                let (cl, cr) = (chorus * gain_left, chorus * gain_right);
                for (i, s) in buffer.iter().enumerate() {
                    out.chorus_left[i] += cl * s;
                    out.chorus_right[i] += cr * s;
                }
            }
        }

        for (i, s) in buffer.iter().enumerate() {
            out.left[i] += gain_left * s;
            out.right[i] += gain_right * s;
        }
    }
}

fn can_raise_volume(m: &Modulator) -> bool {
    if m.transform_amount == 0 {
        return false;
    }
    match m.destination {
        G::ModLfoToVolume | G::VibLfoToVolume => true,
        G::SustainVolEnv => m.has_live_source(),
        G::InitialAttenuation => m.has_live_source() && m.can_be_negative(),
        _ => false,
    }
}

fn is_mod_env_type(index: usize) -> bool {
    matches!(
        G::all()[index],
        G::DelayModEnv
            | G::AttackModEnv
            | G::HoldModEnv
            | G::DecayModEnv
            | G::SustainModEnv
            | G::ReleaseModEnv
            | G::KeyNumToModEnvHold
            | G::KeyNumToModEnvDecay
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{cc, default_controller_values};
    use crate::soundbank::generator::Generator;
    use crate::soundbank::modulator::DEFAULT_MODULATORS;
    use crate::soundbank::sample::Sample;

    const SR: f32 = 44100.0;

    fn data(generators: &[(G, i16)], samples: Vec<f32>) -> VoiceSynthesisData {
        VoiceSynthesisData {
            instrument_generators: generators.iter().map(|&(t, v)| Generator::of(t, v)).collect(),
            preset_generators: Vec::new(),
            modulators: DEFAULT_MODULATORS.clone(),
            sample: Arc::new(Sample::new("dc", samples, 44100, 60).with_loop(0, 0)),
        }
    }

    fn looped(generators: &[(G, i16)]) -> VoiceSynthesisData {
        let mut d = data(generators, vec![0.5; 4410]);
        let mut sample = (*d.sample).clone();
        sample.loop_start = 100;
        sample.loop_end = 4000;
        d.sample = Arc::new(sample);
        d
    }

    struct Bus {
        buffers: Vec<Vec<f32>>,
        cache: CoefficientCache,
        scratch: Vec<f32>,
    }

    impl Bus {
        fn new(len: usize) -> Self {
            Bus {
                buffers: vec![vec![0.0; len]; 6],
                cache: CoefficientCache::new(SR as f64),
                scratch: Vec::new(),
            }
        }

        fn render(&mut self, voice: &mut Voice, time: f64) -> f32 {
            for b in &mut self.buffers {
                b.fill(0.0);
            }
            let octave = [0i8; 12];
            let mut ctx = RenderContext {
                time,
                interpolation: InterpolationType::Linear,
                smoothing: SmoothingFactors::for_sample_rate(SR),
                channel_tuning_cents: 0.0,
                octave_tuning: &octave,
                key_tunings: None,
                vibrato: ChannelVibrato::default(),
                modulation_multiplier: 1.0,
                gain: 1.0,
                pan_left: 1.0,
                pan_right: 1.0,
                reverb_gain: 1.0,
                chorus_gain: 1.0,
                effects: true,
                filter_cache: &mut self.cache,
                scratch: &mut self.scratch,
            };
            let [l, r, rl, rr, cl, cr] = &mut self.buffers[..] else {
                unreachable!()
            };
            let mut out = VoiceOutputs {
                left: l,
                right: r,
                reverb_left: rl,
                reverb_right: rr,
                chorus_left: cl,
                chorus_right: cr,
            };
            voice.render(&mut ctx, &mut out);
            self.buffers[0].iter().fold(0.0f32, |m, s| m.max(s.abs()))
        }
    }

    fn voice(d: &VoiceSynthesisData, key: u8) -> (Voice, ControllerTable) {
        let table = default_controller_values();
        let mut v = Voice::new(d, key, 127, SR);
        v.compute_modulators(&table, None, None);
        (v, table)
    }

    #[test]
    fn generator_overrides_apply() {
        let d = data(
            &[(G::KeyNum, 72), (G::Velocity, 10), (G::OverridingRootKey, 48), (G::ExclusiveClass, 5)],
            vec![0.0; 100],
        );
        let v = Voice::new(&d, 60, 100, SR);
        assert_eq!(v.target_key, 72);
        assert_eq!(v.velocity, 10);
        assert_eq!(v.sample.root_key, 48);
        assert_eq!(v.exclusive_class, 5);
    }

    #[test]
    fn emu_attenuation_correction() {
        let d = data(&[(G::InitialAttenuation, 250)], vec![0.0; 100]);
        let v = Voice::new(&d, 60, 100, SR);
        assert_eq!(v.generators[G::InitialAttenuation.index()], 100);
    }

    #[test]
    fn sample_offsets_use_coarse_units() {
        let d = data(
            &[(G::StartAddrsOffset, 10), (G::EndAddrOffset, -20), (G::SampleModes, 1)],
            vec![0.0; 1000],
        );
        let v = Voice::new(&d, 60, 100, SR);
        assert_eq!(v.sample.cursor, 10.0);
        assert_eq!(v.sample.end, 980);
        // Loop of zero length disables looping.
        assert!(!v.sample.is_looping);
    }

    #[test]
    fn plays_at_root_pitch() {
        let (mut v, _) = voice(&looped(&[(G::SampleModes, 1)]), 60);
        let mut bus = Bus::new(128);
        bus.render(&mut v, 0.0);
        assert!((v.sample.playback_step - 1.0).abs() < 1e-9);
        let (mut v, _) = voice(&looped(&[(G::SampleModes, 1)]), 72);
        bus.render(&mut v, 0.0);
        assert!((v.sample.playback_step - 2.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_attenuates_through_default_modulator() {
        let d = looped(&[(G::SampleModes, 1)]);
        let table = default_controller_values();
        let mut loud = Voice::new(&d, 60, 127, SR);
        loud.compute_modulators(&table, None, None);
        let mut soft = Voice::new(&d, 60, 40, SR);
        soft.compute_modulators(&table, None, None);
        let att = G::InitialAttenuation.index();
        assert!(soft.modulated_generators[att] > loud.modulated_generators[att]);
    }

    #[test]
    fn selective_recompute_only_touches_dependents() {
        let (mut v, mut table) = voice(&looped(&[]), 60);
        let before = v.modulated_generators;
        table[cc::PAN as usize] = 0;
        v.compute_modulators(&table, None, Some((true, cc::PAN)));
        assert_eq!(v.modulated_generators[G::Pan.index()], -500);
        for i in 0..GENERATORS_AMOUNT {
            if i != G::Pan.index() {
                assert_eq!(v.modulated_generators[i], before[i]);
            }
        }
        // A source nobody reads changes nothing.
        table[cc::PAN as usize] = 64 << 7;
        v.compute_modulators(&table, None, Some((true, 3)));
        assert_eq!(v.modulated_generators[G::Pan.index()], -500);
    }

    #[test]
    fn offsets_shift_modulated_values() {
        let (mut v, table) = voice(&looped(&[]), 60);
        let mut offsets = [0i16; GENERATORS_AMOUNT];
        offsets[G::CoarseTune.index()] = 12;
        v.compute_modulators(&table, Some(&offsets), None);
        assert_eq!(v.modulated_generators[G::CoarseTune.index()], 12);
    }

    #[test]
    fn release_respects_min_note_length() {
        let (mut v, _) = voice(&looped(&[]), 60);
        v.start_time = 1.0;
        v.release(1.01, 0.03);
        assert!((v.release_start_time - 1.03).abs() < 1e-12);
        v.release(2.0, 0.03);
        assert_eq!(v.release_start_time, 2.0);
    }

    #[test]
    fn exclusive_release_cuts_immediately() {
        let (mut v, table) = voice(&looped(&[(G::SampleModes, 1), (G::ReleaseVolEnv, 2000)]), 60);
        v.start_time = 0.0;
        v.exclusive_release(0.001);
        assert!(v.is_in_release);
        assert_eq!(v.release_start_time, 0.001);
        v.compute_modulators(&table, None, None);
        assert_eq!(v.modulated_generators[G::ReleaseVolEnv.index()], EXCLUSIVE_CUTOFF_TIME);
        assert_eq!(v.modulated_generators[G::ReleaseModEnv.index()], EXCLUSIVE_MOD_CUTOFF_TIME);

        let mut bus = Bus::new(128);
        let mut time = 0.001;
        let mut blocks = 0;
        while !v.finished && blocks < 200 {
            bus.render(&mut v, time);
            time += 128.0 / SR as f64;
            blocks += 1;
        }
        assert!(v.finished);
        // -2320 tc is about 0.26 s, roughly 90 blocks.
        assert!(blocks <= 95, "{blocks}");
    }

    #[test]
    fn renders_then_finishes_after_release() {
        let (mut v, _) = voice(&looped(&[(G::SampleModes, 1), (G::ReleaseVolEnv, -3600)]), 60);
        let mut bus = Bus::new(128);
        let mut time = 0.0;
        let peak = bus.render(&mut v, time);
        assert!(peak > 0.1, "{peak}");
        v.release(time, 0.0);
        let mut blocks = 0;
        while !v.finished && blocks < 100 {
            time += 128.0 / SR as f64;
            bus.render(&mut v, time);
            blocks += 1;
        }
        assert!(v.is_in_release);
        assert!(v.finished);
        // -3600 tc is 0.125 s, about 43 blocks.
        assert!(blocks <= 45, "{blocks}");
    }

    #[test]
    fn non_looping_sample_finishes() {
        let (mut v, _) = voice(&data(&[], vec![0.5; 200]), 60);
        let mut bus = Bus::new(256);
        bus.render(&mut v, 0.0);
        assert!(v.finished);
    }

    #[test]
    fn start_on_release_is_silent_while_held() {
        let (mut v, _) = voice(&looped(&[(G::SampleModes, 2)]), 60);
        let mut bus = Bus::new(128);
        assert_eq!(bus.render(&mut v, 0.0), 0.0);
        assert!(!v.finished);
        v.release(0.0, 0.0);
        assert!(bus.render(&mut v, 0.01) > 0.0);
    }

    #[test]
    fn reverb_send_is_mono() {
        let (mut v, _) = voice(&looped(&[(G::SampleModes, 1), (G::ReverbEffectsSend, 500)]), 60);
        let mut bus = Bus::new(128);
        bus.render(&mut v, 0.0);
        let (rl, rr) = (&bus.buffers[2], &bus.buffers[3]);
        assert!(rl[100] > 0.0);
        assert_eq!(rl, rr);
    }

    fn silent_sustain(extra: &[(G, i16)]) -> VoiceSynthesisData {
        let mut gens = vec![(G::SampleModes, 1), (G::SustainVolEnv, 1000), (G::DecayVolEnv, -12000)];
        gens.extend_from_slice(extra);
        let mut d = looped(&gens);
        d.modulators.retain(|m| !matches!(m.destination, G::ModLfoToVolume | G::VibLfoToVolume));
        d
    }

    fn blocks_until_finished(v: &mut Voice, limit: usize) -> Option<usize> {
        let mut bus = Bus::new(128);
        (0..limit).find(|&i| {
            bus.render(v, i as f64 * 128.0 / SR as f64);
            v.finished
        })
    }

    #[test]
    fn silent_sustain_ends_voice() {
        let (mut v, _) = voice(&silent_sustain(&[]), 60);
        assert!(blocks_until_finished(&mut v, 8).is_some());
    }

    #[test]
    fn lfo_to_volume_keeps_silent_sustain_running() {
        let (mut v, _) = voice(&silent_sustain(&[(G::ModLfoToVolume, 120)]), 60);
        assert_eq!(blocks_until_finished(&mut v, 8), None);
        assert!(!v.is_in_release);
    }

    #[test]
    fn tremolo_modulator_keeps_silent_sustain_running() {
        let mut d = silent_sustain(&[]);
        d.modulators = DEFAULT_MODULATORS.clone();
        let (mut v, _) = voice(&d, 60);
        assert_eq!(blocks_until_finished(&mut v, 8), None);
    }

    #[test]
    fn inaudible_voice_is_skipped() {
        let (mut v, _) = voice(&looped(&[]), 60);
        v.modulated_generators[G::InitialAttenuation.index()] = 3000;
        let mut bus = Bus::new(64);
        assert_eq!(bus.render(&mut v, 0.0), 0.0);
        assert!(!v.has_rendered);
    }
}
