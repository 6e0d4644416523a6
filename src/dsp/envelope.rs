//! Volume and modulation envelopes.
//!
//! The volume envelope runs on the sample clock in the decibel domain and
//! scales audio directly. The modulation envelope runs on engine time in
//! seconds, is linear in `0..=1`, and only feeds generator modulation.

use crate::dsp::units::{db_attenuation_to_gain, gain_to_db_attenuation, timecents_to_seconds};
use crate::soundbank::generator::{GeneratorArray, GeneratorType as G};
use crate::soundbank::modulator::convex;

/// Attenuation treated as silence, in dB.
pub const DB_SILENCE: f32 = 100.0;

/// Sustain attenuation at or above which a voice is inaudible, in dB.
pub const PERCEIVED_DB_SILENCE: f32 = 90.0;

/// Release gain below which a voice is finished.
pub const GAIN_SILENCE: f32 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolumeEnvelopeState {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
}

#[derive(Debug, Clone)]
pub struct VolumeEnvelope {
    sample_rate: f32,
    pub state: VolumeEnvelopeState,
    /// Envelope attenuation at the last rendered sample, in dB.
    pub current_attenuation_db: f32,
    /// Smoothed initial attenuation as linear gain.
    pub attenuation: f32,
    attenuation_target_gain: f32,
    current_sample_time: usize,
    in_release: bool,
    release_start_db: f32,
    release_start_time_samples: usize,
    current_release_gain: f32,
    attack_duration: usize,
    decay_duration: usize,
    release_duration: usize,
    sustain_db_relative: f32,
    delay_end: usize,
    attack_end: usize,
    hold_end: usize,
    decay_end: usize,
    can_end_on_silent_sustain: bool,
    initialized: bool,
}

/// Stage boundaries, in samples from the envelope start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBoundaries {
    pub delay_end: usize,
    pub attack_end: usize,
    pub hold_end: usize,
    pub decay_end: usize,
    pub release_duration: usize,
}

fn timecents_to_samples(timecents: i32, sample_rate: f32) -> usize {
    (timecents_to_seconds(timecents) * sample_rate as f64).floor().max(0.0) as usize
}

impl VolumeEnvelope {
    pub fn new(sample_rate: f32) -> Self {
        VolumeEnvelope {
            sample_rate,
            state: VolumeEnvelopeState::Delay,
            current_attenuation_db: DB_SILENCE,
            attenuation: 0.0,
            attenuation_target_gain: 0.0,
            current_sample_time: 0,
            in_release: false,
            release_start_db: DB_SILENCE,
            release_start_time_samples: 0,
            current_release_gain: 1.0,
            attack_duration: 0,
            decay_duration: 0,
            release_duration: 0,
            sustain_db_relative: 0.0,
            delay_end: 0,
            attack_end: 0,
            hold_end: 0,
            decay_end: 0,
            can_end_on_silent_sustain: false,
            initialized: false,
        }
    }

    /// Recompute stage boundaries from (modulated) generators.
    ///
    /// Boundaries are absolute, so calling this mid-note keeps the envelope
    /// consistent with the samples already rendered. `volume_modulated`
    /// reports whether anything can lift a silent sustain back up.
    pub fn recalculate(&mut self, generators: &GeneratorArray, target_key: u8, volume_modulated: bool) {
        let g = |ty: G| generators[ty.index()] as i32;
        let sr = self.sample_rate;
        let key_offset = 60 - target_key as i32;

        let attenuation_db = g(G::InitialAttenuation).clamp(0, 1440) as f32 / 10.0;
        self.attenuation_target_gain = db_attenuation_to_gain(attenuation_db);
        if !self.initialized {
            self.attenuation = self.attenuation_target_gain;
            self.initialized = true;
        }

        self.sustain_db_relative = (g(G::SustainVolEnv) as f32 / 10.0).min(DB_SILENCE);
        self.attack_duration = timecents_to_samples(g(G::AttackVolEnv), sr);

        // Decay time is specified as the time to fall the full 100 dB.
        let decay_fraction = self.sustain_db_relative / DB_SILENCE;
        let decay_tc = g(G::DecayVolEnv) + key_offset * g(G::KeyNumToVolEnvDecay);
        self.decay_duration = (timecents_to_samples(decay_tc, sr) as f32 * decay_fraction) as usize;

        self.release_duration = timecents_to_samples(g(G::ReleaseVolEnv), sr);
        self.delay_end = timecents_to_samples(g(G::DelayVolEnv), sr);
        self.attack_end = self.delay_end + self.attack_duration;
        let hold_tc = g(G::HoldVolEnv) + key_offset * g(G::KeyNumToVolEnvHold);
        self.hold_end = self.attack_end + timecents_to_samples(hold_tc, sr);
        self.decay_end = self.hold_end + self.decay_duration;

        if self.state == VolumeEnvelopeState::Delay && self.attack_end == 0 {
            self.state = VolumeEnvelopeState::Hold;
        }
        self.can_end_on_silent_sustain =
            self.sustain_db_relative >= PERCEIVED_DB_SILENCE && !volume_modulated;
    }

    pub fn boundaries(&self) -> StageBoundaries {
        StageBoundaries {
            delay_end: self.delay_end,
            attack_end: self.attack_end,
            hold_end: self.hold_end,
            decay_end: self.decay_end,
            release_duration: self.release_duration,
        }
    }

    pub fn is_in_release(&self) -> bool {
        self.in_release
    }

    /// Samples rendered so far.
    pub fn sample_time(&self) -> usize {
        self.current_sample_time
    }

    /// Release from wherever the envelope currently is.
    pub fn start_release(&mut self) {
        self.in_release = true;
        self.release_start_time_samples = self.current_sample_time;
        self.release_start_db = self.current_attenuation_db.clamp(0.0, DB_SILENCE);
        self.current_release_gain = db_attenuation_to_gain(self.release_start_db);
    }

    /// Current envelope gain including the smoothed attenuation.
    pub fn current_gain(&self) -> f32 {
        if self.in_release {
            self.current_release_gain
        } else {
            self.attenuation * db_attenuation_to_gain(self.current_attenuation_db)
        }
    }

    /// Scale `buffer` by the envelope. `centibel_offset` is extra
    /// attenuation (tremolo, resonance compensation). Returns `true` once
    /// the voice has finished.
    pub fn apply(&mut self, buffer: &mut [f32], centibel_offset: f32, smoothing: f32) -> bool {
        let db_offset = centibel_offset / 10.0;
        if self.in_release {
            return self.apply_release(buffer, db_offset, smoothing);
        }

        let offset_gain = db_attenuation_to_gain(db_offset);
        let mut filled = 0;
        let len = buffer.len();
        while filled < len {
            let t = self.current_sample_time;
            match self.state {
                VolumeEnvelopeState::Delay => {
                    if t >= self.delay_end {
                        self.state = VolumeEnvelopeState::Attack;
                        continue;
                    }
                    self.current_attenuation_db = DB_SILENCE;
                    buffer[filled] = 0.0;
                }
                VolumeEnvelopeState::Attack => {
                    if t >= self.attack_end {
                        self.state = VolumeEnvelopeState::Hold;
                        continue;
                    }
                    self.smooth(smoothing);
                    // Linear gain ramp rather than a linear dB ramp.
                    let ramp =
                        1.0 - (self.attack_end - t) as f32 / self.attack_duration.max(1) as f32;
                    buffer[filled] *= ramp * self.attenuation * offset_gain;
                    self.current_attenuation_db = gain_to_db_attenuation(ramp).min(DB_SILENCE);
                }
                VolumeEnvelopeState::Hold => {
                    if t >= self.hold_end {
                        self.state = VolumeEnvelopeState::Decay;
                        continue;
                    }
                    self.smooth(smoothing);
                    buffer[filled] *= self.attenuation * offset_gain;
                    self.current_attenuation_db = 0.0;
                }
                VolumeEnvelopeState::Decay => {
                    if t >= self.decay_end {
                        self.state = VolumeEnvelopeState::Sustain;
                        continue;
                    }
                    self.smooth(smoothing);
                    let progress =
                        1.0 - (self.decay_end - t) as f32 / self.decay_duration.max(1) as f32;
                    self.current_attenuation_db = progress * self.sustain_db_relative;
                    buffer[filled] *= self.attenuation
                        * db_attenuation_to_gain(self.current_attenuation_db + db_offset);
                }
                VolumeEnvelopeState::Sustain => {
                    if self.can_end_on_silent_sustain {
                        buffer[filled..].fill(0.0);
                        self.current_sample_time += len - filled;
                        return true;
                    }
                    self.smooth(smoothing);
                    self.current_attenuation_db = self.sustain_db_relative;
                    buffer[filled] *= self.attenuation
                        * db_attenuation_to_gain(self.sustain_db_relative + db_offset);
                }
            }
            self.current_sample_time += 1;
            filled += 1;
        }
        false
    }

    fn apply_release(&mut self, buffer: &mut [f32], db_offset: f32, smoothing: f32) -> bool {
        let mut elapsed = self.current_sample_time - self.release_start_time_samples;
        if elapsed >= self.release_duration {
            buffer.fill(0.0);
            self.current_release_gain = 0.0;
            return true;
        }
        let db_span = DB_SILENCE - self.release_start_db;
        for sample in buffer.iter_mut() {
            self.smooth(smoothing);
            let db = if elapsed >= self.release_duration {
                DB_SILENCE
            } else {
                (elapsed as f32 / self.release_duration as f32) * db_span + self.release_start_db
            };
            self.current_attenuation_db = db;
            self.current_release_gain =
                self.attenuation * db_attenuation_to_gain(db + db_offset);
            *sample *= self.current_release_gain;
            self.current_sample_time += 1;
            elapsed += 1;
        }
        self.current_release_gain <= GAIN_SILENCE
    }

    fn smooth(&mut self, smoothing: f32) {
        self.attenuation += (self.attenuation_target_gain - self.attenuation) * smoothing;
    }
}

// ── Modulation envelope ─────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ModulationEnvelope {
    attack_duration: f64,
    decay_duration: f64,
    hold_duration: f64,
    release_duration: f64,
    sustain_level: f64,
    delay_end: f64,
    attack_end: f64,
    hold_end: f64,
    decay_end: f64,
    release_start: Option<f64>,
    release_start_level: f64,
    /// Value at the last `update`.
    pub current_value: f64,
}

impl ModulationEnvelope {
    pub fn new() -> Self {
        ModulationEnvelope {
            release_start_level: 1.0,
            ..ModulationEnvelope::default()
        }
    }

    pub fn recalculate(&mut self, generators: &GeneratorArray, start_time: f64, midi_note: u8) {
        let g = |ty: G| generators[ty.index()] as i32;
        let key_offset = 60 - midi_note as i32;
        self.sustain_level = 1.0 - g(G::SustainModEnv) as f64 / 1000.0;
        self.attack_duration = timecents_to_seconds(g(G::AttackModEnv));
        let decay = timecents_to_seconds(g(G::DecayModEnv) + key_offset * g(G::KeyNumToModEnvDecay));
        self.decay_duration = decay * (1.0 - self.sustain_level);
        self.hold_duration =
            timecents_to_seconds(g(G::HoldModEnv) + key_offset * g(G::KeyNumToModEnvHold));
        self.release_duration = timecents_to_seconds(g(G::ReleaseModEnv)) * self.release_start_level;
        self.delay_end = start_time + timecents_to_seconds(g(G::DelayModEnv));
        self.attack_end = self.delay_end + self.attack_duration;
        self.hold_end = self.attack_end + self.hold_duration;
        self.decay_end = self.hold_end + self.decay_duration;
    }

    /// Capture the current level and begin the linear release. Call
    /// `recalculate` afterwards so the release time scales with the level.
    pub fn start_release(&mut self, time: f64) {
        self.release_start_level = self.value_at(time, true);
        self.release_start = Some(time);
    }

    /// Envelope value at `time`. With `ignore_release` the value is computed
    /// as if the note were still held.
    pub fn value_at(&self, time: f64, ignore_release: bool) -> f64 {
        if let (Some(start), false) = (self.release_start, ignore_release) {
            if self.release_start_level == 0.0 || self.release_duration <= 0.0 {
                return 0.0;
            }
            let progress = (time - start) / self.release_duration;
            return ((1.0 - progress) * self.release_start_level).max(0.0);
        }
        if time < self.delay_end {
            0.0
        } else if time < self.attack_end {
            convex((1.0 - (self.attack_end - time) / self.attack_duration) as f32) as f64
        } else if time < self.hold_end {
            1.0
        } else if time < self.decay_end {
            (1.0 - (self.decay_end - time) / self.decay_duration) * (self.sustain_level - 1.0) + 1.0
        } else {
            self.sustain_level
        }
    }

    pub fn update(&mut self, time: f64) -> f64 {
        self.current_value = self.value_at(time, false);
        self.current_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundbank::generator::default_generators;

    const SR: f32 = 44100.0;

    fn gens(pairs: &[(G, i16)]) -> GeneratorArray {
        let mut g = default_generators();
        for &(ty, v) in pairs {
            g[ty.index()] = v;
        }
        g
    }

    /// Zero-length delay and attack.
    const INSTANT: [(G, i16); 3] = [
        (G::DelayVolEnv, i16::MIN),
        (G::AttackVolEnv, i16::MIN),
        (G::HoldVolEnv, i16::MIN),
    ];

    fn run(env: &mut VolumeEnvelope, samples: usize) -> (Vec<f32>, bool) {
        let mut buf = vec![1.0; samples];
        let finished = env.apply(&mut buf, 0.0, 1.0);
        (buf, finished)
    }

    #[test]
    fn zero_delay_and_attack_starts_in_hold() {
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&gens(&INSTANT[..2]), 60, false);
        assert_eq!(env.state, VolumeEnvelopeState::Hold);
        let (buf, finished) = run(&mut env, 64);
        assert!(!finished);
        assert!(buf.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn attack_is_a_linear_gain_ramp() {
        let mut env = VolumeEnvelope::new(SR);
        // 2^(-1200/1200) = 0.5 s attack
        env.recalculate(
            &gens(&[(G::DelayVolEnv, i16::MIN), (G::AttackVolEnv, -1200)]),
            60,
            false,
        );
        assert_eq!(env.boundaries().attack_end, 22050);
        let (buf, _) = run(&mut env, 22050);
        assert!((buf[11025] - 0.5).abs() < 1e-3, "{}", buf[11025]);
        assert!(buf[0] < 1e-3);
    }

    #[test]
    fn decays_to_sustain() {
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(
            &gens(&[
                INSTANT[0],
                INSTANT[1],
                INSTANT[2],
                (G::DecayVolEnv, -1200),
                (G::SustainVolEnv, 200),
            ]),
            60,
            false,
        );
        // 20 dB of a 100 dB decay scales the decay time by 0.2.
        assert_eq!(env.boundaries().decay_end, (22050.0 * 0.2) as usize);
        let (buf, _) = run(&mut env, 10000);
        assert!((buf[9999] - 0.1).abs() < 1e-4, "{}", buf[9999]);
        assert_eq!(env.state, VolumeEnvelopeState::Sustain);
    }

    #[test]
    fn key_scaling_shortens_hold_above_middle_c() {
        let g = gens(&[(G::HoldVolEnv, 0), (G::KeyNumToVolEnvHold, 100)]);
        let mut low = VolumeEnvelope::new(SR);
        low.recalculate(&g, 48, false);
        let mut high = VolumeEnvelope::new(SR);
        high.recalculate(&g, 72, false);
        assert!(low.boundaries().hold_end > high.boundaries().hold_end);
    }

    #[test]
    fn recalculate_is_idempotent() {
        let g = gens(&[
            (G::DelayVolEnv, -2400),
            (G::AttackVolEnv, -3000),
            (G::HoldVolEnv, -1000),
            (G::DecayVolEnv, 0),
            (G::SustainVolEnv, 300),
            (G::ReleaseVolEnv, -600),
        ]);
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&g, 64, false);
        run(&mut env, 3000);
        let first = env.boundaries();
        env.recalculate(&g, 64, false);
        assert_eq!(first, env.boundaries());
        env.recalculate(&g, 64, false);
        assert_eq!(first, env.boundaries());
    }

    #[test]
    fn release_reaches_silence_within_release_time() {
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&gens(&[(G::ReleaseVolEnv, -1200)]), 60, false);
        run(&mut env, 128);
        env.start_release();
        assert!(env.is_in_release());
        let release = env.boundaries().release_duration;
        let mut rendered = 0;
        let mut finished = false;
        while !finished && rendered <= release + 128 {
            finished = run(&mut env, 128).1;
            rendered += 128;
        }
        assert!(finished, "release never finished");
        assert!(rendered <= release + 128, "took {rendered} samples");
    }

    #[test]
    fn silent_sustain_ends_voice_unless_modulated() {
        let g = gens(&[(G::SustainVolEnv, 1000), (G::DecayVolEnv, -12000)]);
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&g, 60, false);
        let mut finished = false;
        for _ in 0..4 {
            finished |= run(&mut env, 128).1;
        }
        assert!(finished);

        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&g, 60, true);
        for _ in 0..4 {
            assert!(!run(&mut env, 128).1);
        }
    }

    #[test]
    fn attenuation_is_smoothed_after_first_recalc() {
        let mut env = VolumeEnvelope::new(SR);
        env.recalculate(&gens(&INSTANT), 60, false);
        assert!((env.attenuation - 1.0).abs() < 1e-6);
        env.recalculate(
            &gens(&[INSTANT[0], INSTANT[1], INSTANT[2], (G::InitialAttenuation, 200)]),
            60,
            false,
        );
        let mut buf = vec![1.0; 1];
        env.apply(&mut buf, 0.0, 0.5);
        assert!((buf[0] - 0.55).abs() < 1e-4, "{}", buf[0]);
    }

    #[test]
    fn mod_env_shape() {
        let g = gens(&[
            (G::AttackModEnv, -1200),
            (G::HoldModEnv, -1200),
            (G::DecayModEnv, 0),
            (G::SustainModEnv, 500),
            (G::ReleaseModEnv, 0),
        ]);
        let mut env = ModulationEnvelope::new();
        env.recalculate(&g, 1.0, 60);
        assert_eq!(env.value_at(0.5, false), 0.0);
        // Convex attack rises faster than linear.
        assert!(env.value_at(1.25, false) > 0.5);
        assert_eq!(env.value_at(1.75, false), 1.0);
        // Decay covers half the range in 0.5 s, then holds at sustain.
        assert!((env.value_at(2.25, false) - 0.75).abs() < 1e-9);
        assert!((env.value_at(5.0, false) - 0.5).abs() < 1e-9);

        env.start_release(5.0);
        env.recalculate(&g, 1.0, 60);
        // Release takes releaseTime * level = 0.5 s.
        assert!((env.value_at(5.25, false) - 0.25).abs() < 1e-9);
        assert_eq!(env.value_at(6.0, false), 0.0);
        // The ignore-release query still sees the held shape.
        assert!((env.value_at(6.0, true) - 0.5).abs() < 1e-9);
        assert_eq!(env.update(5.25), env.current_value);
    }
}
