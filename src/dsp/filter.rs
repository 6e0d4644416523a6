//! Resonant 2-pole lowpass, one per voice.
//!
//! Coefficients follow the Audio EQ Cookbook (Robert Bristow-Johnson) low-pass
//! with the resonance mapped from centibels. They depend only on
//! `(resonance, floor(cutoff))`, so they are shared through a
//! [`CoefficientCache`] owned by the processor.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::dsp::units::abs_cents_to_hz;

/// Cutoff at or above which a resonance-free filter is bypassed, in cents.
pub const FILTER_OPEN_CENTS: f32 = 13500.0;

/// Cache keys are clamped to these ranges. Above the cutoff bound the
/// 0.45 · sample-rate limit applies anyway.
const MAX_KEY_CUTOFF_CENTS: i32 = 20000;
const MAX_KEY_RESONANCE_CB: i16 = 960;

/// Entries held before the cache starts over.
pub const MAX_CACHED_COEFFICIENTS: usize = 4096;

/// Normalised biquad coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    /// Compute coefficients for a cutoff (absolute cents) and resonance (cB).
    pub fn lowpass(cutoff_cents: i32, resonance_cb: i16, sample_rate: f64) -> Self {
        let cutoff_hz = abs_cents_to_hz(cutoff_cents as f64).min(0.45 * sample_rate);
        let q_db = resonance_cb as f64 / 10.0;
        let resonance_gain = 10f64.powf((q_db - 3.01) / 20.0);
        // Lower the passband by the resonance so the peak sits near unity.
        let q_gain = 1.0 / 10f64.powf(q_db / 20.0).sqrt();

        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * resonance_gain);

        let b1 = (1.0 - cos_w0) * q_gain;
        let b0 = b1 / 2.0;
        let b2 = b0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Coefficients keyed by `(resonance cB, floor(cutoff cents))`.
#[derive(Debug, Clone)]
pub struct CoefficientCache {
    sample_rate: f64,
    entries: HashMap<(i16, i32), Coefficients>,
}

impl CoefficientCache {
    pub fn new(sample_rate: f64) -> Self {
        CoefficientCache {
            sample_rate,
            entries: HashMap::with_capacity(256),
        }
    }

    pub fn get(&mut self, resonance_cb: i16, cutoff_cents: f32) -> Coefficients {
        let key = (
            resonance_cb.clamp(0, MAX_KEY_RESONANCE_CB),
            (cutoff_cents.floor() as i32).clamp(0, MAX_KEY_CUTOFF_CENTS),
        );
        if let Some(&coefficients) = self.entries.get(&key) {
            return coefficients;
        }
        if self.entries.len() >= MAX_CACHED_COEFFICIENTS {
            self.entries.clear();
        }
        let coefficients = Coefficients::lowpass(key.1, key.0, self.sample_rate);
        self.entries.insert(key, coefficients);
        coefficients
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Direct Form II Transposed lowpass with smoothed cutoff tracking.
#[derive(Debug, Clone)]
pub struct LowpassFilter {
    /// Resonance the current coefficients were built for, in cB.
    pub resonance_cb: i16,
    /// Smoothed initial cutoff, in absolute cents.
    pub current_initial_fc: f32,
    last_target_cutoff: f32,
    initialized: bool,
    coefficients: Coefficients,
    z1: f64,
    z2: f64,
}

impl Default for LowpassFilter {
    fn default() -> Self {
        LowpassFilter::new()
    }
}

impl LowpassFilter {
    pub fn new() -> Self {
        LowpassFilter {
            resonance_cb: 0,
            current_initial_fc: FILTER_OPEN_CENTS,
            last_target_cutoff: f32::INFINITY,
            initialized: false,
            coefficients: Coefficients {
                b0: 1.0,
                b1: 0.0,
                b2: 0.0,
                a1: 0.0,
                a2: 0.0,
            },
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Filter `buffer` in place.
    ///
    /// `initial_fc` and `resonance_cb` are the voice's modulated generators;
    /// `fc_excursion` is the LFO/envelope cutoff offset in cents. Only the
    /// initial cutoff is smoothed.
    pub fn apply(
        &mut self,
        buffer: &mut [f32],
        initial_fc: f32,
        resonance_cb: i16,
        fc_excursion: f32,
        smoothing: f32,
        cache: &mut CoefficientCache,
    ) {
        if self.initialized {
            self.current_initial_fc += (initial_fc - self.current_initial_fc) * smoothing;
        } else {
            self.initialized = true;
            self.current_initial_fc = initial_fc;
        }
        let target = self.current_initial_fc + fc_excursion;

        if self.current_initial_fc >= FILTER_OPEN_CENTS - 1.0
            && target >= FILTER_OPEN_CENTS - 1.0
            && resonance_cb == 0
        {
            self.current_initial_fc = FILTER_OPEN_CENTS;
            return;
        }

        if (self.last_target_cutoff - target).abs() > 1.0 || self.resonance_cb != resonance_cb {
            self.last_target_cutoff = target;
            self.resonance_cb = resonance_cb;
            self.coefficients = cache.get(resonance_cb, target);
        }

        for sample in buffer.iter_mut() {
            *sample = self.process(*sample as f64) as f32;
        }
    }

    /// Process a single sample.
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coefficients;
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }

    /// Reset filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    fn sine(freq: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / SR).sin() as f32)
            .collect()
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut cache = CoefficientCache::new(SR);
        let mut f = LowpassFilter::new();
        let mut buf = vec![1.0f32; 2000];
        f.apply(&mut buf, 8000.0, 0, 0.0, 0.1, &mut cache);
        let out = buf[1999];
        assert!((out - 1.0).abs() < 0.001, "Lowpass should pass DC, got {out}");
    }

    #[test]
    fn lowpass_attenuates_high_freq() {
        let mut cache = CoefficientCache::new(SR);
        let mut f = LowpassFilter::new();
        // ~200 Hz cutoff against a 10 kHz sine
        let mut buf = sine(10000.0, 4410);
        f.apply(&mut buf, 4300.0, 0, 0.0, 0.1, &mut cache);
        let max_out = buf[1000..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(max_out < 0.01, "Lowpass should strongly attenuate 10kHz, got {max_out}");
    }

    #[test]
    fn open_filter_is_bypassed() {
        let mut cache = CoefficientCache::new(SR);
        let mut f = LowpassFilter::new();
        let input = sine(15000.0, 256);
        let mut buf = input.clone();
        f.apply(&mut buf, 13500.0, 0, 0.0, 0.1, &mut cache);
        assert_eq!(buf, input);
        assert!(cache.is_empty());
    }

    #[test]
    fn resonance_peaks_near_cutoff() {
        let cutoff_cents = 6900; // 440 Hz
        let flat = Coefficients::lowpass(cutoff_cents, 0, SR);
        let resonant = Coefficients::lowpass(cutoff_cents, 200, SR);
        let peak = |c: Coefficients| {
            let mut f = LowpassFilter::new();
            f.coefficients = c;
            sine(440.0, 8820)
                .iter()
                .skip(4410)
                .map(|&s| f.process(s as f64).abs())
                .fold(0.0, f64::max)
        };
        assert!(peak(resonant) > peak(flat));
    }

    #[test]
    fn coefficients_cached_per_key() {
        let mut cache = CoefficientCache::new(SR);
        let mut a = LowpassFilter::new();
        let mut b = LowpassFilter::new();
        let mut buf = vec![0.5f32; 64];
        a.apply(&mut buf, 7000.2, 10, 0.0, 0.1, &mut cache);
        b.apply(&mut buf, 7000.7, 10, 0.0, 0.1, &mut cache);
        assert_eq!(cache.len(), 1);
        assert_eq!(a.coefficients, b.coefficients);
    }

    #[test]
    fn cache_stays_bounded() {
        let mut cache = CoefficientCache::new(SR);
        for cents in 0..(MAX_CACHED_COEFFICIENTS as i32 + 500) {
            cache.get(0, 1500.0 + cents as f32);
        }
        assert!(cache.len() <= MAX_CACHED_COEFFICIENTS);

        let mut cache = CoefficientCache::new(SR);
        let a = cache.get(i16::MAX, 1.0e9);
        let b = cache.get(MAX_KEY_RESONANCE_CB, MAX_KEY_CUTOFF_CENTS as f32);
        assert_eq!(a, b);
        assert_eq!(cache.get(-50, -300.0), cache.get(0, 0.0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn small_moves_skip_recompute() {
        let mut cache = CoefficientCache::new(SR);
        let mut f = LowpassFilter::new();
        let mut buf = vec![0.0f32; 16];
        f.apply(&mut buf, 7000.0, 0, 0.0, 1.0, &mut cache);
        f.apply(&mut buf, 7000.0, 0, 0.5, 1.0, &mut cache);
        assert_eq!(cache.len(), 1);
        f.apply(&mut buf, 7000.0, 0, 50.0, 1.0, &mut cache);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn filter_output_finite() {
        let mut cache = CoefficientCache::new(SR);
        let mut f = LowpassFilter::new();
        let mut buf: Vec<f32> = (0..10000).map(|i| if i % 100 == 0 { 1.0 } else { 0.0 }).collect();
        f.apply(&mut buf, 9000.0, 960, 0.0, 0.1, &mut cache);
        assert!(buf.iter().all(|s| s.is_finite()));
    }
}
