//! Unit conversions for the generator parameter model.

use std::f32::consts::FRAC_PI_2;

use once_cell::sync::Lazy;

/// Timecents at or below this value mean "instant".
const INSTANT_TIMECENTS: i32 = -32767;

/// Convert timecents to seconds (`2^(tc/1200)`).
pub fn timecents_to_seconds(timecents: i32) -> f64 {
    if timecents <= INSTANT_TIMECENTS {
        return 0.0;
    }
    2f64.powf(timecents as f64 / 1200.0)
}

/// Convert absolute cents (6900 = A440) to Hz.
pub fn abs_cents_to_hz(cents: f64) -> f64 {
    440.0 * 2f64.powf((cents - 6900.0) / 1200.0)
}

/// Linear gain of an attenuation given in decibels.
pub fn db_attenuation_to_gain(db: f32) -> f32 {
    10f32.powf(-db / 20.0)
}

/// Linear gain of an attenuation given in centibels.
pub fn cb_attenuation_to_gain(cb: f32) -> f32 {
    db_attenuation_to_gain(cb / 10.0)
}

/// Linear gain back to attenuation in decibels.
pub fn gain_to_db_attenuation(gain: f32) -> f32 {
    if gain <= 0.0 {
        return f32::INFINITY;
    }
    -20.0 * gain.log10()
}

/// Equal-power pan gains over `-500..=500`, index `pan + 500`.
pub const PAN_RESOLUTION: usize = 1001;

static PAN_TABLE: Lazy<(Vec<f32>, Vec<f32>)> = Lazy::new(|| {
    (0..PAN_RESOLUTION)
        .map(|i| {
            let angle = FRAC_PI_2 * i as f32 / (PAN_RESOLUTION - 1) as f32;
            (angle.cos(), angle.sin())
        })
        .unzip()
});

/// Left and right gain for a pan position in `-500..=500`.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let index = (pan.clamp(-500.0, 500.0) + 500.0) as usize;
    let index = index.min(PAN_RESOLUTION - 1);
    (PAN_TABLE.0[index], PAN_TABLE.1[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecents() {
        assert!((timecents_to_seconds(0) - 1.0).abs() < 1e-12);
        assert!((timecents_to_seconds(1200) - 2.0).abs() < 1e-12);
        assert!((timecents_to_seconds(-1200) - 0.5).abs() < 1e-12);
        assert_eq!(timecents_to_seconds(-32768), 0.0);
    }

    #[test]
    fn cents_to_hz() {
        assert!((abs_cents_to_hz(6900.0) - 440.0).abs() < 1e-9);
        assert!((abs_cents_to_hz(8100.0) - 880.0).abs() < 1e-9);
        // 13500 cents is the open filter, just under 20 kHz
        let hz = abs_cents_to_hz(13500.0);
        assert!(hz > 19000.0 && hz < 20000.0, "{hz}");
    }

    #[test]
    fn decibels() {
        assert!((db_attenuation_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_attenuation_to_gain(20.0) - 0.1).abs() < 1e-6);
        assert!((cb_attenuation_to_gain(200.0) - 0.1).abs() < 1e-6);
        assert!((gain_to_db_attenuation(0.1) - 20.0).abs() < 1e-4);
        assert_eq!(gain_to_db_attenuation(0.0), f32::INFINITY);
    }

    #[test]
    fn pan_is_equal_power() {
        let (l, r) = pan_gains(0.0);
        assert!((l - r).abs() < 1e-2);
        assert!((l * l + r * r - 1.0).abs() < 1e-3);
        let (l, r) = pan_gains(-500.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = pan_gains(900.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }
}
