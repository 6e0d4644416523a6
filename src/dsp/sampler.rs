//! Wavetable sample playback.
//!
//! An [`AudioSample`] is a cursor over shared PCM data. It resamples by a
//! fractional step with one of three interpolators and honours the loop
//! modes of the generator model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// `sampleModes` generator values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    NoLoop,
    Loop,
    /// Silent while held, plays from the start once released.
    StartOnRelease,
    /// Loops while held, then plays through to the end.
    LoopUntilRelease,
}

impl LoopMode {
    pub fn from_generator(value: i16) -> Self {
        match value {
            1 => LoopMode::Loop,
            2 => LoopMode::StartOnRelease,
            3 => LoopMode::LoopUntilRelease,
            _ => LoopMode::NoLoop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterpolationType {
    Linear,
    NearestNeighbor,
    #[default]
    Hermite,
}

/// Playback cursor over a sample's PCM data.
#[derive(Debug, Clone)]
pub struct AudioSample {
    data: Arc<[f32]>,
    /// Source samples advanced per output sample.
    pub playback_step: f64,
    pub cursor: f64,
    pub root_key: u8,
    pub loop_start: usize,
    pub loop_end: usize,
    /// One past the last playable sample.
    pub end: usize,
    pub loop_mode: LoopMode,
    pub is_looping: bool,
}

impl AudioSample {
    pub fn new(data: Arc<[f32]>, root_key: u8) -> Self {
        let end = data.len();
        AudioSample {
            data,
            playback_step: 1.0,
            cursor: 0.0,
            root_key,
            loop_start: 0,
            loop_end: end,
            end,
            loop_mode: LoopMode::NoLoop,
            is_looping: false,
        }
    }

    /// Set the playable window and loop, all in samples. Offsets are clamped
    /// into the data, inverted loops are swapped, and a loop shorter than one
    /// sample disables looping.
    pub fn set_bounds(&mut self, start: i64, end: i64, loop_start: i64, loop_end: i64, mode: LoopMode) {
        let last = self.data.len() as i64;
        let clamp = |v: i64| v.clamp(0, last) as usize;
        let (mut ls, mut le) = (clamp(loop_start), clamp(loop_end));
        if ls > le {
            std::mem::swap(&mut ls, &mut le);
        }
        self.cursor = clamp(start) as f64;
        self.end = clamp(end).max(1);
        self.loop_start = ls;
        self.loop_end = le;
        self.loop_mode = mode;
        self.is_looping = matches!(mode, LoopMode::Loop | LoopMode::LoopUntilRelease)
            && self.loop_length() >= 1;
        if !self.is_looping && mode != LoopMode::StartOnRelease {
            self.loop_mode = LoopMode::NoLoop;
        }
    }

    pub fn loop_length(&self) -> usize {
        self.loop_end - self.loop_start
    }

    pub fn data(&self) -> &Arc<[f32]> {
        &self.data
    }

    fn at(&self, index: usize, looping: bool) -> f32 {
        let index = if looping && index >= self.loop_end {
            self.loop_start + (index - self.loop_end) % self.loop_length()
        } else {
            index
        };
        self.data.get(index).copied().unwrap_or(0.0)
    }

    /// Fill `out` with resampled audio. Returns `true` once a non-looping
    /// cursor has run off the end; the remainder of `out` is zeroed.
    pub fn render(&mut self, out: &mut [f32], interpolation: InterpolationType) -> bool {
        let looping = self.is_looping;
        for i in 0..out.len() {
            let floor = self.cursor as usize;
            if !looping && floor.saturating_add(1) >= self.end {
                out[i..].fill(0.0);
                return true;
            }
            let frac = (self.cursor - floor as f64) as f32;
            out[i] = match interpolation {
                InterpolationType::NearestNeighbor => {
                    if frac < 0.5 {
                        self.at(floor, looping)
                    } else {
                        self.at(floor + 1, looping)
                    }
                }
                InterpolationType::Linear => {
                    let lower = self.at(floor, looping);
                    let upper = self.at(floor + 1, looping);
                    lower + (upper - lower) * frac
                }
                InterpolationType::Hermite => {
                    let xm1 = self.at(floor.saturating_sub(1), looping);
                    let x0 = self.at(floor, looping);
                    let x1 = self.at(floor + 1, looping);
                    let x2 = self.at(floor + 2, looping);
                    hermite(xm1, x0, x1, x2, frac)
                }
            };
            self.cursor += self.playback_step;
            if looping && self.cursor >= self.loop_end as f64 {
                let start = self.loop_start as f64;
                self.cursor = start + (self.cursor - start).rem_euclid(self.loop_length() as f64);
            }
        }
        false
    }
}

/// 4-point, 3rd-order Hermite interpolation.
fn hermite(xm1: f32, x0: f32, x1: f32, x2: f32, t: f32) -> f32 {
    let c = (x1 - xm1) * 0.5;
    let v = x0 - x1;
    let w = c + v;
    let a = w + v + (x2 - x0) * 0.5;
    let b = w + a;
    ((a * t - b) * t + c) * t + x0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data: Vec<f32>) -> AudioSample {
        AudioSample::new(data.into(), 60)
    }

    #[test]
    fn linear_interpolation() {
        let mut s = sample(vec![0.0, 1.0, 0.0, -1.0, 0.0]);
        s.playback_step = 0.5;
        let mut out = [0.0f32; 6];
        assert!(!s.render(&mut out, InterpolationType::Linear));
        let expected = [0.0, 0.5, 1.0, 0.5, 0.0, -0.5];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-6, "{out:?}");
        }
    }

    #[test]
    fn hermite_hits_sample_points() {
        let mut s = sample(vec![0.0, 0.3, 0.9, 0.2, -0.4, 0.1]);
        let mut out = [0.0f32; 4];
        s.render(&mut out, InterpolationType::Hermite);
        assert!((out[1] - 0.3).abs() < 1e-6);
        assert!((out[2] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn nearest_neighbor_rounds() {
        let mut s = sample(vec![0.0, 1.0, 2.0, 3.0]);
        s.cursor = 0.6;
        let mut out = [0.0f32; 1];
        s.render(&mut out, InterpolationType::NearestNeighbor);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn non_looping_finishes() {
        let mut s = sample(vec![1.0; 100]);
        let mut out = vec![0.0f32; 128];
        assert!(s.render(&mut out, InterpolationType::Linear));
        assert_eq!(out[98], 1.0);
        assert!(out[99..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn looping_continues_and_wraps() {
        let mut s = sample(vec![0.5; 1000]);
        s.set_bounds(0, 1000, 500, 900, LoopMode::Loop);
        s.playback_step = 2.0;
        let mut out = vec![0.0f32; 4000];
        assert!(!s.render(&mut out, InterpolationType::Hermite));
        assert!(s.cursor >= 500.0 && s.cursor < 900.0);
        assert!(out.iter().all(|&x| (x - 0.5).abs() < 1e-6));
    }

    #[test]
    fn huge_step_wraps_in_one_move() {
        let data: Vec<f32> = (0..256).map(|i| i as f32 / 256.0).collect();
        let mut s = sample(data);
        s.set_bounds(0, 256, 16, 240, LoopMode::Loop);
        s.playback_step = 2f64.powi(60);
        let mut out = [0.0f32; 4];
        assert!(!s.render(&mut out, InterpolationType::Hermite));
        assert!(s.cursor >= 16.0 && s.cursor < 240.0, "cursor {}", s.cursor);

        s.playback_step = 2f64.powi(127);
        s.render(&mut out, InterpolationType::Linear);
        assert!(s.cursor >= 16.0 && s.cursor < 240.0, "cursor {}", s.cursor);
    }

    #[test]
    fn huge_step_without_loop_finishes() {
        let mut s = sample(vec![1.0; 64]);
        s.playback_step = 2f64.powi(100);
        let mut out = [0.0f32; 8];
        assert!(s.render(&mut out, InterpolationType::Hermite));
        assert!(out[1..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn bounds_are_sanitised() {
        let mut s = sample(vec![0.0; 100]);
        s.set_bounds(-5, 500, 80, 20, LoopMode::Loop);
        assert_eq!(s.cursor, 0.0);
        assert_eq!(s.end, 100);
        assert_eq!((s.loop_start, s.loop_end), (20, 80));
        assert!(s.is_looping);

        s.set_bounds(0, 100, 40, 40, LoopMode::Loop);
        assert!(!s.is_looping);
        assert_eq!(s.loop_mode, LoopMode::NoLoop);
    }

    #[test]
    fn octave_up_doubles_speed() {
        let mut s = sample(vec![0.0; 1000]);
        s.playback_step = 2.0;
        let mut out = vec![0.0f32; 100];
        s.render(&mut out, InterpolationType::Linear);
        assert!((s.cursor - 200.0).abs() < 1e-9);
    }

    #[test]
    fn loop_mode_from_generator() {
        assert_eq!(LoopMode::from_generator(0), LoopMode::NoLoop);
        assert_eq!(LoopMode::from_generator(2), LoopMode::StartOnRelease);
        assert_eq!(LoopMode::from_generator(3), LoopMode::LoopUntilRelease);
        assert_eq!(LoopMode::from_generator(7), LoopMode::NoLoop);
    }
}
