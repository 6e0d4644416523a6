//! Mixer — Sums stereo buses into an interleaved, soft-clipped output.

/// Accumulates stereo audio from the dry output and the effect returns.
#[derive(Debug, Clone)]
pub struct Mixer {
    pub master_gain: f32,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Default for Mixer {
    fn default() -> Self {
        Mixer::new()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Mixer {
            master_gain: 1.0,
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Prepare `num_frames` of silence.
    pub fn clear(&mut self, num_frames: usize) {
        self.left.clear();
        self.left.resize(num_frames, 0.0);
        self.right.clear();
        self.right.resize(num_frames, 0.0);
    }

    /// Add a stereo bus scaled by `gain`. Extra frames are ignored.
    pub fn add(&mut self, left: &[f32], right: &[f32], gain: f32) {
        for (acc, s) in self.left.iter_mut().zip(left) {
            *acc += s * gain;
        }
        for (acc, s) in self.right.iter_mut().zip(right) {
            *acc += s * gain;
        }
    }

    /// Interleaved output with master gain and soft clipping applied.
    pub fn output_interleaved(&self) -> Vec<f32> {
        self.left
            .iter()
            .zip(&self.right)
            .flat_map(|(&l, &r)| [soft_clip(l * self.master_gain), soft_clip(r * self.master_gain)])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        let mut m = Mixer::new();
        m.clear(128);
        let out = m.output_interleaved();
        assert_eq!(out.len(), 256);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn accumulates_buses() {
        let mut m = Mixer::new();
        m.clear(2);
        m.add(&[0.5, 0.0], &[0.0, 1.0], 1.0);
        m.add(&[0.3, 0.0], &[0.0, 0.0], 1.0);
        m.add(&[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0], 0.0);
        let out = m.output_interleaved();
        assert!((out[0] - soft_clip(0.8)).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!((out[3] - soft_clip(1.0)).abs() < 1e-6);
    }

    #[test]
    fn soft_clip_prevents_overflow() {
        let mut m = Mixer::new();
        m.clear(1);
        m.add(&[100.0], &[-100.0], 1.0);
        let out = m.output_interleaved();
        assert!(out.iter().all(|s| s.abs() <= 1.0), "Soft clip should keep output <= 1.0, got {out:?}");
    }
}
