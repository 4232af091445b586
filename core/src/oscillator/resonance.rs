use rustfft::num_complex::Complex32;

use crate::helpers::{rnd, NoteRng};

/// Number of points in the resonance curve.
pub const RES_POINTS: usize = 256;

/// A gain curve over log frequency, applied to the harmonics of a waveform
/// based on their absolute frequency rather than their index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resonance {
    pub enabled: bool,
    /// Maximum gain of the curve in dB.
    pub max_db: u8,
    /// Center of the curve, 64 is roughly 1kHz.
    pub center_freq: u8,
    /// Width of the curve in octaves.
    pub octaves_freq: u8,
    /// Keep the fundamental untouched.
    pub protect_fundamental: bool,
    /// The curve, `RES_POINTS` values from 0 to 127.
    pub points: Vec<u8>,
}

impl Default for Resonance {
    fn default() -> Self {
        Self {
            enabled: false,
            max_db: 20,
            center_freq: 64,
            octaves_freq: 64,
            protect_fundamental: false,
            points: vec![64; RES_POINTS],
        }
    }
}

impl Resonance {
    pub fn center_freq(&self) -> f32 {
        10000.0 * 10f32.powf(-(1.0 - self.center_freq as f32 / 127.0) * 2.0)
    }

    pub fn octaves_freq(&self) -> f32 {
        0.25 + 10.0 * self.octaves_freq as f32 / 127.0
    }

    /// Frequency at position `x` in `[0, 1]` of the curve.
    pub fn freq_at(&self, x: f32) -> f32 {
        let octf = 2f32.powf(self.octaves_freq());
        self.center_freq() / octf.sqrt() * octf.powf(x.min(1.0))
    }

    /// Linear gain of the curve at a frequency. The controllers scale the
    /// center and width of the curve.
    pub fn response(&self, freq: f32, ctl_center: f32, ctl_bw: f32) -> f32 {
        let l1 = (self.freq_at(0.0) * ctl_center).ln();
        let l2 = 2f32.ln() * self.octaves_freq() * ctl_bw;
        let max = self.points.iter().copied().max().unwrap_or(0).max(1) as f32;

        let x = ((freq.max(1e-6).ln() - l1) / l2).max(0.0) * RES_POINTS as f32;
        let dx = x - x.floor();
        let kx1 = (x.floor() as usize).min(RES_POINTS - 1);
        let kx2 = (kx1 + 1).min(RES_POINTS - 1);
        let p1 = self.points.get(kx1).copied().unwrap_or(64) as f32;
        let p2 = self.points.get(kx2).copied().unwrap_or(64) as f32;

        let y = (p1 * (1.0 - dx) + p2 * dx) / 127.0 - max / 127.0;
        10f32.powf(y * self.max_db as f32 / 20.0)
    }

    /// Apply the curve to the first `n` harmonics of a half spectrum whose
    /// fundamental is `freq`.
    pub fn apply(
        &self,
        freqs: &mut [Complex32],
        n: usize,
        freq: f32,
        ctl_center: f32,
        ctl_bw: f32,
    ) {
        if !self.enabled {
            return;
        }
        for (i, f) in freqs.iter_mut().enumerate().take(n).skip(1) {
            if self.protect_fundamental && i == 1 {
                continue;
            }
            *f *= self.response(freq * i as f32, ctl_center, ctl_bw);
        }
    }

    /// Low pass the curve in both directions.
    pub fn smooth(&mut self) {
        let mut old = self.points[0] as f32;
        for p in self.points.iter_mut() {
            old = old * 0.4 + *p as f32 * 0.6;
            *p = old as u8;
        }
        let mut old = self.points[RES_POINTS - 1] as f32;
        for p in self.points.iter_mut().skip(1).rev() {
            old = old * 0.4 + *p as f32 * 0.6;
            *p = (old as u8).saturating_add(1).min(127);
        }
    }

    /// Fill the curve with random steps, then smooth it.
    pub fn randomize(&mut self, rng: &mut NoteRng, change_probability: f32) {
        let mut r = (rnd(rng) * 127.0) as u8;
        for p in self.points.iter_mut() {
            *p = r;
            if rnd(rng) < change_probability {
                r = (rnd(rng) * 127.0) as u8;
            }
        }
        self.smooth();
    }

    /// Interpolate between every point that isn't neutral, either linearly
    /// or with a cosine curve.
    pub fn interpolate_peaks(&mut self, cosine: bool) {
        let mut x1 = 0usize;
        let mut y1 = self.points[0] as f32;
        for i in 1..RES_POINTS {
            if self.points[i] != 64 || i + 1 == RES_POINTS {
                let y2 = self.points[i] as f32;
                let span = i - x1;
                for k in 0..span {
                    let mut x = k as f32 / span as f32;
                    if cosine {
                        x = (1.0 - (x * std::f32::consts::PI).cos()) * 0.5;
                    }
                    self.points[x1 + k] = (y1 * (1.0 - x) + y2 * x) as u8;
                }
                x1 = i;
                y1 = y2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::note_rng;

    #[test]
    fn test_flat_curve_is_unity() {
        let res = Resonance {
            enabled: true,
            ..Default::default()
        };
        for freq in [50.0, 440.0, 5000.0] {
            assert!((res.response(freq, 1.0, 1.0) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_protect_fundamental() {
        let mut res = Resonance {
            enabled: true,
            protect_fundamental: true,
            ..Default::default()
        };
        res.points[0] = 127;
        let mut freqs = vec![Complex32::new(1.0, 0.0); 16];
        res.apply(&mut freqs, 16, 100.0, 1.0, 1.0);
        assert_eq!(freqs[1], Complex32::new(1.0, 0.0));
        assert!(freqs[2].norm() < 1.0);
    }

    #[test]
    fn test_randomize_stays_in_range() {
        let mut res = Resonance::default();
        res.randomize(&mut note_rng(3), 0.3);
        assert!(res.points.iter().all(|p| *p <= 127));
    }
}
