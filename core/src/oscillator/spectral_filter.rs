use std::f32::consts::PI;

use rustfft::num_complex::Complex32;

use super::fft::normalize_max;

/// Gain curves over harmonic index, applied to a prepared spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpectralFilterKind {
    #[default]
    None,
    LowPass,
    HighPass1,
    HighPass1b,
    BandPass1,
    BandStop1,
    LowPass2,
    HighPass2,
    BandPass2,
    BandStop2,
    Cos,
    Sin,
    LowShelf,
    /// Boosts a single harmonic.
    S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectralFilter {
    pub kind: SpectralFilterKind,
    pub par1: u8,
    pub par2: u8,
}

impl Default for SpectralFilter {
    fn default() -> Self {
        Self {
            kind: SpectralFilterKind::None,
            par1: 64,
            par2: 64,
        }
    }
}

impl SpectralFilter {
    /// Gain of bin `i`, where `par` and `par2` are the scaled parameters.
    fn gain(kind: SpectralFilterKind, i: u32, par: f32, par2: f32) -> f32 {
        let fi = i as f32;
        match kind {
            SpectralFilterKind::None => 1.0,
            SpectralFilterKind::LowPass => {
                let gain = (1.0 - par * par * par * 0.99).powi(i as i32);
                let tmp = par2 * par2 * par2 * par2 * 0.5 + 0.0001;
                if gain < tmp {
                    gain.powi(10) / tmp.powi(9)
                } else {
                    gain
                }
            }
            SpectralFilterKind::HighPass1 => {
                let gain = 1.0 - (1.0 - par * par).powi(i as i32 + 1);
                gain.powf(par2 * 2.0 + 0.1)
            }
            SpectralFilterKind::HighPass1b => {
                let par = if par < 0.2 { par * 0.25 + 0.15 } else { par };
                let gain = 1.0 - (1.0 - par * par * 0.999 + 0.001).powf(fi * 0.05 * fi + 1.0);
                gain.powf(5f32.powf(par2 * 2.0))
            }
            SpectralFilterKind::BandPass1 => {
                let gain = fi + 1.0 - 2f32.powf((1.0 - par) * 7.5);
                let gain = 1.0 / (1.0 + gain * gain / (fi + 1.0));
                gain.powf(5f32.powf(par2 * 2.0)).max(1e-5)
            }
            SpectralFilterKind::BandStop1 => {
                let gain = fi + 1.0 - 2f32.powf((1.0 - par) * 7.5);
                let gain = ((gain / (fi / 10.0 + 1.0)).atan() / 1.57).powi(6);
                gain.powf(par2 * par2 * 3.9 + 0.1)
            }
            SpectralFilterKind::LowPass2 => {
                let pass = if fi + 1.0 > 2f32.powf((1.0 - par) * 10.0) {
                    0.0
                } else {
                    1.0
                };
                pass * par2 + (1.0 - par2)
            }
            SpectralFilterKind::HighPass2 => {
                if par == 1.0 {
                    return 1.0;
                }
                let pass = if fi + 1.0 > 2f32.powf((1.0 - par) * 7.0) {
                    1.0
                } else {
                    0.0
                };
                pass * par2 + (1.0 - par2)
            }
            SpectralFilterKind::BandPass2 => {
                let width = (i / 2 + 1) as f32;
                let pass = if (2f32.powf((1.0 - par) * 7.0) - fi).abs() > width {
                    0.0
                } else {
                    1.0
                };
                pass * par2 + (1.0 - par2)
            }
            SpectralFilterKind::BandStop2 => {
                let width = (i / 2 + 1) as f32;
                let pass = if (2f32.powf((1.0 - par) * 7.0) - fi).abs() < width {
                    0.0
                } else {
                    1.0
                };
                pass * par2 + (1.0 - par2)
            }
            SpectralFilterKind::Cos | SpectralFilterKind::Sin => {
                let tmp = if ((par2 * 127.0) - 64.0).abs() < 0.01 {
                    fi
                } else {
                    (fi / 32.0).powf(5f32.powf(par2 * 2.0 - 1.0)) * 32.0
                };
                let phase = par * par * PI / 2.0 * tmp;
                let gain = if kind == SpectralFilterKind::Cos {
                    phase.cos()
                } else {
                    phase.sin()
                };
                gain * gain
            }
            SpectralFilterKind::LowShelf => {
                let p2 = 1.0 - par + 0.2;
                let x = (fi / (64.0 * p2 * p2)).clamp(0.0, 1.0);
                let tmp = (1.0 - par2).powi(2);
                (x * PI).cos() * (1.0 - tmp) + 1.01 + tmp
            }
            SpectralFilterKind::S => {
                let target = 2f32.powf((1.0 - par) * 7.2) as u32;
                if i == target {
                    2f32.powf(par2 * par2 * 8.0)
                } else {
                    1.0
                }
            }
        }
    }

    /// Multiply every non DC bin by the filter gain, then renormalize to a
    /// peak magnitude of 1.
    pub fn apply(&self, freqs: &mut [Complex32]) {
        if self.kind == SpectralFilterKind::None {
            return;
        }
        let par = 1.0 - self.par1 as f32 / 128.0;
        let par2 = self.par2 as f32 / 127.0;
        for (i, f) in freqs.iter_mut().enumerate().skip(1) {
            *f *= Self::gain(self.kind, i as u32, par, par2);
        }
        normalize_max(freqs);
    }
}
