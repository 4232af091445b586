use rustfft::num_complex::Complex32;

use super::fft::{clear_all, clear_dc};

/// How the harmonics of a waveform follow the played frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdaptiveMode {
    #[default]
    Off,
    /// Stretch or squeeze the spectrum relative to the base frequency.
    On,
    /// Like `On`, then move part of the energy to odd harmonics.
    Square,
    /// Keep part of the energy on every 2nd harmonic only.
    Sub2,
    /// Add part of the energy onto every 2nd harmonic.
    Add2,
    Sub3,
    Add3,
    Sub4,
    Add4,
}

impl AdaptiveMode {
    fn index(&self) -> usize {
        match self {
            AdaptiveMode::Off => 0,
            AdaptiveMode::On => 1,
            AdaptiveMode::Square => 2,
            AdaptiveMode::Sub2 => 3,
            AdaptiveMode::Add2 => 4,
            AdaptiveMode::Sub3 => 5,
            AdaptiveMode::Add3 => 6,
            AdaptiveMode::Sub4 => 7,
            AdaptiveMode::Add4 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdaptiveHarmonics {
    pub mode: AdaptiveMode,
    /// Frequency at which the spectrum is left as is.
    pub base_freq: u8,
    /// How strongly the spectrum follows the frequency, 0 to 200.
    pub power: u8,
    /// Amount of energy moved by the post processing modes, 0 to 100.
    pub par: u8,
}

impl Default for AdaptiveHarmonics {
    fn default() -> Self {
        Self {
            mode: AdaptiveMode::Off,
            base_freq: 128,
            power: 100,
            par: 50,
        }
    }
}

impl AdaptiveHarmonics {
    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.mode != AdaptiveMode::Off
    }

    /// Remap the harmonics of a half spectrum for a note of `freq` Hz.
    /// `scratch` must be as long as `freqs`.
    pub fn apply(&self, freqs: &mut [Complex32], scratch: &mut [Complex32], freq: f32) {
        if !self.is_enabled() {
            return;
        }
        let freq = if freq < 1.0 { 440.0 } else { freq };
        let len = freqs.len();
        if len < 3 {
            return;
        }

        scratch.copy_from_slice(freqs);
        clear_all(freqs);
        clear_dc(scratch);

        let base_freq = 30.0 * 10f32.powf(self.base_freq as f32 / 128.0);
        let power = (self.power as f32 + 1.0) / 101.0;
        let mut rap = (freq / base_freq).powf(power);

        let down = rap > 1.0;
        if down {
            rap = 1.0 / rap;
        }

        let zero = Complex32::new(0.0, 0.0);
        for i in 0..len - 2 {
            let h = i as f32 * rap;
            let high = h as usize;
            let low = h - h.floor();
            if high >= len - 2 {
                break;
            }

            if down {
                freqs[high] += scratch[i] * (1.0 - low);
                freqs[high + 1] += scratch[i] * low;
            } else {
                let mut hc = scratch[high].re * (1.0 - low) + scratch[high + 1].re * low;
                let mut hs = scratch[high].im * (1.0 - low) + scratch[high + 1].im * low;
                if hc.abs() < 0.000001 {
                    hc = 0.0;
                }
                if hs.abs() < 0.000001 {
                    hs = 0.0;
                }
                if i == 0 {
                    hc *= rap;
                    hs *= rap;
                }
                freqs[i] = Complex32::new(hc, hs);
            }
        }

        let dc = freqs[0];
        freqs[1] += dc;
        freqs[0] = zero;
    }

    /// Redistribute part of the energy of the harmonics. `freqs` starts at
    /// the fundamental.
    pub fn post_process(&self, freqs: &mut [Complex32]) {
        let mode = self.mode.index();
        if mode <= 1 {
            return;
        }

        let par = self.par as f32 * 0.01;
        let par = 1.0 - (1.0 - par).max(0.0).powf(1.5);

        let moved: Vec<Complex32> = freqs.iter().map(|f| *f * par).collect();
        for f in freqs.iter_mut() {
            *f *= 1.0 - par;
        }

        if mode == 2 {
            for (i, f) in freqs.iter_mut().enumerate() {
                if i % 2 == 0 {
                    *f += moved[i];
                }
            }
            return;
        }

        let nh = (mode - 3) / 2 + 2;
        let add = (mode - 3) % 2 == 1;
        if add {
            for i in 0..(freqs.len() / nh).saturating_sub(1) {
                freqs[(i + 1) * nh - 1] += moved[i];
            }
        } else {
            for (i, f) in freqs.iter_mut().enumerate() {
                if (i + 1) % nh == 0 {
                    *f += moved[i];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(len: usize) -> Vec<Complex32> {
        let mut freqs = vec![Complex32::new(0.0, 0.0); len];
        freqs[1] = Complex32::new(0.0, -1.0);
        freqs[2] = Complex32::new(0.0, -0.5);
        freqs
    }

    #[test]
    fn test_base_frequency_is_unchanged() {
        let adaptive = AdaptiveHarmonics {
            mode: AdaptiveMode::On,
            ..Default::default()
        };
        let base_freq = 30.0 * 10f32.powf(1.0);
        let mut freqs = spectrum(64);
        let expected = freqs.clone();
        let mut scratch = vec![Complex32::new(0.0, 0.0); 64];
        adaptive.apply(&mut freqs, &mut scratch, base_freq);

        for (a, b) in freqs.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-3);
        }
    }

    #[test]
    fn test_high_notes_compress_the_spectrum() {
        let adaptive = AdaptiveHarmonics {
            mode: AdaptiveMode::On,
            power: 100,
            ..Default::default()
        };
        let base_freq = 30.0 * 10f32.powf(1.0);
        let mut freqs = spectrum(64);
        let mut scratch = vec![Complex32::new(0.0, 0.0); 64];
        adaptive.apply(&mut freqs, &mut scratch, base_freq * 2.0);

        // Harmonic 2 folds down onto the fundamental.
        assert!(freqs[1].norm() > 1.0);
        assert!(freqs[2].norm() < 1e-6);
    }

    #[test]
    fn test_square_moves_energy_to_odd_harmonics() {
        let adaptive = AdaptiveHarmonics {
            mode: AdaptiveMode::Square,
            par: 100,
            ..Default::default()
        };
        let mut freqs = vec![Complex32::new(1.0, 0.0); 4];
        adaptive.post_process(&mut freqs);
        assert!((freqs[0].re - 1.0).abs() < 1e-6);
        assert!(freqs[1].re.abs() < 1e-6);
        assert!((freqs[2].re - 1.0).abs() < 1e-6);
    }
}
