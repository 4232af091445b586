use rustfft::num_complex::Complex32;

use super::{
    base_functions::PhaseWarp,
    fft::{clear_dc, normalize_max, normalize_smps, FftContext},
    PhaseModulation,
};

/// Magnitude reshaping of a prepared spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpectrumAdjustKind {
    #[default]
    None,
    /// Raise every magnitude to a power.
    Pow,
    /// Drop harmonics quieter than a threshold.
    ThresholdDown,
    /// Boost harmonics by a threshold, saturating at 1.
    ThresholdUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumAdjust {
    pub kind: SpectrumAdjustKind,
    pub par: u8,
}

impl Default for SpectrumAdjust {
    fn default() -> Self {
        Self {
            kind: SpectrumAdjustKind::None,
            par: 64,
        }
    }
}

impl SpectrumAdjust {
    pub fn apply(&self, freqs: &mut [Complex32]) {
        let par = self.par as f32 / 127.0;
        let par = match self.kind {
            SpectrumAdjustKind::None => return,
            SpectrumAdjustKind::Pow => {
                let par = 1.0 - par * 2.0;
                if par >= 0.0 {
                    5f32.powf(par)
                } else {
                    8f32.powf(par)
                }
            }
            SpectrumAdjustKind::ThresholdDown | SpectrumAdjustKind::ThresholdUp => {
                10f32.powf((1.0 - par) * 3.0) * 0.25
            }
        };

        normalize_max(freqs);

        for f in freqs.iter_mut() {
            let (mag, phase) = f.to_polar();
            let mag = match self.kind {
                SpectrumAdjustKind::None => mag,
                SpectrumAdjustKind::Pow => mag.powf(par),
                SpectrumAdjustKind::ThresholdDown => {
                    if mag < par {
                        0.0
                    } else {
                        mag
                    }
                }
                SpectrumAdjustKind::ThresholdUp => (mag / par).min(1.0),
            };
            *f = Complex32::from_polar(mag, phase);
        }
    }
}

/// Rotate the harmonics of a half spectrum by `shift` bins. Positive
/// values move energy to higher harmonics. Bins that are shifted in from
/// outside the spectrum are silent.
pub fn shift_harmonics(freqs: &mut [Complex32], shift: i32) {
    if shift == 0 {
        return;
    }
    let zero = Complex32::new(0.0, 0.0);
    let len = freqs.len();
    if len < 2 {
        return;
    }

    if shift > 0 {
        let shift = shift as usize;
        for i in (0..len - 1).rev() {
            freqs[i + 1] = if i < shift {
                zero
            } else {
                freqs[i - shift + 1]
            };
        }
    } else {
        let shift = shift.unsigned_abs() as usize;
        for i in 0..len - 1 {
            let old = i + shift;
            freqs[i + 1] = if old >= len - 1 {
                zero
            } else {
                let h = freqs[old + 1];
                if h.norm() < 0.000001 {
                    zero
                } else {
                    h
                }
            };
        }
    }

    clear_dc(freqs);
}

/// Taper the top eighth of the spectrum so that time domain processing
/// doesn't fold energy around the Nyquist frequency.
fn taper_top(freqs: &mut [Complex32], size: usize) {
    let eighth = size / 8;
    let half = size / 2;
    for i in 1..eighth {
        freqs[half - i] *= i as f32 / eighth as f32;
    }
}

/// Transform the spectrum to a normalized waveform, let `shape` process it
/// in the time domain, then transform back.
pub(crate) fn process_in_time_domain(
    fft: &mut FftContext,
    freqs: &mut [Complex32],
    smps: &mut [f32],
    shape: impl FnOnce(&mut [f32]),
) {
    clear_dc(freqs);
    taper_top(freqs, fft.size());
    fft.freqs2smps(freqs, smps);
    normalize_smps(smps);
    shape(smps);
    fft.smps2freqs(smps, freqs);
}

/// Warp the phase of the finished waveform by resampling it.
pub(crate) fn oscil_modulation(
    fft: &mut FftContext,
    warp: &PhaseWarp,
    freqs: &mut [Complex32],
    smps: &mut [f32],
) {
    if warp.kind == PhaseModulation::None {
        return;
    }
    let coefficients = warp.oscil_coefficients();
    process_in_time_domain(fft, freqs, smps, |smps| {
        let n = smps.len();
        let input: Vec<f32> = smps.iter().chain(smps.iter().take(2)).copied().collect();
        for (i, s) in smps.iter_mut().enumerate() {
            let t = coefficients.warp(i as f32 / n as f32) * n as f32;
            let poshi = (t as usize).min(n - 1);
            let poslo = t - t.floor();
            *s = input[poshi] * (1.0 - poslo) + input[poshi + 1] * poslo;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_up_and_down() {
        let mut freqs = vec![Complex32::new(0.0, 0.0); 8];
        freqs[1] = Complex32::new(1.0, 0.0);
        shift_harmonics(&mut freqs, 2);
        assert_eq!(freqs[3], Complex32::new(1.0, 0.0));
        assert_eq!(freqs[1], Complex32::new(0.0, 0.0));

        shift_harmonics(&mut freqs, -2);
        assert_eq!(freqs[1], Complex32::new(1.0, 0.0));
        assert_eq!(freqs[3], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_threshold_down_drops_quiet_bins() {
        let mut freqs = vec![Complex32::new(0.0, 0.0); 8];
        freqs[1] = Complex32::new(1.0, 0.0);
        freqs[2] = Complex32::new(0.001, 0.0);
        let adjust = SpectrumAdjust {
            kind: SpectrumAdjustKind::ThresholdDown,
            par: 127,
        };
        adjust.apply(&mut freqs);
        assert_eq!(freqs[2].norm(), 0.0);
        assert!((freqs[1].norm() - 1.0).abs() < 1e-6);
    }
}
