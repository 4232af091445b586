use crate::{
    oscillator::OscillatorParams,
    voice::{bend_adjust, offset_hz, GlobalParams},
};

use super::HarmonicProfile;

/// Most sample tables a bank holds.
pub const PAD_MAX_SAMPLES: usize = 64;

/// How the harmonics are spread over the long spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PadMode {
    /// Every harmonic is widened by the harmonic profile.
    #[default]
    Bandwidth,
    /// Every harmonic is a single bin.
    Discrete,
    /// The bins between harmonics are interpolated.
    Continuous,
}

/// How the bandwidth of a harmonic grows with its frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BandwidthScale {
    #[default]
    Normal,
    EqualHz,
    Quarter,
    Half,
    ThreeQuarters,
    OneAndHalf,
    Double,
    InverseHalf,
}

impl BandwidthScale {
    /// Exponent of the harmonic's frequency ratio applied to its bandwidth.
    pub fn power(self) -> f32 {
        match self {
            BandwidthScale::Normal => 1.0,
            BandwidthScale::EqualHz => 0.0,
            BandwidthScale::Quarter => 0.25,
            BandwidthScale::Half => 0.5,
            BandwidthScale::ThreeQuarters => 0.75,
            BandwidthScale::OneAndHalf => 1.5,
            BandwidthScale::Double => 2.0,
            BandwidthScale::InverseHalf => -0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HarmonicPositionKind {
    #[default]
    Harmonic,
    ShiftU,
    ShiftL,
    PowerU,
    PowerL,
    Sine,
    Power,
    Shift,
}

/// Where the overtones sit relative to the fundamental. Parameters are
/// `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarmonicPosition {
    pub kind: HarmonicPositionKind,
    pub par1: u8,
    pub par2: u8,
    /// Pulls the positions towards whole multiples.
    pub par3: u8,
}

impl HarmonicPosition {
    /// Frequency ratio of harmonic `n`, 1 being the fundamental.
    pub fn ratio(&self, n: usize) -> f32 {
        let nf = n as f32;
        let n0 = nf - 1.0;
        let par1 = 10f32.powf(-(1.0 - self.par1 as f32 / 255.0) * 3.0);
        let par2 = self.par2 as f32 / 255.0;
        let thresh = (par2 * par2 * 100.0) as usize + 1;

        let result = match self.kind {
            HarmonicPositionKind::Harmonic => nf,
            HarmonicPositionKind::ShiftU => {
                if n < thresh {
                    nf
                } else {
                    1.0 + n0 + (n0 - thresh as f32 + 1.0) * par1 * 8.0
                }
            }
            HarmonicPositionKind::ShiftL => {
                if n < thresh {
                    nf
                } else {
                    1.0 + n0 - (n0 - thresh as f32 + 1.0) * par1 * 0.9
                }
            }
            HarmonicPositionKind::PowerU => {
                let tmp = par1 * 100.0 + 1.0;
                (n0 / tmp).powf(1.0 - par2 * 0.8) * tmp + 1.0
            }
            HarmonicPositionKind::PowerL => {
                n0 * (1.0 - par1) + (n0 * 0.1).powf(par2 * 3.0 + 1.0) * par1 * 10.0 + 1.0
            }
            HarmonicPositionKind::Sine => {
                n0 + (n0 * par2 * par2 * std::f32::consts::PI * 0.999).sin() * par1.sqrt() * 2.0
                    + 1.0
            }
            HarmonicPositionKind::Power => {
                let tmp = (par2 * 2.0).powi(2) + 0.1;
                n0 * (1.0 + par1 * (n0 * 0.8).powf(tmp)).powf(tmp) + 1.0
            }
            HarmonicPositionKind::Shift => {
                let shift = self.par1 as f32 / 255.0;
                (nf + shift) / (shift + 1.0)
            }
        };

        let par3 = self.par3 as f32 / 255.0;
        let whole = (result + 0.5).floor();
        whole + (1.0 - par3) * (result - whole)
    }
}

/// Size and pitch coverage of the generated sample tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PadQuality {
    /// Table length is `2^(sample_size + 14)`, 0 to 6.
    pub sample_size: u8,
    /// Lowest table pitch, counted in half octaves from C2.
    pub base_note: u8,
    /// Amount of octaves covered, minus one.
    pub octaves: u8,
    /// Tables per octave. 0 is one table every two octaves, 5 is six and 6
    /// is twelve.
    pub samples_per_octave: u8,
}

impl Default for PadQuality {
    fn default() -> Self {
        Self {
            sample_size: 3,
            base_note: 4,
            octaves: 3,
            samples_per_octave: 2,
        }
    }
}

impl PadQuality {
    pub fn table_size(&self) -> usize {
        1 << (self.sample_size.min(6) as usize + 14)
    }

    /// Frequency of the lowest table.
    pub fn base_freq(&self) -> f32 {
        let freq = 65.406 * 2f32.powi(self.base_note as i32 / 2);
        if self.base_note % 2 == 1 {
            freq * 1.5
        } else {
            freq
        }
    }

    pub fn table_count(&self) -> usize {
        let octaves = self.octaves as usize + 1;
        let per_octave = match self.samples_per_octave {
            5 => 6,
            6 => 12,
            n => n as usize,
        };
        let count = if per_octave == 0 {
            octaves / 2 + 1
        } else {
            octaves * per_octave
        };
        count.clamp(1, PAD_MAX_SAMPLES)
    }

    /// Base frequency of every table, spread evenly in pitch and centered
    /// on the covered range.
    pub fn table_freqs(&self) -> Vec<f32> {
        let count = self.table_count();
        let octaves = self.octaves as f32 + 1.0;
        let adj = |n: usize| octaves * n as f32 / count as f32;
        let center = adj(count - 1) * 0.5;
        (0..count)
            .map(|n| self.base_freq() * 2f32.powf(adj(n) - center))
            .collect()
    }
}

/// A wavetable instrument: long tables with widened harmonics, played back
/// by notes that share the global section of the additive instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PadParams {
    pub mode: PadMode,
    pub profile: HarmonicProfile,
    /// 0 to 1000.
    pub bandwidth: u16,
    pub bandwidth_scale: BandwidthScale,
    pub position: HarmonicPosition,
    pub quality: PadQuality,
    pub oscillator: OscillatorParams,

    pub stereo: bool,
    pub fixed_freq: bool,
    pub fixed_freq_et: u8,
    pub bend_adjust: u8,
    pub offset_hz: u8,

    pub global: GlobalParams,
}

impl Default for PadParams {
    fn default() -> Self {
        Self {
            mode: PadMode::Bandwidth,
            profile: HarmonicProfile::default(),
            bandwidth: 500,
            bandwidth_scale: BandwidthScale::Normal,
            position: HarmonicPosition::default(),
            quality: PadQuality::default(),
            oscillator: OscillatorParams::default(),
            stereo: true,
            fixed_freq: false,
            fixed_freq_et: 0,
            bend_adjust: 88,
            offset_hz: 64,
            global: GlobalParams::default(),
        }
    }
}

impl PadParams {
    /// Bandwidth of every harmonic in cents.
    pub fn bandwidth_cents(&self) -> f32 {
        let x = (self.bandwidth.min(1000) as f32 / 1000.0).powf(1.1);
        10f32.powf(x * 4.0) * 0.25
    }

    pub fn bend_adjust(&self) -> f32 {
        bend_adjust(self.bend_adjust)
    }

    pub fn offset_hz(&self) -> f32 {
        offset_hz(self.offset_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quality() {
        let quality = PadQuality::default();
        assert_eq!(quality.table_size(), 1 << 17);
        assert_eq!(quality.table_count(), 8);
        let freqs = quality.table_freqs();
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));
        // Centered on the base frequency.
        let mid = (freqs[0] * freqs[freqs.len() - 1]).sqrt();
        assert!((mid / quality.base_freq() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_table_count_edges() {
        let quality = PadQuality {
            samples_per_octave: 0,
            octaves: 0,
            ..Default::default()
        };
        assert_eq!(quality.table_count(), 1);
        let quality = PadQuality {
            samples_per_octave: 6,
            octaves: 7,
            ..Default::default()
        };
        assert_eq!(quality.table_count(), PAD_MAX_SAMPLES);
    }

    #[test]
    fn test_harmonic_positions() {
        let harmonic = HarmonicPosition::default();
        for n in 1..10 {
            assert_eq!(harmonic.ratio(n), n as f32);
        }
        let mut shifted = HarmonicPosition {
            kind: HarmonicPositionKind::ShiftU,
            par1: 128,
            ..Default::default()
        };
        assert_eq!(shifted.ratio(1), 1.0);
        assert!(shifted.ratio(4) > 4.0);
        assert!(shifted.ratio(4).fract() != 0.0);

        // par3 at 255 snaps to the nearest whole multiple.
        shifted.par3 = 255;
        assert_eq!(shifted.ratio(4).fract(), 0.0);
    }

    #[test]
    fn test_bandwidth_cents() {
        let mut params = PadParams {
            bandwidth: 0,
            ..Default::default()
        };
        assert!((params.bandwidth_cents() - 0.25).abs() < 1e-6);
        params.bandwidth = 1000;
        assert!((params.bandwidth_cents() - 2500.0).abs() < 1e-1);
    }
}
