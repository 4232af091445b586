use std::f32::consts::PI;

/// Amount of points of a generated profile.
pub const PROFILE_SIZE: usize = 512;

const SUPERSAMPLE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProfileBase {
    #[default]
    Gauss,
    Square,
    DoubleExp,
}

/// Which part of the profile is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProfileHalf {
    #[default]
    Full,
    Upper,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AmpMultiplier {
    #[default]
    Off,
    Gauss,
    Sine,
    Flat,
}

/// How the amplitude multiplier is combined with the base function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AmpMode {
    #[default]
    Sum,
    Mult,
    Div1,
    Div2,
}

/// The shape every harmonic is widened into. All knobs are `0..=127`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarmonicProfile {
    pub base: ProfileBase,
    pub base_width: u8,
    pub freq_mult: u8,
    pub modulator_stretch: u8,
    pub modulator_freq: u8,
    pub width: u8,
    pub half: ProfileHalf,
    pub amp_multiplier: AmpMultiplier,
    pub amp_mode: AmpMode,
    pub amp_par1: u8,
    pub amp_par2: u8,
    /// Scales the bandwidth by how wide the profile is perceived.
    pub autoscale: bool,
}

impl Default for HarmonicProfile {
    fn default() -> Self {
        Self {
            base: ProfileBase::Gauss,
            base_width: 80,
            freq_mult: 0,
            modulator_stretch: 0,
            modulator_freq: 30,
            width: 127,
            half: ProfileHalf::Full,
            amp_multiplier: AmpMultiplier::Off,
            amp_mode: AmpMode::Sum,
            amp_par1: 80,
            amp_par2: 64,
            autoscale: true,
        }
    }
}

impl HarmonicProfile {
    /// Renders the profile into `out`, normalized to a peak of 1. Returns
    /// the bandwidth adjustment, the share of `out` that is perceived as
    /// sounding.
    pub fn render(&self, out: &mut [f32]) -> f32 {
        out.fill(0.0);
        let size = out.len();
        if size == 0 {
            return 0.5;
        }

        let base_par = 2f32.powf((1.0 - self.base_width as f32 / 127.0) * 12.0);
        let freq_mult = (2f32.powf(self.freq_mult as f32 / 127.0 * 5.0) + 0.000_001).floor();
        let mod_freq = (2f32.powf(self.modulator_freq as f32 / 127.0 * 5.0) + 0.000_001).floor();
        let mod_par = (self.modulator_stretch as f32 / 127.0).powi(4) * 5.0 / mod_freq.sqrt();
        let amp_par1 = 2f32.powf((self.amp_par1 as f32 / 127.0).powi(2) * 10.0) - 0.999;
        let amp_par2 = (1.0 - self.amp_par2 as f32 / 127.0) * 0.998 + 0.001;
        let width = (150.0 / (self.width as f32 + 22.0)).powi(2);

        let total = size * SUPERSAMPLE;
        for i in 0..total {
            let orig_x = i as f32 / total as f32;
            let mut x = (orig_x - 0.5) * width + 0.5;
            let outside = !(0.0..=1.0).contains(&x);
            x = x.clamp(0.0, 1.0);

            x = match self.half {
                ProfileHalf::Full => x,
                ProfileHalf::Upper => x * 0.5 + 0.5,
                ProfileHalf::Lower => x * 0.5,
            };

            let unmultiplied = x;
            x *= freq_mult;
            x += (unmultiplied * PI * mod_freq).sin() * mod_par;
            x = (x + 1000.0).rem_euclid(1.0) * 2.0 - 1.0;

            let f = if outside {
                0.0
            } else {
                match self.base {
                    ProfileBase::Gauss => (-(x * x) * base_par).exp(),
                    ProfileBase::Square => {
                        if (-(x * x) * base_par).exp() < 0.4 {
                            0.0
                        } else {
                            1.0
                        }
                    }
                    ProfileBase::DoubleExp => (-x.abs() * base_par.sqrt()).exp(),
                }
            };

            let ox = orig_x * 2.0 - 1.0;
            let amp = match self.amp_multiplier {
                AmpMultiplier::Off => 1.0,
                AmpMultiplier::Gauss => (-(ox * ox) * 10.0 * amp_par1).exp(),
                AmpMultiplier::Sine => 0.5 * (1.0 + (PI * ox * (amp_par1 * 4.0 + 1.0).sqrt()).cos()),
                AmpMultiplier::Flat => 1.0 / ((ox * (amp_par1 * 2.0 + 0.8)).powi(14) + 1.0),
            };

            let value = if self.amp_multiplier == AmpMultiplier::Off {
                f
            } else {
                let floor = amp_par2.powi(4) * 20.0 + 0.0001;
                match self.amp_mode {
                    AmpMode::Sum => amp * (1.0 - amp_par2) + f * amp_par2,
                    AmpMode::Mult => f * (amp * (1.0 - amp_par2) + amp_par2),
                    AmpMode::Div1 => f / (amp + floor),
                    AmpMode::Div2 => amp / (f + floor),
                }
            };
            out[i / SUPERSAMPLE] += value / SUPERSAMPLE as f32;
        }

        let mut max = 0.0f32;
        for v in out.iter_mut() {
            *v = v.max(0.0);
            max = max.max(*v);
        }
        if max < 0.00001 {
            max = 1.0;
        }
        out.iter_mut().for_each(|v| *v /= max);

        if !self.autoscale {
            return 0.5;
        }

        let mut sum = 0.0;
        let mut i = 0;
        while i + 2 < size / 2 {
            sum += out[i] * out[i] + out[size - i - 1] * out[size - i - 1];
            if sum >= 4.0 {
                break;
            }
            i += 1;
        }
        1.0 - 2.0 * i as f32 / size as f32
    }
}
