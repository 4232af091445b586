use std::f32::consts::PI;

use rand::Rng;

use crate::{
    config::SynthConfig,
    helpers::{note_rng, rnd, NoteRng},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Square,
    RampUp,
    RampDown,
    Exp1,
    Exp2,
    /// Random steps once per cycle, smoothed.
    Random,
}

/// What an LFO modulates, which sets the unit of its output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LfoKind {
    /// Multiplier around 1.
    Amplitude,
    /// Cents.
    #[default]
    Frequency,
    /// Octaves.
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LfoParams {
    pub kind: LfoKind,
    pub shape: LfoShape,
    /// Hz at 440Hz.
    pub freq: f32,
    /// Depth, 0 to 127.
    pub intensity: u8,
    /// 0 picks a random phase per note, 64 is the start of the cycle.
    pub start_phase: u8,
    /// Per cycle depth randomness, 0 to 127.
    pub randomness: u8,
    /// Per cycle rate randomness, 0 to 127.
    pub freq_randomness: u8,
    /// Seconds before the LFO starts.
    pub delay: f32,
    /// Seconds for the depth to reach its full value after the delay.
    pub fade_in: f32,
    /// How the rate follows the note frequency, 64 is not at all.
    pub stretch: u8,
}

/// Converts a raw `0..=127` rate knob to Hz.
pub fn lfo_freq(raw: u8) -> f32 {
    (2f32.powf(raw as f32 / 127.0 * 10.0) - 1.0) / 12.0
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            kind: LfoKind::Frequency,
            shape: LfoShape::Sine,
            freq: lfo_freq(70),
            intensity: 0,
            start_phase: 64,
            randomness: 0,
            freq_randomness: 0,
            delay: 0.0,
            fade_in: 0.0,
            stretch: 64,
        }
    }
}

impl LfoParams {
    fn preset(kind: LfoKind, freq: u8, intensity: u8, start_phase: u8, delay: u8) -> Self {
        Self {
            kind,
            freq: lfo_freq(freq),
            intensity,
            start_phase,
            delay: delay as f32 / 127.0 * 4.0,
            ..Default::default()
        }
    }

    pub fn global_amplitude() -> Self {
        Self::preset(LfoKind::Amplitude, 80, 0, 64, 0)
    }

    pub fn global_frequency() -> Self {
        Self::preset(LfoKind::Frequency, 70, 0, 64, 0)
    }

    pub fn global_filter() -> Self {
        Self::preset(LfoKind::Filter, 80, 0, 64, 0)
    }

    pub fn voice_amplitude() -> Self {
        Self::preset(LfoKind::Amplitude, 90, 32, 64, 30)
    }

    pub fn voice_frequency() -> Self {
        Self::preset(LfoKind::Frequency, 50, 40, 0, 0)
    }

    pub fn voice_filter() -> Self {
        Self::preset(LfoKind::Filter, 50, 20, 64, 0)
    }
}

/// A low frequency oscillator producing one value per block.
#[derive(Debug, Clone)]
pub struct Lfo {
    shape: LfoShape,
    kind: LfoKind,
    x: f32,
    incx: f32,
    intensity: f32,

    randomness: f32,
    amp1: f32,
    amp2: f32,

    freq_randomness: f32,
    incrnd: f32,
    next_incrnd: f32,

    random_target: f32,
    random_value: f32,

    delay: f32,
    fade_in: f32,
    fade: f32,
    block_dt: f32,

    rng: NoteRng,
}

impl Lfo {
    /// Builds the LFO of a note of `base_freq` Hz. The LFO gets its own
    /// random context, seeded from the note's.
    pub fn new(params: &LfoParams, base_freq: f32, config: &SynthConfig, rng: &mut NoteRng) -> Self {
        let mut rng = note_rng(rng.gen());

        let stretch = params.stretch.max(1) as f32;
        let stretch = (base_freq.max(1.0) / 440.0).powf((stretch - 64.0) / 63.0);
        let freq = params.freq.abs() * stretch;
        let incx = (freq * config.dt()).min(0.499_999_99);

        let mut x = if params.start_phase == 0 {
            rnd(&mut rng)
        } else {
            ((params.start_phase as f32 - 64.0) / 127.0 + 1.0).rem_euclid(1.0)
        };

        let depth = params.intensity as f32 / 127.0;
        let intensity = match params.kind {
            LfoKind::Amplitude => depth,
            LfoKind::Filter => depth * 4.0,
            LfoKind::Frequency => {
                x -= 0.25;
                2f32.powf(depth * 11.0) - 1.0
            }
        };
        let x = x.rem_euclid(1.0);

        let randomness = (params.randomness as f32 / 127.0).clamp(0.0, 1.0);
        let amp1 = (1.0 - randomness) + randomness * rnd(&mut rng);
        let amp2 = (1.0 - randomness) + randomness * rnd(&mut rng);

        let mut lfo = Self {
            shape: params.shape,
            kind: params.kind,
            x,
            incx,
            intensity,
            randomness,
            amp1,
            amp2,
            freq_randomness: (params.freq_randomness as f32 / 127.0).powi(2) * 4.0,
            incrnd: 1.0,
            next_incrnd: 1.0,
            random_target: 0.0,
            random_value: 0.0,
            delay: params.delay.max(0.0),
            fade_in: params.fade_in.max(0.0),
            fade: 0.0,
            block_dt: config.dt(),
            rng,
        };

        lfo.random_target = lfo.next_random();
        lfo.random_value = lfo.random_target;
        lfo.compute_next_incrnd();
        lfo.compute_next_incrnd();
        lfo
    }

    fn next_random(&mut self) -> f32 {
        rnd(&mut self.rng) * 2.0 - 1.0
    }

    fn compute_next_incrnd(&mut self) {
        if self.freq_randomness == 0.0 {
            return;
        }
        self.incrnd = self.next_incrnd;
        self.next_incrnd = 0.5f32.powf(self.freq_randomness)
            + rnd(&mut self.rng) * (2f32.powf(self.freq_randomness) - 1.0);
    }

    fn shape_value(&mut self) -> f32 {
        let x = self.x;
        match self.shape {
            LfoShape::Sine => (x * 2.0 * PI).cos(),
            LfoShape::Triangle => {
                if x < 0.25 {
                    4.0 * x
                } else if x < 0.75 {
                    2.0 - 4.0 * x
                } else {
                    4.0 * x - 4.0
                }
            }
            LfoShape::Square => {
                if x < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            LfoShape::RampUp => (x - 0.5) * 2.0,
            LfoShape::RampDown => (0.5 - x) * 2.0,
            LfoShape::Exp1 => 0.05f32.powf(x) * 2.0 - 1.0,
            LfoShape::Exp2 => 0.001f32.powf(x) * 2.0 - 1.0,
            LfoShape::Random => {
                let smoothing = (self.incx * 4.0).min(1.0);
                self.random_value += (self.random_target - self.random_value) * smoothing;
                self.random_value
            }
        }
    }

    /// Raw output for this block, scaled by the depth, in the unit of the
    /// LFO's kind.
    pub fn out(&mut self) -> f32 {
        let mut out = self.shape_value();

        out *= match self.shape {
            LfoShape::Sine | LfoShape::Triangle => {
                self.intensity * (self.amp1 + self.x * (self.amp2 - self.amp1))
            }
            _ => self.intensity * self.amp2,
        };

        if self.delay > 0.000_01 {
            self.delay -= self.block_dt;
            return out * self.fade;
        }

        if self.fade_in > 0.0 {
            self.fade = (self.fade + self.block_dt / self.fade_in).min(1.0);
        } else {
            self.fade = 1.0;
        }
        out *= self.fade;

        let step = if self.freq_randomness == 0.0 {
            self.incx
        } else {
            let t = self.incrnd * (1.0 - self.x) + self.next_incrnd * self.x;
            self.incx * t.clamp(0.0, 1.0)
        };
        self.x += step;

        if self.x >= 1.0 {
            self.x = self.x.rem_euclid(1.0);
            self.amp1 = self.amp2;
            self.amp2 = (1.0 - self.randomness) + self.randomness * rnd(&mut self.rng);
            self.random_target = self.next_random();
            self.compute_next_incrnd();
        }

        out
    }

    /// Output of an amplitude LFO as a multiplier, clamped to `[-1, 1]`.
    pub fn amplitude(&mut self) -> f32 {
        let depth = if self.kind == LfoKind::Amplitude {
            self.intensity
        } else {
            0.0
        };
        (1.0 - depth + self.out()).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::note_rng;

    fn config() -> SynthConfig {
        SynthConfig::new(1000, 10, 256)
    }

    #[test]
    fn test_zero_depth_is_neutral() {
        let mut rng = note_rng(0);
        let mut lfo = Lfo::new(&LfoParams::global_amplitude(), 440.0, &config(), &mut rng);
        for _ in 0..100 {
            assert_eq!(lfo.amplitude(), 1.0);
        }
    }

    #[test]
    fn test_sine_period() {
        let params = LfoParams {
            kind: LfoKind::Filter,
            freq: 10.0,
            intensity: 127,
            ..Default::default()
        };
        let mut lfo = Lfo::new(&params, 440.0, &config(), &mut note_rng(0));
        // 10Hz with 10ms blocks is one cycle every 10 blocks.
        let cycle: Vec<f32> = (0..20).map(|_| lfo.out()).collect();
        for i in 0..10 {
            assert!((cycle[i] - cycle[i + 10]).abs() < 1e-3);
        }
        assert!((cycle[0] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_increment_is_clamped() {
        let params = LfoParams {
            freq: 1000.0,
            ..Default::default()
        };
        let lfo = Lfo::new(&params, 440.0, &config(), &mut note_rng(0));
        assert!(lfo.incx < 0.5);
    }

    #[test]
    fn test_delay_and_fade_in() {
        let params = LfoParams {
            kind: LfoKind::Filter,
            shape: LfoShape::Square,
            intensity: 127,
            delay: 0.05,
            fade_in: 0.1,
            ..Default::default()
        };
        let mut lfo = Lfo::new(&params, 440.0, &config(), &mut note_rng(0));
        for _ in 0..5 {
            assert_eq!(lfo.out(), 0.0);
        }
        let first = lfo.out().abs();
        assert!(first > 0.0 && first < 4.0);
        for _ in 0..20 {
            lfo.out();
        }
        assert!((lfo.out().abs() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_random_shape_is_bounded() {
        let params = LfoParams {
            kind: LfoKind::Amplitude,
            shape: LfoShape::Random,
            freq: 20.0,
            intensity: 127,
            randomness: 127,
            freq_randomness: 127,
            ..Default::default()
        };
        let mut lfo = Lfo::new(&params, 440.0, &config(), &mut note_rng(5));
        for _ in 0..1000 {
            let v = lfo.amplitude();
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
