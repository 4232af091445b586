use std::collections::TryReserveError;

use crate::{
    config::SynthConfig,
    helpers::{rnd, NoteRng},
};

/// The largest amount of detuned copies a voice can play.
pub const MAX_UNISON: usize = 50;

/// How the phase of each unison copy is flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnisonInvert {
    #[default]
    None,
    Random,
    /// Every n-th copy is inverted, starting with the first.
    Every(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnisonParams {
    /// Amount of copies, 1 to 50. A size of 1 disables unison.
    pub size: u8,
    /// Detune spread, 0 to 127.
    pub freq_spread: u8,
    /// Stereo spread, 0 to 127. 64 spreads the copies evenly across the
    /// stereo field.
    pub stereo_spread: u8,
    /// Depth of the per copy vibrato, 0 to 127.
    pub vibrato: u8,
    pub vibrato_speed: u8,
    pub invert_phase: UnisonInvert,
    /// How far the start positions of the copies are randomized, 0 to 127.
    pub phase_randomness: u8,
}

impl Default for UnisonParams {
    fn default() -> Self {
        Self {
            size: 1,
            freq_spread: 60,
            stereo_spread: 64,
            vibrato: 64,
            vibrato_speed: 64,
            invert_phase: UnisonInvert::None,
            phase_randomness: 127,
        }
    }
}

impl UnisonParams {
    /// Detune spread in cents.
    pub fn spread_cents(&self) -> f32 {
        (self.freq_spread as f32 / 127.0 * 2.0).powi(2) * 50.0
    }

    pub fn size(&self) -> usize {
        (self.size as usize).clamp(1, MAX_UNISON)
    }
}

/// One detuned copy of a voice.
#[derive(Debug, Clone, Copy)]
pub struct SubVoice {
    base_ratio: f32,
    ratio: f32,
    vibrato_pos: f32,
    vibrato_step: f32,
    /// Left and right gains, negative when the phase is inverted.
    pub lvol: f32,
    pub rvol: f32,
}

impl SubVoice {
    /// Frequency multiplier for the current block.
    #[inline(always)]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

/// The set of detuned copies of one voice. The amount of copies is fixed
/// when the voice is created.
#[derive(Debug, Clone)]
pub struct Unison {
    subs: Vec<SubVoice>,
    vibrato_amplitude: f32,
    amplitude: f32,
}

impl Unison {
    pub fn new(
        params: &UnisonParams,
        config: &SynthConfig,
        rng: &mut NoteRng,
    ) -> Result<Self, TryReserveError> {
        let size = params.size();
        let mut subs = Vec::new();
        subs.try_reserve_exact(size)?;

        let spread = params.spread_cents();
        let real_spread = 2f32.powf(spread * 0.5 / 1200.0);
        let vibrato_a = params.vibrato as f32 / 127.0;

        for _ in 0..size {
            subs.push(SubVoice {
                base_ratio: 1.0,
                ratio: 1.0,
                vibrato_pos: 0.0,
                vibrato_step: 0.0,
                lvol: 1.0,
                rvol: 1.0,
            });
        }

        match size {
            1 => {}
            2 => {
                subs[0].base_ratio = 1.0 / real_spread;
                subs[1].base_ratio = real_spread;
            }
            _ => {
                let mut values = [0.0f32; MAX_UNISON];
                let mut min = f32::MAX;
                let mut max = f32::MIN;
                let last = (size - 1) as f32;
                for (k, v) in values.iter_mut().take(size).enumerate() {
                    let step = k as f32 / last * 2.0 - 1.0;
                    *v = step + (rnd(rng) * 2.0 - 1.0) / last;
                    min = min.min(*v);
                    max = max.max(*v);
                }
                let diff = (max - min).max(1e-6);
                for (sub, v) in subs.iter_mut().zip(values.iter()) {
                    let v = (v - (max + min) * 0.5) / diff * 2.0;
                    sub.base_ratio = 2f32.powf(spread * 0.5 * v / 1200.0);
                }
            }
        }

        let mut vibrato_amplitude = 0.0;
        if size > 1 {
            for sub in subs.iter_mut() {
                sub.base_ratio = 1.0 + (sub.base_ratio - 1.0) * (1.0 - vibrato_a);
            }
            vibrato_amplitude = (real_spread - 1.0) * vibrato_a;

            let blocks_per_second = config.sample_rate_f() / config.buffer_size_f();
            let speed = params.vibrato_speed as f32 / 127.0;
            let base_period = 0.25 * 2f32.powf((1.0 - speed) * 4.0);
            for sub in subs.iter_mut() {
                sub.vibrato_pos = rnd(rng) * 1.8 - 0.9;
                let period = base_period * 2f32.powf(rnd(rng) * 2.0 - 1.0);
                let sign = if rnd(rng) < 0.5 { -1.0 } else { 1.0 };
                sub.vibrato_step = sign * 4.0 / (period * blocks_per_second);
            }

            let stereo_spread = params.stereo_spread as f32 / 127.0 * 2.0;
            for (k, sub) in subs.iter_mut().enumerate() {
                let mut pos = k as f32 / (size - 1) as f32 * 2.0 - 1.0;
                if stereo_spread > 1.0 {
                    let edge = if pos >= 0.0 { 1.0 } else { -1.0 };
                    pos = (2.0 - stereo_spread) * pos + (stereo_spread - 1.0) * edge;
                } else {
                    pos *= stereo_spread;
                }
                let panning = (pos + 1.0) * 0.5;
                sub.lvol = ((1.0 - panning) * 2.0).min(1.0);
                sub.rvol = (panning * 2.0).min(1.0);

                let invert = match params.invert_phase {
                    UnisonInvert::None => false,
                    UnisonInvert::Random => rnd(rng) > 0.5,
                    UnisonInvert::Every(n) => k % (n.max(1) as usize) == 0,
                };
                if invert {
                    sub.lvol = -sub.lvol;
                    sub.rvol = -sub.rvol;
                }
            }
        }

        Ok(Self {
            subs,
            vibrato_amplitude,
            amplitude: 1.0 / (size as f32).sqrt(),
        })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn subs(&self) -> &[SubVoice] {
        &self.subs
    }

    /// Gain that keeps large unison sizes at the same loudness.
    #[inline(always)]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Advance the vibrato of every copy by one block. `bandwidth` scales
    /// the detune of the copies.
    pub fn update(&mut self, bandwidth: f32) {
        if self.subs.len() == 1 {
            self.subs[0].ratio = 1.0;
            return;
        }
        for sub in self.subs.iter_mut() {
            let mut pos = sub.vibrato_pos + sub.vibrato_step;
            if pos <= -1.0 {
                pos = -1.0;
                sub.vibrato_step = -sub.vibrato_step;
            }
            if pos >= 1.0 {
                pos = 1.0;
                sub.vibrato_step = -sub.vibrato_step;
            }
            // Softened triangle.
            let vibrato = (pos - pos * pos * pos / 3.0) * 1.5;
            sub.ratio =
                1.0 + ((sub.base_ratio - 1.0) + vibrato * self.vibrato_amplitude) * bandwidth;
            sub.vibrato_pos = pos;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::note_rng;

    fn unison(size: u8, seed: u64) -> Unison {
        let params = UnisonParams {
            size,
            ..Default::default()
        };
        Unison::new(&params, &SynthConfig::default(), &mut note_rng(seed)).unwrap()
    }

    #[test]
    fn test_single_copy_is_exact() {
        let mut u = unison(1, 0);
        for _ in 0..100 {
            u.update(1.0);
            assert_eq!(u.subs()[0].ratio(), 1.0);
        }
        assert_eq!(u.subs()[0].lvol, 1.0);
        assert_eq!(u.amplitude(), 1.0);
    }

    #[test]
    fn test_two_copies_are_symmetric() {
        let params = UnisonParams {
            size: 2,
            vibrato: 0,
            ..Default::default()
        };
        let mut u = Unison::new(&params, &SynthConfig::default(), &mut note_rng(0)).unwrap();
        u.update(1.0);
        let a = u.subs()[0].ratio();
        let b = u.subs()[1].ratio();
        assert!(a < 1.0 && b > 1.0);
        assert!((a * b - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_spread_is_bounded() {
        let params = UnisonParams {
            size: 8,
            ..Default::default()
        };
        let limit = 2f32.powf(params.spread_cents() / 1200.0);
        for seed in 0..10 {
            let mut u = unison(8, seed);
            for _ in 0..500 {
                u.update(1.0);
                for sub in u.subs() {
                    assert!(sub.ratio() <= limit && sub.ratio() >= 1.0 / limit);
                }
            }
        }
    }

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(unison(0, 0).len(), 1);
        assert_eq!(unison(200, 0).len(), MAX_UNISON);
    }

    #[test]
    fn test_stereo_edges() {
        let u = unison(3, 0);
        let subs = u.subs();
        assert_eq!((subs[0].lvol, subs[0].rvol), (1.0, 0.0));
        assert!(subs[1].lvol > 0.99 && subs[1].rvol == 1.0);
        assert_eq!((subs[2].lvol, subs[2].rvol), (0.0, 1.0));
    }

    #[test]
    fn test_phase_inversion() {
        let params = UnisonParams {
            size: 4,
            invert_phase: UnisonInvert::Every(2),
            ..Default::default()
        };
        let u = Unison::new(&params, &SynthConfig::default(), &mut note_rng(0)).unwrap();
        let inverted: Vec<bool> = u.subs().iter().map(|s| s.lvol < 0.0 || s.rvol < 0.0).collect();
        assert_eq!(inverted, vec![true, false, true, false]);
    }
}
