use rustfft::num_complex::Complex32;

use crate::{
    config::SynthConfig,
    helpers::{note_rng, rnd},
    oscillator::{FftContext, SpectralOscillator},
};

use super::{PadMode, PadParams, PROFILE_SIZE};

/// Samples appended after every table that repeat its start, so the
/// interpolation never has to wrap.
pub const PAD_EXTRA_SAMPLES: usize = 5;

/// Target level of a generated table, as an RMS of a 2^18 sample table.
const TABLE_RMS_SCALE: f32 = 50.0;

/// One long looped sample, rendered for a single base frequency.
#[derive(Debug, Clone)]
pub struct PadTable {
    samples: Vec<f32>,
    base_freq: f32,
}

impl PadTable {
    /// Length of the loop, without the wrap around samples.
    pub fn len(&self) -> usize {
        self.samples.len().saturating_sub(PAD_EXTRA_SAMPLES)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base_freq(&self) -> f32 {
        self.base_freq
    }

    /// The loop followed by the wrap around samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// An immutable set of tables. Banks are only ever replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct PadBank {
    tables: Vec<PadTable>,
    generation: u64,
}

impl PadBank {
    pub fn new(tables: Vec<PadTable>, generation: u64) -> Self {
        Self { tables, generation }
    }

    pub fn tables(&self) -> &[PadTable] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Increases with every generation job, 0 for the empty bank.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Index of the table whose base frequency is nearest in pitch.
    pub fn nearest(&self, log2_freq: f32) -> Option<usize> {
        self.tables
            .iter()
            .map(|t| (log2_freq - (t.base_freq + 0.0001).log2()).abs())
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

/// Scratch space of one generation worker.
pub struct TableGenerator {
    oscillator: SpectralOscillator,
    fft: FftContext,
    harmonics: Vec<f32>,
    spectrum: Vec<f32>,
    freqs: Vec<Complex32>,
}

/// Everything the tables of a bank have in common: the harmonic profile,
/// the prepared oscillator and the table frequencies.
pub struct BankPlan {
    params: PadParams,
    config: SynthConfig,
    profile: Vec<f32>,
    bandwidth_adjust: f32,
    table_freqs: Vec<f32>,
    oscillator: SpectralOscillator,
}

impl BankPlan {
    pub fn new(params: PadParams, config: SynthConfig) -> Self {
        let mut profile = vec![0.0; PROFILE_SIZE];
        let bandwidth_adjust = params.profile.render(&mut profile);
        let mut oscillator = SpectralOscillator::new(&config, params.oscillator.clone());
        oscillator.prepare();
        Self {
            table_freqs: params.quality.table_freqs(),
            params,
            config,
            profile,
            bandwidth_adjust,
            oscillator,
        }
    }

    pub fn table_count(&self) -> usize {
        self.table_freqs.len()
    }

    pub fn table_size(&self) -> usize {
        self.params.quality.table_size()
    }

    pub fn generator(&self) -> TableGenerator {
        let size = self.table_size();
        TableGenerator {
            oscillator: self.oscillator.clone(),
            fft: FftContext::new(size),
            harmonics: vec![0.0; self.config.oscil_size / 2],
            spectrum: vec![0.0; size / 2],
            freqs: vec![Complex32::new(0.0, 0.0); size / 2],
        }
    }

    /// Renders table `index`. Every table has its own phase seed, so the
    /// result does not depend on which worker renders it.
    pub fn render_table(&self, gen: &mut TableGenerator, index: usize) -> PadTable {
        let size = self.table_size();
        let base_freq = self.table_freqs.get(index).copied().unwrap_or(440.0);

        gen.harmonics.fill(0.0);
        gen.oscillator
            .get_spectrum(&mut gen.harmonics, base_freq, None);
        let max = gen.harmonics.iter().copied().fold(0.0f32, f32::max);
        let max = if max < 0.000_001 { 1.0 } else { max };
        gen.harmonics.iter_mut().for_each(|h| *h /= max);

        match self.params.mode {
            PadMode::Bandwidth => self.bandwidth_spectrum(gen, base_freq),
            PadMode::Discrete | PadMode::Continuous => self.discrete_spectrum(gen, base_freq),
        }

        let mut rng = note_rng(index as u64);
        gen.freqs[0] = Complex32::new(0.0, 0.0);
        for (f, s) in gen.freqs.iter_mut().zip(gen.spectrum.iter()).skip(1) {
            *f = Complex32::from_polar(*s, rnd(&mut rng) * 6.29);
        }

        let mut samples = vec![0.0; size + PAD_EXTRA_SAMPLES];
        gen.fft.freqs2smps(&gen.freqs, &mut samples[..size]);

        let rms = samples[..size].iter().map(|s| s * s).sum::<f32>().sqrt();
        let rms = if rms < 0.000_001 { 1.0 } else { rms };
        let gain = TABLE_RMS_SCALE / (rms * (262_144.0 / size as f32).sqrt());
        samples[..size].iter_mut().for_each(|s| *s *= gain);
        for i in 0..PAD_EXTRA_SAMPLES {
            samples[size + i] = samples[i % size];
        }

        PadTable { samples, base_freq }
    }

    /// Widens every harmonic into a copy of the profile, scaled to the
    /// harmonic's bandwidth.
    fn bandwidth_spectrum(&self, gen: &mut TableGenerator, base_freq: f32) {
        let spectrum = &mut gen.spectrum;
        spectrum.fill(0.0);
        let size = spectrum.len();
        let half_rate = self.config.half_sample_rate_f();
        let profile_size = self.profile.len();
        let cents = self.params.bandwidth_cents();
        let power = self.params.bandwidth_scale.power();
        let resonance = &self.params.global.resonance;

        for nh in 1..gen.harmonics.len() {
            let real_freq = self.params.position.ratio(nh) * base_freq;
            if real_freq > half_rate * 0.99998 || real_freq < 20.0 {
                break;
            }
            let mut amp = gen.harmonics[nh - 1];
            if amp < 1e-4 {
                continue;
            }
            if resonance.enabled {
                amp *= resonance.response(real_freq, 1.0, 1.0);
            }

            let bw = (2f32.powf(cents / 1200.0) - 1.0) * base_freq / self.bandwidth_adjust
                * (real_freq / base_freq).powf(power);
            let ibw = (bw / half_rate * size as f32).max(0.0) as usize + 1;

            if ibw > profile_size {
                let rap = (profile_size as f32 / ibw as f32).sqrt();
                let center = (real_freq / half_rate * size as f32) as i64 - ibw as i64 / 2;
                for i in 0..ibw {
                    let src = ((i as f32 * rap * rap) as usize).min(profile_size - 1);
                    let bin = i as i64 + center;
                    if bin < 0 {
                        continue;
                    }
                    let Some(s) = spectrum.get_mut(bin as usize) else {
                        break;
                    };
                    *s += amp * self.profile[src] * rap;
                }
            } else {
                let rap = (ibw as f32 / profile_size as f32).sqrt();
                let center = real_freq / half_rate * size as f32;
                for (i, p) in self.profile.iter().enumerate() {
                    let offset = (i as f32 / profile_size as f32 - 0.5) * ibw as f32;
                    let pos = offset + center;
                    if pos < 1.0 {
                        continue;
                    }
                    let bin = pos as usize;
                    if bin + 1 >= size {
                        break;
                    }
                    let frac = pos.fract();
                    spectrum[bin] += amp * p * rap * (1.0 - frac);
                    spectrum[bin + 1] += amp * p * rap * frac;
                }
            }
        }
    }

    /// One bin per harmonic, optionally interpolated in between.
    fn discrete_spectrum(&self, gen: &mut TableGenerator, base_freq: f32) {
        let spectrum = &mut gen.spectrum;
        spectrum.fill(0.0);
        let size = spectrum.len();
        let half_rate = self.config.half_sample_rate_f();
        let resonance = &self.params.global.resonance;

        for nh in 1..gen.harmonics.len() {
            let real_freq = self.params.position.ratio(nh) * base_freq;
            if real_freq > half_rate * 0.99998 || real_freq < 20.0 {
                break;
            }
            let mut amp = gen.harmonics[nh - 1];
            if resonance.enabled {
                amp *= resonance.response(real_freq, 1.0, 1.0);
            }
            let bin = (real_freq / half_rate * size as f32) as usize;
            if let Some(s) = spectrum.get_mut(bin) {
                *s = amp + 1e-9;
            }
        }

        if self.params.mode != PadMode::Continuous {
            return;
        }
        let mut old = 0;
        for k in 1..size {
            if spectrum[k] > 1e-10 || k == size - 1 {
                let delta = k - old;
                let (v1, v2) = (spectrum[old], spectrum[k]);
                for i in 0..delta {
                    let x = i as f32 / delta as f32;
                    spectrum[old + i] = v1 * (1.0 - x) + v2 * x;
                }
                old = k;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::PadQuality;

    fn small_params(mode: PadMode) -> PadParams {
        PadParams {
            mode,
            quality: PadQuality {
                sample_size: 0,
                base_note: 4,
                octaves: 1,
                samples_per_octave: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_table_level_and_wrap() {
        let plan = BankPlan::new(small_params(PadMode::Bandwidth), SynthConfig::default());
        assert_eq!(plan.table_count(), 2);
        let mut gen = plan.generator();
        let table = plan.render_table(&mut gen, 0);

        assert_eq!(table.len(), 1 << 14);
        let smps = table.samples();
        assert!(smps.iter().all(|s| s.is_finite()));
        for i in 0..PAD_EXTRA_SAMPLES {
            assert_eq!(smps[table.len() + i], smps[i]);
        }
        let rms = (smps[..table.len()].iter().map(|s| s * s).sum::<f32>()
            / table.len() as f32)
            .sqrt();
        assert!((rms - 50.0 / 512.0).abs() < 1e-3);
    }

    #[test]
    fn test_tables_are_reproducible() {
        let plan = BankPlan::new(small_params(PadMode::Bandwidth), SynthConfig::default());
        let a = plan.render_table(&mut plan.generator(), 1);
        let b = plan.render_table(&mut plan.generator(), 1);
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn test_discrete_spectrum_is_sparse() {
        let plan = BankPlan::new(small_params(PadMode::Discrete), SynthConfig::default());
        let mut gen = plan.generator();
        plan.render_table(&mut gen, 0);
        let used = gen.spectrum.iter().filter(|s| **s > 1e-6).count();
        // The default sine has one harmonic.
        assert_eq!(used, 1);

        let plan = BankPlan::new(small_params(PadMode::Continuous), SynthConfig::default());
        let mut gen = plan.generator();
        plan.render_table(&mut gen, 0);
        assert!(gen.spectrum.iter().filter(|s| **s > 1e-6).count() > 1);
    }

    #[test]
    fn test_bandwidth_spreads_harmonic() {
        let plan = BankPlan::new(small_params(PadMode::Bandwidth), SynthConfig::default());
        let mut gen = plan.generator();
        plan.render_table(&mut gen, 0);
        let used = gen.spectrum.iter().filter(|s| **s > 1e-6).count();
        assert!(used > 1);
    }

    #[test]
    fn test_nearest_table() {
        let table = |base_freq| PadTable {
            samples: vec![0.0; 16 + PAD_EXTRA_SAMPLES],
            base_freq,
        };
        let bank = PadBank::new(vec![table(110.0), table(220.0), table(440.0)], 1);
        assert_eq!(bank.nearest(100f32.log2()), Some(0));
        assert_eq!(bank.nearest(300f32.log2()), Some(1));
        assert_eq!(bank.nearest(2000f32.log2()), Some(2));
        assert_eq!(PadBank::default().nearest(8.0), None);
    }
}
