use rustfft::num_complex::Complex32;

use crate::{
    config::SynthConfig,
    helpers::{rnd, NoteRng},
};

mod adaptive;
pub use adaptive::*;

mod adjust;
pub use adjust::*;

mod base_functions;
pub use base_functions::*;

mod fft;
pub use fft::*;

mod harmonics;
pub use harmonics::*;

mod resonance;
pub use resonance::*;

mod spectral_filter;
pub use spectral_filter::*;

mod waveshape;
pub use waveshape::*;

/// How a prepared spectrum is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Normalization {
    /// Harmonic magnitudes sum to 1.
    MagnitudeSum,
    /// Squared harmonic magnitudes sum to 1, before anti-aliasing.
    MagnitudeRms,
    /// Squared harmonic magnitudes sum to 1, computed again for every
    /// generated waveform after anti-aliasing.
    #[default]
    FullRms,
}

/// Random scaling of each harmonic, computed for every generated waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AmpRandomKind {
    #[default]
    None,
    /// Every harmonic gets an independent random power law gain.
    Pow,
    /// Gains follow a sine over the harmonic index with a random frequency.
    Sin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AmpRandomness {
    pub kind: AmpRandomKind,
    pub power: u8,
}

impl Default for AmpRandomness {
    fn default() -> Self {
        Self {
            kind: AmpRandomKind::None,
            power: 64,
        }
    }
}

impl AmpRandomness {
    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.kind != AmpRandomKind::None
    }

    fn apply(&self, freqs: &mut [Complex32], rng: &mut NoteRng) {
        let power = self.power as f32 / 127.0;
        let normalize = 1.0 / (1.2 - power);
        let exponent = 15f32.powf(power * 2.0 - 0.5);
        match self.kind {
            AmpRandomKind::None => {}
            AmpRandomKind::Pow => {
                for f in freqs.iter_mut() {
                    *f *= rnd(rng).powf(exponent) * normalize;
                }
            }
            AmpRandomKind::Sin => {
                let rnd_freq = 2.0 * std::f32::consts::PI * rnd(rng);
                for (i, f) in freqs.iter_mut().enumerate() {
                    let i = (i + 1) as f32;
                    *f *= (i * rnd_freq).sin().abs().powf(exponent * 2.0) * normalize;
                }
            }
        }
    }
}

/// Everything that shapes an oscillator's waveform.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OscillatorParams {
    pub harmonics: HarmonicTable,

    pub base_function: BaseFunction,
    pub base_par: u8,
    pub base_modulation: PhaseWarp,

    pub filter: SpectralFilter,
    /// Apply the spectral filter before the waveshaper instead of after it.
    pub filter_before_waveshape: bool,
    pub waveshape: WaveShape,

    /// Phase warp of the finished waveform.
    pub modulation: PhaseWarp,
    pub spectrum_adjust: SpectrumAdjust,

    /// Amount of bins the harmonics are rotated by, positive shifts up.
    pub harmonic_shift: i32,
    /// Shift the harmonics before any other processing.
    pub harmonic_shift_first: bool,

    pub normalization: Normalization,

    /// Remove the harmonics above the Nyquist frequency of every note.
    pub anti_alias: bool,
    /// Below 64 each note starts at a random position in the waveform,
    /// above 64 the harmonic phases are randomized per note.
    pub rand: u8,
    pub amp_rand: AmpRandomness,
    pub adaptive: AdaptiveHarmonics,
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            harmonics: HarmonicTable::default(),
            base_function: BaseFunction::Sine,
            base_par: 64,
            base_modulation: PhaseWarp::default(),
            filter: SpectralFilter::default(),
            filter_before_waveshape: false,
            waveshape: WaveShape::default(),
            modulation: PhaseWarp::default(),
            spectrum_adjust: SpectrumAdjust::default(),
            harmonic_shift: 0,
            harmonic_shift_first: false,
            normalization: Normalization::FullRms,
            anti_alias: true,
            rand: 64,
            amp_rand: AmpRandomness::default(),
            adaptive: AdaptiveHarmonics::default(),
        }
    }
}

/// Resonance curve and controller state passed to a waveform request.
#[derive(Debug, Clone, Copy)]
pub struct ResonanceInput<'a> {
    pub curve: &'a Resonance,
    pub ctl_center: f32,
    pub ctl_bw: f32,
}

type BaseKey = (BaseFunction, u8, PhaseWarp);

/// Turns a harmonic table into one period of a waveform.
///
/// The spectrum derived from the parameters is cached and only rebuilt
/// after the parameters were accessed mutably. Every waveform request then
/// starts from the cached spectrum and applies the per note processing
/// (anti-aliasing, randomness, adaptive harmonics and resonance).
#[derive(Clone)]
pub struct SpectralOscillator {
    params: OscillatorParams,
    sample_rate: f32,
    fft: FftContext,

    version: u64,
    prepared_version: Option<u64>,

    base_key: Option<BaseKey>,
    base_freqs: Vec<Complex32>,
    freqs: Vec<Complex32>,
    cached_smps: Vec<f32>,

    out_freqs: Vec<Complex32>,
    scratch_freqs: Vec<Complex32>,
    scratch_smps: Vec<f32>,
}

impl SpectralOscillator {
    pub fn new(config: &SynthConfig, params: OscillatorParams) -> Self {
        let size = config.oscil_size;
        let zero = Complex32::new(0.0, 0.0);
        Self {
            params,
            sample_rate: config.sample_rate_f(),
            fft: FftContext::new(size),
            version: 0,
            prepared_version: None,
            base_key: None,
            base_freqs: vec![zero; size / 2],
            freqs: vec![zero; size / 2],
            cached_smps: vec![0.0; size],
            out_freqs: vec![zero; size / 2],
            scratch_freqs: vec![zero; size / 2],
            scratch_smps: vec![0.0; size],
        }
    }

    pub fn params(&self) -> &OscillatorParams {
        &self.params
    }

    /// Mutable access to the parameters. Marks the prepared spectrum as
    /// stale.
    pub fn params_mut(&mut self) -> &mut OscillatorParams {
        self.version = self.version.wrapping_add(1);
        &mut self.params
    }

    /// Length of one waveform period.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.fft.size()
    }

    #[inline(always)]
    pub fn needs_prepare(&self) -> bool {
        self.prepared_version != Some(self.version)
    }

    /// The prepared half spectrum, bin 0 being DC.
    pub fn spectrum(&self) -> &[Complex32] {
        &self.freqs
    }

    /// Rebuild the prepared spectrum if the parameters changed.
    pub fn prepare(&mut self) {
        if !self.needs_prepare() {
            return;
        }

        let half = self.fft.bins();
        self.compose_harmonics();

        if self.params.harmonic_shift_first {
            shift_harmonics(&mut self.freqs, self.params.harmonic_shift);
        }

        if self.params.filter_before_waveshape {
            self.params.filter.apply(&mut self.freqs);
            self.apply_waveshape();
        } else {
            self.apply_waveshape();
            self.params.filter.apply(&mut self.freqs);
        }

        oscil_modulation(
            &mut self.fft,
            &self.params.modulation,
            &mut self.freqs,
            &mut self.scratch_smps,
        );
        self.params.spectrum_adjust.apply(&mut self.freqs);

        if !self.params.harmonic_shift_first {
            shift_harmonics(&mut self.freqs, self.params.harmonic_shift);
        }
        clear_dc(&mut self.freqs);

        match self.params.normalization {
            Normalization::MagnitudeSum => normalize_sum(&mut self.freqs),
            Normalization::MagnitudeRms => normalize_rms(&mut self.freqs),
            Normalization::FullRms => {}
        }

        self.out_freqs[..half].copy_from_slice(&self.freqs[..half]);
        if self.params.normalization == Normalization::FullRms {
            normalize_rms(&mut self.out_freqs);
        }
        self.fft
            .freqs2smps(&self.out_freqs, &mut self.cached_smps);

        self.prepared_version = Some(self.version);
    }

    fn update_base_spectrum(&mut self) {
        let key = (
            self.params.base_function,
            self.params.base_par,
            self.params.base_modulation,
        );
        if self.base_key == Some(key) {
            return;
        }
        render_base_function(key.0, key.1, &key.2, &mut self.scratch_smps);
        self.fft
            .smps2freqs(&self.scratch_smps, &mut self.base_freqs);
        clear_dc(&mut self.base_freqs);
        self.base_key = Some(key);
    }

    fn compose_harmonics(&mut self) {
        let half = self.fft.bins();
        clear_all(&mut self.freqs);

        if self.params.base_function == BaseFunction::Sine {
            let table = &self.params.harmonics;
            for (n, h) in table.iter().take_while(|(n, _)| *n < half) {
                if !h.is_enabled() {
                    continue;
                }
                let mag = table.magnitude(h);
                let phase = table.phase(h);
                self.freqs[n] = Complex32::new(mag * phase.sin(), -mag * phase.cos());
            }
            return;
        }

        self.update_base_spectrum();
        let table = &self.params.harmonics;
        for (n, h) in table.iter() {
            if !h.is_enabled() {
                continue;
            }
            let mag = table.magnitude(h);
            let phase = table.phase(h);
            for i in 1..half {
                let k = i * n;
                if k >= half {
                    break;
                }
                self.freqs[k] += self.base_freqs[i] * Complex32::from_polar(mag, phase * i as f32);
            }
        }
    }

    fn apply_waveshape(&mut self) {
        if self.params.waveshape.kind == WaveShapeKind::None {
            return;
        }
        let waveshape = self.params.waveshape;
        process_in_time_domain(
            &mut self.fft,
            &mut self.freqs,
            &mut self.scratch_smps,
            |smps| waveshape.apply(smps),
        );
    }

    /// Whether a waveform request can be served straight from the cache.
    fn is_static(&self, resonance: bool) -> bool {
        let p = &self.params;
        !p.anti_alias
            && p.rand <= 64
            && !p.amp_rand.is_enabled()
            && !p.adaptive.is_enabled()
            && !resonance
    }

    /// Fill `smps` with one period of the waveform for a note of `freq` Hz
    /// and return the position the note should start playing from.
    pub fn get(
        &mut self,
        smps: &mut [f32],
        freq: f32,
        resonance: Option<ResonanceInput>,
        rng: &mut NoteRng,
    ) -> usize {
        self.prepare();

        let size = self.fft.size();
        let half = self.fft.bins();

        let start = if self.params.rand < 64 {
            let spread = (self.params.rand as f32 - 64.0) / 64.0;
            let pos = ((rnd(rng) * 2.0 - 1.0) * size as f32 * spread) as i64;
            pos.rem_euclid(size as i64) as usize
        } else {
            0
        };

        let resonance = resonance.filter(|r| r.curve.enabled && freq > 0.1);
        if self.is_static(resonance.is_some()) {
            for (s, c) in smps.iter_mut().zip(self.cached_smps.iter()) {
                *s = *c;
            }
            return start;
        }

        let nyquist = if self.params.anti_alias {
            let limit = (0.5 * self.sample_rate / freq.abs()).min(half as f32);
            (limit as usize).saturating_add(2).min(half)
        } else {
            half
        };

        clear_all(&mut self.out_freqs);
        let copy_to = if self.params.adaptive.is_enabled() {
            half
        } else {
            nyquist
        };
        for i in 1..copy_to.saturating_sub(1) {
            self.out_freqs[i] = self.freqs[i];
        }

        if self.params.adaptive.is_enabled() {
            self.params
                .adaptive
                .apply(&mut self.out_freqs, &mut self.scratch_freqs, freq);
            self.params.adaptive.post_process(&mut self.out_freqs[1..]);
            for f in self.out_freqs[nyquist..].iter_mut() {
                *f = Complex32::new(0.0, 0.0);
            }
        }

        let harmonics = 1..nyquist.saturating_sub(1).max(1);
        if self.params.rand > 64 && freq >= 0.0 {
            let amount = std::f32::consts::PI * ((self.params.rand as f32 - 64.0) / 64.0).powi(2);
            for i in harmonics.clone() {
                self.out_freqs[i] *= Complex32::from_polar(1.0, amount * i as f32 * rnd(rng));
            }
        }

        if freq > 0.1 {
            self.params
                .amp_rand
                .apply(&mut self.out_freqs[harmonics.clone()], rng);
        }

        if let Some(res) = resonance {
            res.curve.apply(
                &mut self.out_freqs,
                nyquist.saturating_sub(1),
                freq,
                res.ctl_center,
                res.ctl_bw,
            );
        }

        if self.params.normalization == Normalization::FullRms {
            normalize_rms(&mut self.out_freqs);
        }

        self.fft.freqs2smps(&self.out_freqs, smps);
        start
    }

    /// Harmonic magnitudes for wavetable synthesis, written to `out` starting
    /// from the fundamental. Nothing is removed for anti-aliasing and no
    /// randomness is applied.
    pub fn get_spectrum(&mut self, out: &mut [f32], freq: f32, resonance: Option<ResonanceInput>) {
        self.prepare();
        let half = self.fft.bins();

        clear_all(&mut self.out_freqs);
        for i in 1..half.saturating_sub(1) {
            self.out_freqs[i] = self.freqs[i];
        }

        if self.params.adaptive.is_enabled() {
            self.params
                .adaptive
                .apply(&mut self.out_freqs, &mut self.scratch_freqs, freq);
            self.params.adaptive.post_process(&mut self.out_freqs[1..]);
        }

        if let Some(res) = resonance.filter(|r| r.curve.enabled && freq > 0.1) {
            res.curve.apply(
                &mut self.out_freqs,
                half.saturating_sub(1),
                freq,
                res.ctl_center,
                res.ctl_bw,
            );
        }

        normalize_rms(&mut self.out_freqs);

        for (o, f) in out.iter_mut().zip(self.out_freqs.iter().skip(1)) {
            *o = f.norm();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::helpers::note_rng;

    fn rms(smps: &[f32]) -> f32 {
        (smps.iter().map(|s| s * s).sum::<f32>() / smps.len() as f32).sqrt()
    }

    fn oscillator(params: OscillatorParams) -> SpectralOscillator {
        SpectralOscillator::new(&SynthConfig::default(), params)
    }

    fn rich_table() -> HarmonicTable {
        let mut table = HarmonicTable::silent();
        table.set(1, Harmonic::new(127, 64));
        table.set(3, Harmonic::new(100, 20));
        table.set(4, Harmonic::new(20, 64));
        table.set(9, Harmonic::new(90, 110));
        table
    }

    #[test]
    fn test_pure_sine() {
        let mut osc = oscillator(OscillatorParams::default());
        let mut smps = vec![0.0; osc.size()];
        let start = osc.get(&mut smps, 440.0, None, &mut note_rng(0));
        assert_eq!(start, 0);

        let n = smps.len() as f32;
        for i in [0, 1, 100, 256, 511, 700, 1023] {
            let expected = (2.0 * PI * i as f32 / n).sin();
            assert!((smps[i] - expected).abs() < 1e-4, "{} {}", i, smps[i]);
        }
    }

    #[test]
    fn test_full_rms_normalization() {
        for base_function in [BaseFunction::Sine, BaseFunction::Saw, BaseFunction::Pulse] {
            let mut osc = oscillator(OscillatorParams {
                harmonics: rich_table(),
                base_function,
                ..Default::default()
            });
            let mut smps = vec![0.0; osc.size()];
            osc.get(&mut smps, 110.0, None, &mut note_rng(0));
            assert!((rms(&smps) - 0.5f32.sqrt()).abs() < 1e-3, "{:?}", base_function);

            // Well above the Nyquist limit of most harmonics.
            osc.get(&mut smps, 4000.0, None, &mut note_rng(0));
            assert!((rms(&smps) - 0.5f32.sqrt()).abs() < 1e-3, "{:?}", base_function);
        }
    }

    #[test]
    fn test_magnitude_rms_normalization() {
        let mut osc = oscillator(OscillatorParams {
            harmonics: rich_table(),
            normalization: Normalization::MagnitudeRms,
            anti_alias: false,
            ..Default::default()
        });
        let mut smps = vec![0.0; osc.size()];
        osc.get(&mut smps, 220.0, None, &mut note_rng(0));
        assert!((rms(&smps) - 0.5f32.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_magnitude_sum_normalization() {
        let mut osc = oscillator(OscillatorParams {
            harmonics: rich_table(),
            normalization: Normalization::MagnitudeSum,
            anti_alias: false,
            ..Default::default()
        });
        let mut smps = vec![0.0; osc.size()];
        osc.get(&mut smps, 220.0, None, &mut note_rng(0));

        let mut fft = FftContext::new(smps.len());
        let mut freqs = vec![Complex32::new(0.0, 0.0); fft.bins()];
        fft.smps2freqs(&smps, &mut freqs);
        let sum: f32 = freqs.iter().skip(1).map(|f| f.norm()).sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_neutral_harmonic_changes_nothing() {
        for base_function in [BaseFunction::Sine, BaseFunction::Triangle] {
            let params = OscillatorParams {
                harmonics: rich_table(),
                base_function,
                ..Default::default()
            };
            let mut with_neutral = params.clone();
            with_neutral.harmonics.set(2, Harmonic::new(NEUTRAL, 100));
            with_neutral.harmonics.set(40, Harmonic::new(NEUTRAL, 3));

            let mut a = vec![0.0; 1024];
            let mut b = vec![0.0; 1024];
            oscillator(params).get(&mut a, 300.0, None, &mut note_rng(1));
            oscillator(with_neutral).get(&mut b, 300.0, None, &mut note_rng(1));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let mut osc = oscillator(OscillatorParams {
            harmonics: rich_table(),
            base_function: BaseFunction::Gauss,
            waveshape: WaveShape {
                kind: WaveShapeKind::Arctangent,
                ..Default::default()
            },
            filter: SpectralFilter {
                kind: SpectralFilterKind::LowPass,
                ..Default::default()
            },
            harmonic_shift: 2,
            ..Default::default()
        });
        osc.prepare();
        let first = osc.spectrum().to_vec();
        assert!(!osc.needs_prepare());

        osc.params_mut();
        assert!(osc.needs_prepare());
        osc.prepare();
        assert_eq!(first, osc.spectrum());
    }

    #[test]
    fn test_dc_is_always_zero() {
        let mut osc = oscillator(OscillatorParams {
            base_function: BaseFunction::Diode,
            waveshape: WaveShape {
                kind: WaveShapeKind::UpperLimiter,
                ..Default::default()
            },
            ..Default::default()
        });
        osc.prepare();
        assert_eq!(osc.spectrum()[0], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_nyquist_cut_follows_frequency() {
        let mut harmonics = HarmonicTable::silent();
        for n in 1..=32 {
            harmonics.set(n, Harmonic::new(127, NEUTRAL));
        }
        let mut osc = oscillator(OscillatorParams {
            harmonics,
            ..Default::default()
        });
        let mut smps = vec![0.0; osc.size()];
        osc.get(&mut smps, 5000.0, None, &mut note_rng(0));

        let mut fft = FftContext::new(smps.len());
        let mut freqs = vec![Complex32::new(0.0, 0.0); fft.bins()];
        fft.smps2freqs(&smps, &mut freqs);

        // 0.5 * 44100 / 5000 = 4.41, so harmonics 1 to 4 survive.
        assert!(freqs[1].norm() > 0.1);
        assert!(freqs[4].norm() > 0.01);
        for f in freqs.iter().skip(5) {
            assert!(f.norm() < 1e-4);
        }
    }

    #[test]
    fn test_silent_above_nyquist() {
        let mut osc = oscillator(OscillatorParams::default());
        let mut smps = vec![1.0; osc.size()];
        osc.get(&mut smps, 30000.0, None, &mut note_rng(0));
        assert!(smps.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_block_randomness_offset() {
        let mut osc = oscillator(OscillatorParams {
            rand: 0,
            ..Default::default()
        });
        let mut smps = vec![0.0; osc.size()];
        let mut rng = note_rng(7);
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..32 {
            let start = osc.get(&mut smps, 440.0, None, &mut rng);
            assert!(start < osc.size());
            distinct.insert(start);
        }
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_cached_waveform_without_anti_aliasing() {
        let mut osc = oscillator(OscillatorParams {
            harmonics: rich_table(),
            anti_alias: false,
            ..Default::default()
        });
        let mut low = vec![0.0; osc.size()];
        let mut high = vec![0.0; osc.size()];
        osc.get(&mut low, 50.0, None, &mut note_rng(0));
        osc.get(&mut high, 15000.0, None, &mut note_rng(0));
        assert_eq!(low, high);
    }

    #[test]
    fn test_spectrum_for_wavetables() {
        let mut osc = oscillator(OscillatorParams::default());
        let mut spectrum = vec![0.0; osc.size() / 2 - 1];
        osc.get_spectrum(&mut spectrum, 440.0, None);
        assert!((spectrum[0] - 1.0).abs() < 1e-5);
        assert!(spectrum[1..].iter().all(|m| m.abs() < 1e-6));
    }
}
