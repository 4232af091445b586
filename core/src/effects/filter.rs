use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::helpers::flush_denormal;

/// Lowest frequency a filter can be tuned to, in Hz.
pub const MIN_FILTER_FREQ: f32 = 0.1;
/// Highest filter frequency, relative to the sample rate.
pub const MAX_FILTER_FREQ_RATIO: f32 = 0.49;
pub const MIN_FILTER_Q: f32 = 0.1;
/// Maximum amount of cascaded stages.
pub const MAX_FILTER_STAGES: usize = 5;

/// Tiny offset mixed into the filter input so that the recursive state
/// decays towards a normal float instead of a denormal one.
const DENORMAL_OFFSET: f32 = 1e-25;

/// The shape the voices depend on when filtering their output.
pub trait Filter: Send + Sync {
    /// Retune the filter, keeping its Q.
    fn set_freq(&mut self, freq: f32);

    fn set_freq_and_q(&mut self, freq: f32, q: f32);

    /// Filter a buffer in place.
    fn filter_out(&mut self, smps: &mut [f32]);

    /// Clear the filter history.
    fn cleanup(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterKind {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
    Peak,
    LowShelf,
    HighShelf,
}

/// Filter settings of a voice or of a note's global section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterParams {
    pub kind: FilterKind,
    /// Cutoff, 64 is 1kHz and every step is 5/64 of an octave.
    pub freq: u8,
    pub q: u8,
    /// Additional cascaded stages.
    pub stages: u8,
    /// How much the cutoff follows the note frequency, 64 is none.
    pub freq_tracking: u8,
    /// Gain of the peak and shelf filters, 64 is 0dB.
    pub gain: u8,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::LowPass,
            freq: 94,
            q: 40,
            stages: 0,
            freq_tracking: 64,
            gain: 64,
        }
    }
}

impl FilterParams {
    /// Cutoff in octaves relative to 1kHz.
    pub fn freq_octaves(&self) -> f32 {
        (self.freq as f32 / 64.0 - 1.0) * 5.0
    }

    pub fn q(&self) -> f32 {
        ((self.q as f32 / 127.0).powi(2) * 1000f32.ln()).exp() - 0.9
    }

    /// Cutoff offset in octaves for a note of `note_freq` Hz.
    pub fn freq_tracking(&self, note_freq: f32) -> f32 {
        (note_freq.max(MIN_FILTER_FREQ) / 440.0).log2() * (self.freq_tracking as f32 - 64.0)
            / 64.0
    }

    pub fn gain_db(&self) -> f32 {
        (self.gain as f32 / 64.0 - 1.0) * 30.0
    }

    pub fn stages(&self) -> usize {
        (self.stages as usize + 1).min(MAX_FILTER_STAGES)
    }

    /// Frequency in Hz of a cutoff expressed in octaves relative to 1kHz.
    #[inline(always)]
    pub fn real_freq(octaves: f32) -> f32 {
        1000.0 * 2f32.powf(octaves)
    }
}

/// Cascaded biquad sections sharing one set of coefficients.
#[derive(Clone)]
pub struct BiquadFilter {
    kind: FilterKind,
    sample_rate: f32,
    freq: f32,
    q: f32,
    gain_db: f32,
    coeffs: Coefficients<f32>,
    stages: Vec<DirectForm2Transposed<f32>>,
}

impl BiquadFilter {
    pub fn new(
        kind: FilterKind,
        sample_rate: f32,
        freq: f32,
        q: f32,
        stages: usize,
        gain_db: f32,
    ) -> Self {
        let stage = DirectForm2Transposed::<f32>::new(Self::passthrough());
        let mut filter = Self {
            kind,
            sample_rate,
            freq: 0.0,
            q: 0.0,
            gain_db,
            coeffs: Self::passthrough(),
            stages: vec![stage; stages.clamp(1, MAX_FILTER_STAGES)],
        };
        filter.freq = filter.clamp_freq(freq);
        filter.q = Self::clamp_q(q);
        filter.update();
        filter
    }

    pub fn from_params(params: &FilterParams, sample_rate: f32) -> Self {
        Self::new(
            params.kind,
            sample_rate,
            FilterParams::real_freq(params.freq_octaves()),
            params.q(),
            params.stages(),
            params.gain_db(),
        )
    }

    pub fn freq(&self) -> f32 {
        self.freq
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    fn passthrough() -> Coefficients<f32> {
        Coefficients {
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
        }
    }

    fn clamp_freq(&self, freq: f32) -> f32 {
        freq.max(MIN_FILTER_FREQ)
            .min(self.sample_rate * MAX_FILTER_FREQ_RATIO)
    }

    fn clamp_q(q: f32) -> f32 {
        q.max(MIN_FILTER_Q)
    }

    fn coefficients(&self) -> Coefficients<f32> {
        // Resonance is spread over the cascade so that more stages don't
        // stack up the peak.
        let q = match self.kind {
            FilterKind::Peak | FilterKind::LowShelf | FilterKind::HighShelf => self.q,
            _ => self.q.powf(1.0 / self.stages.len().max(1) as f32),
        };
        let kind = match self.kind {
            FilterKind::LowPass => Type::LowPass,
            FilterKind::HighPass => Type::HighPass,
            FilterKind::BandPass => Type::BandPass,
            FilterKind::Notch => Type::Notch,
            FilterKind::Peak => Type::PeakingEQ(self.gain_db),
            FilterKind::LowShelf => Type::LowShelf(self.gain_db),
            FilterKind::HighShelf => Type::HighShelf(self.gain_db),
        };
        Coefficients::<f32>::from_params(kind, self.sample_rate.hz(), self.freq.hz(), q)
            .unwrap_or_else(|_| Self::passthrough())
    }

    fn update(&mut self) {
        self.coeffs = self.coefficients();
        for stage in self.stages.iter_mut() {
            stage.update_coefficients(self.coeffs);
        }
    }
}

impl Filter for BiquadFilter {
    fn set_freq(&mut self, freq: f32) {
        let freq = self.clamp_freq(freq);
        if freq != self.freq {
            self.freq = freq;
            self.update();
        }
    }

    fn set_freq_and_q(&mut self, freq: f32, q: f32) {
        let freq = self.clamp_freq(freq);
        let q = Self::clamp_q(q);
        if freq != self.freq || q != self.q {
            self.freq = freq;
            self.q = q;
            self.update();
        }
    }

    fn filter_out(&mut self, smps: &mut [f32]) {
        for s in smps.iter_mut() {
            let mut v = *s + DENORMAL_OFFSET;
            for stage in self.stages.iter_mut() {
                v = stage.run(v);
            }
            *s = flush_denormal(v);
        }
    }

    fn cleanup(&mut self) {
        for stage in self.stages.iter_mut() {
            *stage = DirectForm2Transposed::<f32>::new(self.coeffs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect()
    }

    fn peak(smps: &[f32]) -> f32 {
        smps.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_lowpass_response() {
        let mut filter = BiquadFilter::new(FilterKind::LowPass, 44100.0, 500.0, 0.707, 1, 0.0);

        let mut high = sine(10000.0, 8192);
        filter.filter_out(&mut high);
        assert!(peak(&high[4096..]) < 0.05);

        filter.cleanup();
        let mut low = sine(50.0, 8192);
        filter.filter_out(&mut low);
        assert!(peak(&low[4096..]) > 0.9);
    }

    #[test]
    fn test_stages_steepen_the_slope() {
        let mut one = BiquadFilter::new(FilterKind::LowPass, 44100.0, 1000.0, 0.707, 1, 0.0);
        let mut three = BiquadFilter::new(FilterKind::LowPass, 44100.0, 1000.0, 0.707, 3, 0.0);
        let mut a = sine(6000.0, 4096);
        let mut b = a.clone();
        one.filter_out(&mut a);
        three.filter_out(&mut b);
        assert!(peak(&b[2048..]) < peak(&a[2048..]));
    }

    #[test]
    fn test_bad_values_are_clamped() {
        let mut filter = BiquadFilter::new(FilterKind::BandPass, 44100.0, 1000.0, 1.0, 1, 0.0);
        filter.set_freq_and_q(-50.0, 0.0);
        assert_eq!(filter.freq(), MIN_FILTER_FREQ);
        assert_eq!(filter.q(), MIN_FILTER_Q);

        filter.set_freq(f32::NAN);
        assert_eq!(filter.freq(), MIN_FILTER_FREQ);

        filter.set_freq(1e9);
        assert_eq!(filter.freq(), 44100.0 * MAX_FILTER_FREQ_RATIO);

        let mut smps = sine(440.0, 1024);
        filter.filter_out(&mut smps);
        assert!(smps.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_silence_flushes_to_zero() {
        let mut filter = BiquadFilter::new(FilterKind::LowPass, 44100.0, 500.0, 2.0, 2, 0.0);
        let mut burst = sine(300.0, 256);
        filter.filter_out(&mut burst);

        let mut silence = vec![0.0; 20000];
        filter.filter_out(&mut silence);
        assert_eq!(silence[silence.len() - 1], 0.0);
    }

    #[test]
    fn test_params_center() {
        let params = FilterParams {
            freq: 64,
            ..Default::default()
        };
        assert_eq!(FilterParams::real_freq(params.freq_octaves()), 1000.0);
        assert_eq!(params.freq_tracking(880.0), 0.0);
        assert_eq!(params.gain_db(), 0.0);
        assert_eq!(params.stages(), 1);
    }
}
