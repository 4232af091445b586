use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

/// Forward and inverse transform between one real period of `size` samples
/// and its half spectrum of `size / 2` complex bins.
///
/// Bin `k` holds the cosine part in `re` and the negated sine part in `im`,
/// so that a bin of magnitude `m` produces a partial of amplitude `m`:
/// `x[n] = sum(re[k] * cos(2πkn/N) - im[k] * sin(2πkn/N))`.
#[derive(Clone)]
pub struct FftContext {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    work: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftContext {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            size,
            forward,
            inverse,
            work: vec![Complex32::new(0.0, 0.0); size],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Amount of complex bins in the half spectrum.
    #[inline(always)]
    pub fn bins(&self) -> usize {
        self.size / 2
    }

    pub fn smps2freqs(&mut self, smps: &[f32], freqs: &mut [Complex32]) {
        let n = self.size;
        for (w, s) in self.work.iter_mut().zip(smps.iter()) {
            *w = Complex32::new(*s, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let scale = 2.0 / n as f32;
        for (k, f) in freqs.iter_mut().enumerate().take(n / 2) {
            *f = self.work[k] * scale;
        }
        if let Some(dc) = freqs.first_mut() {
            *dc *= 0.5;
        }
    }

    pub fn freqs2smps(&mut self, freqs: &[Complex32], smps: &mut [f32]) {
        let n = self.size;
        let half = n / 2;

        self.work.fill(Complex32::new(0.0, 0.0));
        for (k, f) in freqs.iter().enumerate().take(half).skip(1) {
            self.work[k] = *f;
            self.work[n - k] = f.conj();
        }
        if let Some(dc) = freqs.first() {
            self.work[0] = Complex32::new(dc.re * 2.0, 0.0);
        }
        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);

        for (s, w) in smps.iter_mut().zip(self.work.iter()) {
            *s = w.re * 0.5;
        }
    }
}

/// Set every bin of the spectrum to zero.
#[inline(always)]
pub fn clear_all(freqs: &mut [Complex32]) {
    freqs.fill(Complex32::new(0.0, 0.0));
}

/// Remove the DC bin.
#[inline(always)]
pub fn clear_dc(freqs: &mut [Complex32]) {
    if let Some(dc) = freqs.first_mut() {
        *dc = Complex32::new(0.0, 0.0);
    }
}

/// Scale the spectrum so that its loudest bin has a magnitude of 1.
pub fn normalize_max(freqs: &mut [Complex32]) {
    let max = freqs.iter().map(|f| f.norm_sqr()).fold(0.0f32, f32::max).sqrt();
    if max < 1e-8 {
        return;
    }
    for f in freqs.iter_mut() {
        *f /= max;
    }
}

/// Scale the non DC bins so that their magnitudes sum to 1.
pub fn normalize_sum(freqs: &mut [Complex32]) {
    let sum: f32 = freqs.iter().skip(1).map(|f| f.norm()).sum();
    if sum < 1e-6 {
        return;
    }
    for f in freqs.iter_mut().skip(1) {
        *f /= sum;
    }
}

/// Scale the non DC bins so that their squared magnitudes sum to 1.
pub fn normalize_rms(freqs: &mut [Complex32]) {
    let sum: f32 = freqs.iter().skip(1).map(|f| f.norm_sqr()).sum();
    if sum < 1e-6 {
        return;
    }
    let gain = 1.0 / sum.sqrt();
    for f in freqs.iter_mut().skip(1) {
        *f *= gain;
    }
}

/// Scale time domain samples to a peak of 1.
pub fn normalize_smps(smps: &mut [f32]) {
    let mut max = smps.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if max < 0.00001 {
        max = 1.0;
    }
    for s in smps.iter_mut() {
        *s /= max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_partial_amplitude() {
        let mut fft = FftContext::new(256);
        let mut freqs = vec![Complex32::new(0.0, 0.0); 128];
        // A sine with amplitude 0.5 on the third harmonic
        freqs[3] = Complex32::new(0.0, -0.5);
        let mut smps = vec![0.0; 256];
        fft.freqs2smps(&freqs, &mut smps);

        for (i, s) in smps.iter().enumerate() {
            let expected = 0.5 * (2.0 * PI * 3.0 * i as f32 / 256.0).sin();
            assert!((s - expected).abs() < 1e-5);
        }

        let mut back = vec![Complex32::new(0.0, 0.0); 128];
        fft.smps2freqs(&smps, &mut back);
        assert!((back[3].im + 0.5).abs() < 1e-5);
        assert!(back[3].re.abs() < 1e-5);
        assert!(back[2].norm() < 1e-5);
    }

    #[test]
    fn test_rms_normalization() {
        let mut freqs = vec![Complex32::new(0.0, 0.0); 16];
        freqs[0] = Complex32::new(4.0, 0.0);
        freqs[1] = Complex32::new(3.0, 0.0);
        freqs[2] = Complex32::new(0.0, 4.0);
        normalize_rms(&mut freqs);
        let sum: f32 = freqs.iter().skip(1).map(|f| f.norm_sqr()).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(freqs[0].re, 4.0);
    }
}
