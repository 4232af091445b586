use crate::{
    config::SynthConfig,
    effects::{BiquadFilter, Filter, FilterParams},
    helpers::NoteRng,
};

use super::{EnvelopeGenerator, EnvelopeParams, Lfo, LfoParams};

/// A stereo filter whose cutoff follows the note, the velocity, an
/// envelope, an LFO and the controllers.
pub struct ModulatedFilter {
    params: FilterParams,
    left: BiquadFilter,
    right: BiquadFilter,
    tracking: f32,
    sense: f32,
    envelope: Option<EnvelopeGenerator>,
    lfo: Option<Lfo>,
}

impl ModulatedFilter {
    pub fn new(
        params: &FilterParams,
        envelope: Option<&EnvelopeParams>,
        lfo: Option<&LfoParams>,
        note_freq: f32,
        config: &SynthConfig,
        rng: &mut NoteRng,
    ) -> Self {
        let filter = BiquadFilter::from_params(params, config.sample_rate_f());
        Self {
            params: *params,
            right: filter.clone(),
            left: filter,
            tracking: params.freq_tracking(note_freq),
            sense: 0.0,
            envelope: envelope.map(|e| EnvelopeGenerator::new(e, note_freq, config)),
            lfo: lfo.map(|l| Lfo::new(l, note_freq, config, rng)),
        }
    }

    pub fn update_note_freq(&mut self, note_freq: f32) {
        self.tracking = self.params.freq_tracking(note_freq);
    }

    /// Sets the velocity dependent cutoff offset, in octaves.
    pub fn update_sense(&mut self, octaves: f32) {
        self.sense = octaves;
    }

    pub fn release_key(&mut self) {
        if let Some(envelope) = self.envelope.as_mut() {
            envelope.release_key();
        }
    }

    /// Retunes the filter for this block. `relfreq` is a cutoff offset in
    /// octaves and `relq` a Q multiplier.
    pub fn update(&mut self, relfreq: f32, relq: f32) {
        let env = self.envelope.as_mut().map(|e| e.envout()).unwrap_or(0.0);
        let lfo = self.lfo.as_mut().map(|l| l.out()).unwrap_or(0.0);
        let octaves = self.params.freq_octaves() + self.sense + env + lfo + relfreq + self.tracking;
        let freq = FilterParams::real_freq(octaves);
        let q = self.params.q() * relq;
        self.left.set_freq_and_q(freq, q);
        self.right.set_freq_and_q(freq, q);
    }

    /// Filters one or both channels in place.
    pub fn filter(&mut self, left: &mut [f32], right: Option<&mut [f32]>) {
        self.left.filter_out(left);
        if let Some(right) = right {
            self.right.filter_out(right);
        }
    }

    pub fn freq(&self) -> f32 {
        self.left.freq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::note_rng;

    #[test]
    fn test_cutoff_follows_controllers() {
        let config = SynthConfig::default();
        let params = FilterParams {
            freq: 64,
            ..Default::default()
        };
        let mut filter = ModulatedFilter::new(&params, None, None, 440.0, &config, &mut note_rng(0));
        filter.update(0.0, 1.0);
        assert!((filter.freq() - 1000.0).abs() < 1e-2);
        filter.update(1.0, 1.0);
        assert!((filter.freq() - 2000.0).abs() < 1e-1);
        filter.update_sense(-1.0);
        filter.update(0.0, 1.0);
        assert!((filter.freq() - 500.0).abs() < 1e-2);
    }

    #[test]
    fn test_envelope_moves_cutoff() {
        let config = SynthConfig::default();
        let params = FilterParams {
            freq: 64,
            ..Default::default()
        };
        let envelope = EnvelopeParams::global_filter();
        let mut filter =
            ModulatedFilter::new(&params, Some(&envelope), None, 440.0, &config, &mut note_rng(0));
        let mut freqs = Vec::new();
        for _ in 0..200 {
            filter.update(0.0, 1.0);
            freqs.push(filter.freq());
        }
        assert!(freqs.iter().all(|f| f.is_finite() && *f > 0.0));
    }
}
