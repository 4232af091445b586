use std::sync::Arc;

use crate::{
    config::SynthConfig,
    controller::{Controller, Portamento},
    helpers::{
        above_amplitude_threshold, fade_out, interpolate_amplitude, note_rng, try_zeroed_vec,
        velocity_scale, NoteRng,
    },
    oscillator::{ResonanceInput, SpectralOscillator},
};

use super::{
    panning, AdditiveParams, BlockContext, EnvelopeGenerator, GlobalParams, Legato, Lfo,
    ModulatedFilter, ModulatorSource, NoteError, NoteTrigger, ReleaseType, SynthNote, VoiceEngine,
    VoiceInit, VoiceMix, MAX_VOICES,
};

/// A short volume boost at the start of a note.
pub(crate) struct Punch {
    initial: f32,
    t: f32,
    dt: f32,
}

impl Punch {
    pub(crate) fn new(
        global: &GlobalParams,
        freq: f32,
        velocity: f32,
        config: &SynthConfig,
    ) -> Option<Self> {
        if global.punch_strength == 0 {
            return None;
        }
        let initial = (10f32.powf(1.5 * global.punch_strength as f32 / 127.0) - 1.0)
            * velocity_scale(velocity, global.punch_velocity_sense);
        // 0.1ms to 100ms
        let time = 10f32.powf(3.0 * global.punch_time as f32 / 127.0) / 10000.0;
        let stretch = (440.0 / freq.max(1.0)).powf(global.punch_stretch as f32 / 64.0);
        Some(Self {
            initial,
            t: 1.0,
            dt: 1.0 / (time * config.sample_rate_f() * stretch),
        })
    }

    /// Applies the punch to a block, returns false once it has ended.
    pub(crate) fn apply(&mut self, left: &mut [f32], right: &mut [f32]) -> bool {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let amp = self.initial * self.t + 1.0;
            *l *= amp;
            *r *= amp;
            self.t -= self.dt;
            if self.t < 0.0 {
                return false;
            }
        }
        true
    }
}

struct VoiceOscillators {
    carrier: SpectralOscillator,
    modulator: Option<SpectralOscillator>,
}

/// An additive instrument: the parameters and the oscillators that render
/// their waveforms. Notes take a snapshot of both when they start.
pub struct AdditiveSynth {
    params: Arc<AdditiveParams>,
    config: SynthConfig,
    oscillators: Vec<VoiceOscillators>,
}

impl AdditiveSynth {
    pub fn new(config: SynthConfig, params: AdditiveParams) -> Self {
        let mut synth = Self {
            params: Arc::new(AdditiveParams::default()),
            config,
            oscillators: Vec::new(),
        };
        synth.set_params(params);
        synth
    }

    pub fn params(&self) -> &AdditiveParams {
        &self.params
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Replaces the parameters and prepares every oscillator. Running notes
    /// keep the parameters they started with.
    pub fn set_params(&mut self, mut params: AdditiveParams) {
        params.sanitize();
        self.oscillators = params
            .voices
            .iter()
            .map(|voice| {
                let mut carrier = SpectralOscillator::new(&self.config, voice.oscillator.clone());
                carrier.prepare();
                let modulator = voice
                    .modulation
                    .params()
                    .filter(|m| m.source == ModulatorSource::Oscillator)
                    .map(|m| {
                        let mut osc = SpectralOscillator::new(&self.config, m.oscillator.clone());
                        osc.prepare();
                        osc
                    });
                VoiceOscillators { carrier, modulator }
            })
            .collect();
        self.params = Arc::new(params);
    }

    /// Starts a note. A silent note is the quiet half of a legato pair.
    pub fn note(
        &mut self,
        ctl: &Controller,
        trigger: NoteTrigger,
        silent: bool,
    ) -> Result<AdditiveNote, NoteError> {
        AdditiveNote::new(self, ctl, trigger, silent)
    }
}

/// A note of an additive instrument. Sums the voices, then applies the
/// global filter, amplitude, punch and legato transitions.
pub struct AdditiveNote {
    params: Arc<AdditiveParams>,
    config: SynthConfig,
    voices: Vec<Option<VoiceEngine>>,

    trigger: NoteTrigger,
    stereo: bool,
    volume: f32,
    panning: f32,
    detune: f32,
    bandwidth_multiplier: f32,

    amp_envelope: EnvelopeGenerator,
    amp_lfo: Lfo,
    freq_envelope: EnvelopeGenerator,
    freq_lfo: Lfo,
    filter: ModulatedFilter,
    filter_cutoff: f32,
    punch: Option<Punch>,
    legato: Legato,

    old_amplitude: f32,
    new_amplitude: f32,

    bypass_left: Vec<f32>,
    bypass_right: Vec<f32>,
    zeros: Vec<f32>,

    releasing: bool,
    finished: bool,
}

impl AdditiveNote {
    fn new(
        synth: &mut AdditiveSynth,
        ctl: &Controller,
        trigger: NoteTrigger,
        silent: bool,
    ) -> Result<Self, NoteError> {
        let params = Arc::clone(&synth.params);
        let config = synth.config;
        let global = &params.global;

        if params.enabled_voices() == 0 {
            return Err(NoteError::NoVoices);
        }

        let mut rng: NoteRng = note_rng(trigger.seed);
        let velocity = trigger.velocity.clamp(0.0, 1.0);
        let freq = 2f32.powf(trigger.log2_freq);

        let bypass_left = try_zeroed_vec(config.buffer_size)?;
        let bypass_right = try_zeroed_vec(config.buffer_size)?;
        let zeros = try_zeroed_vec(config.buffer_size)?;
        let mut voices = Vec::new();
        voices.try_reserve_exact(params.voices.len())?;

        let resonance = ResonanceInput {
            curve: &global.resonance,
            ctl_center: ctl.resonance_center(),
            ctl_bw: ctl.resonance_bandwidth(),
        };
        let resonance = Some(resonance).filter(|r| r.curve.enabled);

        let mut failed = None;
        for (slot, (voice, osc)) in params
            .voices
            .iter()
            .zip(synth.oscillators.iter_mut())
            .enumerate()
        {
            if !voice.enabled || failed.is_some() {
                voices.push(None);
                continue;
            }
            let init = VoiceInit {
                params: voice,
                global,
                config: &config,
                carrier: &mut osc.carrier,
                modulator: osc.modulator.as_mut(),
                resonance,
                note_log2_freq: trigger.log2_freq,
                velocity,
            };
            match VoiceEngine::new(init, &mut rng) {
                Ok(engine) => voices.push(Some(engine)),
                Err(err) => {
                    log::warn!("Dropping voices from voice {} of a note: {}", slot, err);
                    failed = Some(err);
                    voices.push(None);
                }
            }
        }
        if voices.iter().all(|v| v.is_none()) {
            if let Some(err) = failed {
                return Err(NoteError::Alloc(err));
            }
        }

        let mut filter = ModulatedFilter::new(
            &global.filter,
            Some(&global.filter_envelope),
            Some(&global.filter_lfo),
            freq,
            &config,
            &mut rng,
        );
        filter.update_sense(global.filter_velocity_offset(velocity));

        let mut amp_envelope = EnvelopeGenerator::new(&global.amp_envelope, freq, &config);
        let mut amp_lfo = Lfo::new(&global.amp_lfo, freq, &config, &mut rng);
        let volume = global.volume(velocity);
        let new_amplitude = volume * amp_envelope.envout_db() * amp_lfo.amplitude();

        Ok(Self {
            config,
            voices,
            trigger: NoteTrigger {
                velocity,
                ..trigger
            },
            stereo: global.stereo,
            volume,
            panning: panning(global.panning, &mut rng),
            detune: global.detune.cents(global.detune_type),
            bandwidth_multiplier: global.bandwidth_multiplier(),
            amp_envelope,
            amp_lfo,
            freq_envelope: EnvelopeGenerator::new(&global.freq_envelope, freq, &config),
            freq_lfo: Lfo::new(&global.freq_lfo, freq, &config, &mut rng),
            filter,
            filter_cutoff: 0.0,
            punch: Punch::new(global, freq, velocity, &config),
            legato: Legato::new(&config, trigger, silent),
            old_amplitude: new_amplitude,
            new_amplitude,
            bypass_left,
            bypass_right,
            zeros,
            releasing: false,
            finished: false,
            params,
        })
    }

    /// Amount of voices still sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }

    pub fn trigger(&self) -> NoteTrigger {
        self.trigger
    }

    /// Applies a new pitch and velocity to everything that depends on
    /// them, keeping envelopes and phases running.
    fn retrigger(&mut self, trigger: NoteTrigger) {
        log::debug!("Legato re-trigger to {:.3}", trigger.log2_freq);
        let velocity = trigger.velocity.clamp(0.0, 1.0);
        self.trigger = NoteTrigger {
            velocity,
            ..trigger
        };

        let global = &self.params.global;
        let freq = 2f32.powf(trigger.log2_freq);
        self.volume = global.volume(velocity);
        self.detune = global.detune.cents(global.detune_type);
        self.bandwidth_multiplier = global.bandwidth_multiplier();
        if global.panning != 0 {
            self.panning = global.panning as f32 / 128.0;
        }
        self.filter.update_sense(global.filter_velocity_offset(velocity));
        self.filter.update_note_freq(freq);

        for (voice, params) in self.voices.iter_mut().zip(self.params.voices.iter()) {
            if let Some(voice) = voice {
                voice.retune(params, global, trigger.log2_freq, velocity);
            }
        }
    }

    fn kill(&mut self) {
        self.amp_envelope.force_finish();
        self.voices.iter_mut().for_each(|v| *v = None);
        self.finished = true;
    }
}

impl SynthNote for AdditiveNote {
    fn noteout(
        &mut self,
        ctl: &Controller,
        portamento: &Portamento,
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool {
        let len = left.len().min(right.len()).min(self.config.buffer_size);
        left.fill(0.0);
        right.fill(0.0);
        if self.finished {
            return false;
        }
        let (left, right) = (&mut left[..len], &mut right[..len]);
        self.bypass_left.fill(0.0);
        self.bypass_right.fill(0.0);

        self.old_amplitude = self.new_amplitude;
        self.new_amplitude =
            self.volume * self.amp_envelope.envout_db() * self.amp_lfo.amplitude();

        let global_pitch =
            0.01 * (self.freq_envelope.envout() + self.freq_lfo.out() * ctl.mod_wheel());
        self.filter
            .update(ctl.filter_cutoff() + self.filter_cutoff, ctl.filter_q());

        if self.trigger.portamento && !portamento.is_active() {
            self.trigger.portamento = false;
        }
        let ctx = BlockContext {
            note_log2_freq: self.trigger.log2_freq,
            global_pitch,
            portamento_log2: if self.trigger.portamento {
                portamento.delta_log2()
            } else {
                0.0
            },
            bandwidth: ctl.bandwidth() * self.bandwidth_multiplier,
            pitch_bend: ctl.pitch_bend(),
            fm_amp: ctl.fm_amp(),
            global_detune: self.detune,
            stereo: self.stereo,
        };

        let mut dead = [false; MAX_VOICES];
        for slot in 0..self.voices.len() {
            let (before, rest) = self.voices.split_at_mut(slot);
            let Some(Some(voice)) = rest.first_mut() else {
                continue;
            };
            let input = voice.modulator_slot().map(|source| {
                match before.get(source) {
                    Some(Some(modulator)) => modulator.voice_out(),
                    _ => &self.zeros[..],
                }
            });
            let alive = voice.render(
                &ctx,
                input,
                VoiceMix {
                    left: &mut *left,
                    right: &mut *right,
                    bypass_left: &mut self.bypass_left,
                    bypass_right: &mut self.bypass_right,
                },
            );
            if let Some(d) = dead.get_mut(slot) {
                *d = !alive;
            }
        }
        for (voice, dead) in self.voices.iter_mut().zip(dead.iter()) {
            if *dead {
                *voice = None;
            }
        }

        if self.stereo {
            self.filter.filter(left, Some(&mut *right));
        } else {
            self.filter.filter(left, None);
            right.copy_from_slice(left);
            let (bl, br) = (&self.bypass_left, &mut self.bypass_right);
            br.copy_from_slice(bl);
        }
        for ((l, r), (bl, br)) in left
            .iter_mut()
            .zip(right.iter_mut())
            .zip(self.bypass_left.iter().zip(self.bypass_right.iter()))
        {
            *l += bl;
            *r += br;
        }

        let (old, new) = (self.old_amplitude, self.new_amplitude);
        let interpolate = above_amplitude_threshold(old, new);
        for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let amp = if interpolate {
                interpolate_amplitude(old, new, i, len)
            } else {
                new
            };
            *l *= amp * self.panning;
            *r *= amp * (1.0 - self.panning);
        }

        if let Some(punch) = self.punch.as_mut() {
            if !punch.apply(left, right) {
                self.punch = None;
            }
        }

        if let Some(trigger) = self.legato.apply(left, right) {
            self.retrigger(trigger);
        }

        if self.amp_envelope.finished() {
            fade_out(left);
            fade_out(right);
            self.kill();
        }
        true
    }

    fn signal_release(&mut self, rel_type: ReleaseType) {
        match rel_type {
            ReleaseType::Standard => {
                self.releasing = true;
                self.amp_envelope.release_key();
                self.freq_envelope.release_key();
                self.filter.release_key();
                for voice in self.voices.iter_mut().flatten() {
                    voice.release_key();
                }
            }
            ReleaseType::Kill => {
                self.releasing = true;
                self.amp_envelope.force_finish();
            }
        }
    }

    fn is_releasing(&self) -> bool {
        self.releasing
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn legato(&mut self, trigger: NoteTrigger) {
        if let Some(trigger) = self.legato.start(trigger) {
            self.retrigger(trigger);
        }
    }

    fn is_silent(&self) -> bool {
        self.legato.is_silent()
    }

    fn set_velocity(&mut self, velocity: f32) {
        self.retrigger(NoteTrigger {
            velocity,
            ..self.trigger
        });
    }

    fn set_pitch(&mut self, log2_freq: f32) {
        self.retrigger(NoteTrigger {
            log2_freq,
            ..self.trigger
        });
    }

    fn set_filter_cutoff(&mut self, octaves: f32) {
        self.filter_cutoff = octaves;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        helpers::key_log2_freq,
        voice::{EnvelopeParams, Modulation, ModulatorParams, VoiceParams},
    };

    fn config() -> SynthConfig {
        SynthConfig::new(44100, 256, 1024)
    }

    fn trigger(log2_freq: f32) -> NoteTrigger {
        NoteTrigger {
            log2_freq,
            velocity: 1.0,
            portamento: false,
            seed: 7,
        }
    }

    fn render(note: &mut AdditiveNote, blocks: usize) -> Vec<f32> {
        let ctl = Controller::default();
        let porta = Portamento::new();
        let mut out = Vec::new();
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        for _ in 0..blocks {
            note.noteout(&ctl, &porta, &mut l, &mut r);
            out.extend_from_slice(&l);
        }
        out
    }

    #[test]
    fn test_sine_is_phase_continuous() {
        let mut synth = AdditiveSynth::new(config(), AdditiveParams::default());
        let mut note = synth
            .note(&Controller::default(), trigger(440f32.log2()), false)
            .unwrap();
        let out = render(&mut note, 20);
        let window = &out[256 * 10..];

        let amp = window.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(amp > 0.01);
        let w = 2.0 * std::f32::consts::PI * 440.0 / 44100.0;
        for i in 1..window.len() - 1 {
            let second = window[i + 1] - 2.0 * window[i] + window[i - 1];
            assert!(second.abs() <= amp * w * w * 1.2 + 1e-5);
        }

        let crossings: Vec<usize> = (1..window.len())
            .filter(|i| window[i - 1] < 0.0 && window[*i] >= 0.0)
            .collect();
        let periods = (crossings.len() - 1) as f32;
        let samples = (crossings[crossings.len() - 1] - crossings[0]) as f32;
        assert!((samples / periods - 44100.0 / 440.0).abs() < 0.5);
    }

    #[test]
    fn test_no_voices_is_an_error() {
        let mut params = AdditiveParams::default();
        params.voices[0].enabled = false;
        let mut synth = AdditiveSynth::new(config(), params);
        assert!(matches!(
            synth.note(&Controller::default(), trigger(8.0), false),
            Err(NoteError::NoVoices)
        ));
    }

    #[test]
    fn test_release_finishes_note() {
        let mut synth = AdditiveSynth::new(config(), AdditiveParams::default());
        let mut note = synth
            .note(&Controller::default(), trigger(key_log2_freq(60)), false)
            .unwrap();
        render(&mut note, 4);
        note.signal_release(ReleaseType::Standard);
        assert!(note.is_releasing());

        let ctl = Controller::default();
        let porta = Portamento::new();
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        let mut blocks = 0;
        while !note.finished() {
            note.noteout(&ctl, &porta, &mut l, &mut r);
            blocks += 1;
            assert!(blocks < 10_000);
        }
        assert!(!note.noteout(&ctl, &porta, &mut l, &mut r));
        assert!(l.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_kill_ends_on_next_block() {
        let mut synth = AdditiveSynth::new(config(), AdditiveParams::default());
        let mut note = synth
            .note(&Controller::default(), trigger(9.0), false)
            .unwrap();
        render(&mut note, 2);
        note.signal_release(ReleaseType::Kill);
        assert!(!note.finished());
        render(&mut note, 1);
        assert!(note.finished());
        assert_eq!(note.active_voices(), 0);
    }

    #[test]
    fn test_voice_envelope_drops_voice() {
        let mut params = AdditiveParams::default();
        params.voices[1] = VoiceParams {
            enabled: true,
            amp_envelope: Some(EnvelopeParams::adsr_db(0.0, 0.01, 0, 0.01)),
            ..Default::default()
        };
        let mut synth = AdditiveSynth::new(config(), params);
        let mut note = synth
            .note(&Controller::default(), trigger(9.0), false)
            .unwrap();
        assert_eq!(note.active_voices(), 2);
        note.voices[1].as_mut().unwrap().release_key();
        render(&mut note, 50);
        assert_eq!(note.active_voices(), 1);
    }

    #[test]
    fn test_voice_modulated_by_earlier_voice() {
        let mut params = AdditiveParams::default();
        params.voices[1] = VoiceParams {
            enabled: true,
            modulation: Modulation::Phase(ModulatorParams {
                source: ModulatorSource::Voice(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut synth = AdditiveSynth::new(config(), params);
        let mut note = synth
            .note(&Controller::default(), trigger(9.0), false)
            .unwrap();
        let out = render(&mut note, 20);
        assert!(out.iter().all(|s| s.is_finite()));
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_silent_note_fades_in_on_legato() {
        let mut synth = AdditiveSynth::new(config(), AdditiveParams::default());
        let ctl = Controller::default();
        let mut note = synth.note(&ctl, trigger(9.0), true).unwrap();
        assert!(note.is_silent());
        assert!(render(&mut note, 4).iter().all(|s| *s == 0.0));

        note.legato(trigger(9.5));
        assert!(matches!(note.legato.state(), crate::voice::LegatoState::FadeIn { .. }));
        let out = render(&mut note, 4);
        assert!(out.iter().any(|s| *s != 0.0));
        assert_eq!(note.trigger().log2_freq, 9.5);
    }

    #[test]
    fn test_seeded_notes_are_reproducible() {
        let mut params = AdditiveParams::default();
        params.voices[0].unison.size = 4;
        params.voices[0].panning = 0;
        let mut synth = AdditiveSynth::new(config(), params);
        let mut a = synth.note(&Controller::default(), trigger(9.0), false).unwrap();
        let mut b = synth.note(&Controller::default(), trigger(9.0), false).unwrap();
        assert_eq!(render(&mut a, 5), render(&mut b, 5));
    }
}
