use std::collections::TryReserveError;

use rand::Rng;

use crate::{
    config::SynthConfig,
    helpers::{
        above_amplitude_threshold, fade_in, fade_out, interpolate_amplitude, note_rng, rnd,
        try_zeroed_vec, NoteRng,
    },
    oscillator::{ResonanceInput, SpectralOscillator},
};

use super::{
    fixed_freq_log2, morph, panning, ring, EnvelopeGenerator, GlobalParams, Lfo, ModulatedFilter,
    ModulationKind, ModulatorParams, ModulatorSource, OscIncrement, OscPhase, Unison, VoiceParams,
    VoiceSource,
};

/// Values computed once per block by a note and shared by all its voices.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub note_log2_freq: f32,
    /// Pitch of the global frequency envelope and LFO, in semitones.
    pub global_pitch: f32,
    /// Portamento offset in octaves.
    pub portamento_log2: f32,
    /// Controller bandwidth times the instrument bandwidth multiplier.
    pub bandwidth: f32,
    /// Pitch wheel frequency multiplier.
    pub pitch_bend: f32,
    pub fm_amp: f32,
    /// Global detune in cents.
    pub global_detune: f32,
    pub stereo: bool,
}

/// The note level buffers a voice mixes into.
pub struct VoiceMix<'a> {
    pub left: &'a mut [f32],
    pub right: &'a mut [f32],
    /// Output that skips the note's global filter.
    pub bypass_left: &'a mut [f32],
    pub bypass_right: &'a mut [f32],
}

/// What a voice needs to start.
pub struct VoiceInit<'a> {
    pub params: &'a VoiceParams,
    pub global: &'a GlobalParams,
    pub config: &'a SynthConfig,
    pub carrier: &'a mut SpectralOscillator,
    pub modulator: Option<&'a mut SpectralOscillator>,
    pub resonance: Option<ResonanceInput<'a>>,
    pub note_log2_freq: f32,
    pub velocity: f32,
}

struct ModulatorState {
    kind: ModulationKind,
    source: ModulatorSource,
    table: Vec<f32>,
    phases: Vec<OscPhase>,
    increments: Vec<OscIncrement>,
    integrated: Vec<f32>,
    buffers: Vec<Vec<f32>>,
    volume: f32,
    old_amplitude: f32,
    new_amplitude: f32,
    detune: f32,
    fixed_freq: bool,
    freq_envelope: Option<EnvelopeGenerator>,
    amp_envelope: Option<EnvelopeGenerator>,
}

impl ModulatorState {
    fn amplitude(&mut self, fm_amp: f32) -> f32 {
        let env = self.amp_envelope.as_mut().map(|e| e.amplitude()).unwrap_or(1.0);
        let amp = self.volume * fm_amp * env;
        match self.kind {
            ModulationKind::Morph | ModulationKind::Ring => amp.min(1.0),
            _ => amp,
        }
    }
}

/// One sounding voice of an additive note, with all of its unison copies.
pub struct VoiceEngine {
    source: VoiceSource,
    sample_rate: f32,
    oscil_size: usize,
    table: Vec<f32>,
    mask: usize,

    unison: Unison,
    phases: Vec<OscPhase>,
    increments: Vec<OscIncrement>,
    pink: Vec<[f32; 7]>,
    modulator: Option<ModulatorState>,

    volume: f32,
    panning: f32,
    coarse_detune: f32,
    fine_detune: f32,
    bend_adjust: f32,
    offset_hz: f32,
    fixed_freq: bool,
    fixed_freq_et: u8,
    bypass_global_filter: bool,
    fade_in_adjustment: f32,

    amp_envelope: Option<EnvelopeGenerator>,
    amp_lfo: Option<Lfo>,
    freq_envelope: Option<EnvelopeGenerator>,
    freq_lfo: Option<Lfo>,
    filter: Option<ModulatedFilter>,

    delay_ticks: usize,
    first_tick: bool,
    old_amplitude: f32,
    new_amplitude: f32,

    buffers: Vec<Vec<f32>>,
    left: Vec<f32>,
    right: Vec<f32>,
    out: Vec<f32>,
    rng: NoteRng,
}

fn try_buffers(count: usize, len: usize) -> Result<Vec<Vec<f32>>, TryReserveError> {
    let mut buffers = Vec::new();
    buffers.try_reserve_exact(count)?;
    for _ in 0..count {
        buffers.push(try_zeroed_vec(len)?);
    }
    Ok(buffers)
}

fn try_filled<T: Copy>(count: usize, value: T) -> Result<Vec<T>, TryReserveError> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(count)?;
    vec.resize(count, value);
    Ok(vec)
}

fn modulator_freq(voice_freq: f32, detune: f32, env: f32, fixed: bool) -> f32 {
    let base = if fixed { 440.0 } else { voice_freq };
    base * 2f32.powf((detune + env) / 1200.0)
}

/// Scales a block from `old` to `new`. A steep rise only ramps over the
/// last few samples.
fn apply_gain(smps: &mut [f32], old: f32, new: f32) {
    if !above_amplitude_threshold(old, new) {
        smps.iter_mut().for_each(|s| *s *= new);
        return;
    }
    let len = smps.len();
    let rest = if new > old && new - old > 0.25 {
        10.min(len)
    } else {
        len
    };
    let start = len - rest;
    for s in smps[..start].iter_mut() {
        *s *= old;
    }
    for (i, s) in smps[start..].iter_mut().enumerate() {
        *s *= interpolate_amplitude(old, new, i, rest);
    }
}

/// Position offset of a `0..=127` phase knob, 64 being none.
fn phase_offset(raw: u8, size: usize) -> i64 {
    ((raw as f32 - 64.0) / 128.0 * size as f32) as i64
}

impl VoiceEngine {
    /// Builds a voice, pulling its waveforms from the oscillators. Fails
    /// only when a buffer can't be allocated.
    pub fn new(init: VoiceInit, rng: &mut NoteRng) -> Result<Self, TryReserveError> {
        let VoiceInit {
            params,
            global,
            config,
            carrier,
            modulator,
            resonance,
            note_log2_freq,
            velocity,
        } = init;

        let mut rng = note_rng(rng.gen());
        let size = config.oscil_size;
        let mask = size - 1;
        let block = config.buffer_size;

        let unison = Unison::new(&params.unison, config, &mut rng)?;
        let copies = unison.len();

        let mut voice = Self {
            source: params.source,
            sample_rate: config.sample_rate_f(),
            oscil_size: size,
            table: try_zeroed_vec(size)?,
            mask,
            unison,
            phases: try_filled(copies, OscPhase::default())?,
            increments: try_filled(copies, OscIncrement::default())?,
            pink: try_filled(copies, [0.0f32; 7])?,
            modulator: None,
            volume: params.volume(velocity),
            panning: panning(params.panning, &mut rng),
            coarse_detune: params.detune.coarse_cents(global.detune_type),
            fine_detune: params.detune.fine_cents(global.detune_type),
            bend_adjust: params.bend_adjust(),
            offset_hz: params.offset_hz(),
            fixed_freq: params.fixed_freq,
            fixed_freq_et: params.fixed_freq_et,
            bypass_global_filter: params.bypass_global_filter,
            fade_in_adjustment: global.fade_in_adjustment(),
            amp_envelope: None,
            amp_lfo: None,
            freq_envelope: None,
            freq_lfo: None,
            filter: None,
            delay_ticks: params.delay_ticks(config),
            first_tick: true,
            old_amplitude: 1.0,
            new_amplitude: 1.0,
            buffers: try_buffers(copies, block)?,
            left: try_zeroed_vec(block)?,
            right: try_zeroed_vec(block)?,
            out: try_zeroed_vec(block)?,
            rng: note_rng(0),
        };

        let base_freq = voice.base_freq(note_log2_freq, 0.0, 0.0, 1.0);

        if voice.source == VoiceSource::Oscillator {
            let resonance = resonance.filter(|_| params.resonance);
            let start = carrier.get(&mut voice.table, base_freq, resonance, &mut rng) as i64;
            let start = start + phase_offset(params.oscil_phase, size);
            let randomness = params.unison.phase_randomness as f32 / 127.0;
            for (k, phase) in voice.phases.iter_mut().enumerate() {
                let spread = if k == 0 {
                    0
                } else {
                    (rnd(&mut rng) * randomness * mask as f32) as i64
                };
                *phase = OscPhase::new((start + spread).rem_euclid(size as i64) as usize, mask);
            }
        }

        if let (Some(kind), Some(mp)) = (params.modulation.kind(), params.modulation.params()) {
            voice.modulator = Some(voice.build_modulator(
                kind, mp, global, modulator, config, base_freq, velocity, &mut rng,
            )?);
        }

        if let Some(env) = &params.amp_envelope {
            voice.amp_envelope = Some(EnvelopeGenerator::new(env, base_freq, config));
        }
        if let Some(lfo) = &params.amp_lfo {
            voice.amp_lfo = Some(Lfo::new(lfo, base_freq, config, &mut rng));
        }
        if let Some(env) = &params.freq_envelope {
            voice.freq_envelope = Some(EnvelopeGenerator::new(env, base_freq, config));
        }
        if let Some(lfo) = &params.freq_lfo {
            voice.freq_lfo = Some(Lfo::new(lfo, base_freq, config, &mut rng));
        }
        if let Some(filter) = &params.filter {
            voice.filter = Some(ModulatedFilter::new(
                filter,
                params.filter_envelope.as_ref(),
                params.filter_lfo.as_ref(),
                2f32.powf(note_log2_freq),
                config,
                &mut rng,
            ));
        }

        voice.new_amplitude = voice.next_amplitude();
        voice.old_amplitude = voice.new_amplitude;
        voice.rng = rng;
        Ok(voice)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_modulator(
        &self,
        kind: ModulationKind,
        params: &ModulatorParams,
        global: &GlobalParams,
        oscillator: Option<&mut SpectralOscillator>,
        config: &SynthConfig,
        base_freq: f32,
        velocity: f32,
        rng: &mut NoteRng,
    ) -> Result<ModulatorState, TryReserveError> {
        let size = config.oscil_size;
        let copies = self.unison.len();
        let detune = params.detune.cents(global.detune_type);

        let mut state = ModulatorState {
            kind,
            source: params.source,
            table: Vec::new(),
            phases: try_filled(copies, OscPhase::default())?,
            increments: try_filled(copies, OscIncrement::default())?,
            integrated: try_filled(copies, 0.0f32)?,
            buffers: try_buffers(copies, config.buffer_size)?,
            volume: kind.volume(params, base_freq, velocity),
            old_amplitude: 0.0,
            new_amplitude: 0.0,
            detune,
            fixed_freq: params.fixed_freq,
            freq_envelope: params
                .freq_envelope
                .as_ref()
                .map(|e| EnvelopeGenerator::new(e, base_freq, config)),
            amp_envelope: params
                .amp_envelope
                .as_ref()
                .map(|e| EnvelopeGenerator::new(e, base_freq, config)),
        };

        if let (ModulatorSource::Oscillator, Some(oscillator)) = (params.source, oscillator) {
            state.table = try_zeroed_vec(size)?;
            // Mixing modulators are anti-aliased for their own pitch, phase
            // modulators keep every harmonic.
            let freq = if kind.is_phase_based() && !oscillator.params().adaptive.is_enabled() {
                1.0
            } else {
                modulator_freq(base_freq, detune, 0.0, params.fixed_freq)
            };
            let start = oscillator.get(&mut state.table, freq, None, rng) as i64
                + phase_offset(params.oscil_phase, size);
            for (phase, carrier) in state.phases.iter_mut().zip(self.phases.iter()) {
                let pos = (carrier.pos() as i64 + start).rem_euclid(size as i64) as usize;
                *phase = OscPhase::new(pos, self.mask);
            }
        }

        state.new_amplitude = state.amplitude(1.0);
        state.old_amplitude = state.new_amplitude;
        Ok(state)
    }

    /// Re-applies the velocity and pitch dependent values. Used by legato
    /// and polyphonic per note control.
    pub fn retune(&mut self, params: &VoiceParams, global: &GlobalParams, note_log2_freq: f32, velocity: f32) {
        self.volume = params.volume(velocity);
        self.coarse_detune = params.detune.coarse_cents(global.detune_type);
        self.fine_detune = params.detune.fine_cents(global.detune_type);
        let base_freq = self.base_freq(note_log2_freq, 0.0, 0.0, 1.0);
        if let (Some(state), Some(mp)) = (self.modulator.as_mut(), params.modulation.params()) {
            state.volume = state.kind.volume(mp, base_freq, velocity);
        }
        if let Some(filter) = self.filter.as_mut() {
            filter.update_note_freq(2f32.powf(note_log2_freq));
        }
    }

    /// The voice slot this voice takes its modulator from.
    pub fn modulator_slot(&self) -> Option<usize> {
        match self.modulator.as_ref().map(|m| m.source) {
            Some(ModulatorSource::Voice(slot)) => Some(slot),
            _ => None,
        }
    }

    /// The voice's output of the last block, before volume and panning.
    pub fn voice_out(&self) -> &[f32] {
        &self.out
    }

    pub fn unison_size(&self) -> usize {
        self.unison.len()
    }

    pub fn release_key(&mut self) {
        for env in [
            self.amp_envelope.as_mut(),
            self.freq_envelope.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            env.release_key();
        }
        if let Some(state) = self.modulator.as_mut() {
            for env in [state.amp_envelope.as_mut(), state.freq_envelope.as_mut()]
                .into_iter()
                .flatten()
            {
                env.release_key();
            }
        }
        if let Some(filter) = self.filter.as_mut() {
            filter.release_key();
        }
    }

    /// Frequency of the voice before the pitch wheel, with `adjust_log2`
    /// octaves added.
    fn base_freq(&self, note_log2_freq: f32, adjust_log2: f32, global_detune: f32, bandwidth: f32) -> f32 {
        let detune = self.coarse_detune / 100.0
            + self.fine_detune / 100.0 * bandwidth
            + global_detune / 100.0;

        if !self.fixed_freq {
            return 2f32.powf(note_log2_freq + detune / 12.0 + adjust_log2);
        }

        let log2 = fixed_freq_log2(note_log2_freq, self.fixed_freq_et);
        2f32.powf(log2 + detune / 12.0 + adjust_log2)
    }

    fn next_amplitude(&mut self) -> f32 {
        let env = self.amp_envelope.as_mut().map(|e| e.amplitude()).unwrap_or(1.0);
        let lfo = self.amp_lfo.as_mut().map(|l| l.amplitude()).unwrap_or(1.0);
        env * lfo
    }

    fn update_parameters(&mut self, ctx: &BlockContext) {
        self.old_amplitude = self.new_amplitude;
        self.new_amplitude = self.next_amplitude();

        if let Some(filter) = self.filter.as_mut() {
            filter.update(0.0, 1.0);
        }

        if self.source != VoiceSource::Oscillator {
            return;
        }

        let lfo = self.freq_lfo.as_mut().map(|l| l.out()).unwrap_or(0.0);
        let env = self.freq_envelope.as_mut().map(|e| e.envout()).unwrap_or(0.0);
        let voice_pitch = lfo / 100.0 * ctx.bandwidth + env / 100.0;

        let adjust = ctx.portamento_log2 + (voice_pitch + ctx.global_pitch) / 12.0;
        let voice_freq = self.base_freq(ctx.note_log2_freq, adjust, ctx.global_detune, ctx.bandwidth)
            * ctx.pitch_bend.powf(self.bend_adjust)
            + self.offset_hz;

        self.unison.update(ctx.bandwidth);
        for (inc, sub) in self.increments.iter_mut().zip(self.unison.subs()) {
            *inc = OscIncrement::from_freq(voice_freq * sub.ratio(), self.oscil_size, self.sample_rate);
        }

        let Some(state) = self.modulator.as_mut() else {
            return;
        };
        state.old_amplitude = state.new_amplitude;
        state.new_amplitude = state.amplitude(ctx.fm_amp);

        let env = state.freq_envelope.as_mut().map(|e| e.envout()).unwrap_or(0.0);
        let mod_freq = modulator_freq(voice_freq, state.detune, env, state.fixed_freq);
        for (inc, sub) in state.increments.iter_mut().zip(self.unison.subs()) {
            *inc = OscIncrement::from_freq(mod_freq * sub.ratio(), self.oscil_size, self.sample_rate);
        }
    }

    fn render_noise(&mut self) {
        for (buf, pink) in self.buffers.iter_mut().zip(self.pink.iter_mut()) {
            match self.source {
                VoiceSource::WhiteNoise => {
                    for s in buf.iter_mut() {
                        *s = rnd(&mut self.rng) * 2.0 - 1.0;
                    }
                }
                VoiceSource::PinkNoise => {
                    for s in buf.iter_mut() {
                        let white = (rnd(&mut self.rng) - 0.5) / 4.0;
                        pink[0] = 0.99886 * pink[0] + white * 0.055_517_9;
                        pink[1] = 0.99332 * pink[1] + white * 0.075_075_9;
                        pink[2] = 0.96900 * pink[2] + white * 0.153_852;
                        pink[3] = 0.86650 * pink[3] + white * 0.310_485_6;
                        pink[4] = 0.55000 * pink[4] + white * 0.532_952_2;
                        pink[5] = -0.7616 * pink[5] - white * 0.016_898;
                        *s = pink.iter().sum::<f32>() + white * 0.5362;
                        pink[6] = white * 0.115_926;
                    }
                }
                VoiceSource::Dc => buf.fill(1.0),
                VoiceSource::Oscillator => {}
            }
        }
    }

    fn render_oscillator(&mut self, modulator_input: Option<&[f32]>) {
        let mask = self.mask;
        let table = &self.table;

        let Some(state) = self.modulator.as_mut() else {
            for ((buf, phase), inc) in self
                .buffers
                .iter_mut()
                .zip(self.phases.iter_mut())
                .zip(self.increments.iter())
            {
                for s in buf.iter_mut() {
                    *s = phase.sample(table, mask);
                    phase.advance(*inc, mask);
                }
            }
            return;
        };

        let len = self.buffers.first().map(|b| b.len()).unwrap_or(0);
        let (old, new) = (state.old_amplitude, state.new_amplitude);
        let interpolate = above_amplitude_threshold(old, new);
        let amp = |i: usize| {
            if interpolate {
                interpolate_amplitude(old, new, i, len)
            } else {
                new
            }
        };

        for k in 0..self.buffers.len() {
            let mod_buf = &mut state.buffers[k];
            match (state.source, modulator_input) {
                (ModulatorSource::Voice(_), Some(input)) => {
                    for (m, s) in mod_buf.iter_mut().zip(input.iter()) {
                        *m = *s;
                    }
                }
                (ModulatorSource::Voice(_), None) => mod_buf.fill(0.0),
                (ModulatorSource::Oscillator, _) => {
                    if state.table.is_empty() {
                        mod_buf.fill(0.0);
                    } else {
                        let phase = &mut state.phases[k];
                        let inc = state.increments[k];
                        for m in mod_buf.iter_mut() {
                            *m = phase.sample(&state.table, mask);
                            phase.advance(inc, mask);
                        }
                    }
                }
            }

            let buf = &mut self.buffers[k];
            let phase = &mut self.phases[k];
            let inc = self.increments[k];

            if state.kind.is_phase_based() {
                let scale = state.kind.phase_scale(self.oscil_size, self.sample_rate);
                for (i, m) in mod_buf.iter_mut().enumerate() {
                    *m *= amp(i) * scale;
                }
                if state.kind == ModulationKind::Frequency {
                    let size = self.oscil_size as f32;
                    let mut acc = state.integrated[k];
                    for m in mod_buf.iter_mut() {
                        acc = (acc + *m) % size;
                        *m = acc;
                    }
                    state.integrated[k] = acc;
                }
                for (s, m) in buf.iter_mut().zip(mod_buf.iter()) {
                    *s = phase.offset(*m, mask).sample(table, mask);
                    phase.advance(inc, mask);
                }
            } else {
                for s in buf.iter_mut() {
                    *s = phase.sample(table, mask);
                    phase.advance(inc, mask);
                }
                match state.kind {
                    ModulationKind::Morph => morph(buf, mod_buf, amp),
                    _ => ring(buf, mod_buf, amp),
                }
            }
        }
    }

    fn apply_amplitude(&mut self, stereo: bool) {
        let unison_amp = self.unison.amplitude();
        let old = self.old_amplitude * unison_amp;
        let new = self.new_amplitude * unison_amp;
        apply_gain(&mut self.left, old, new);
        if stereo {
            apply_gain(&mut self.right, old, new);
        }
    }

    /// Renders one block and mixes it into the note buffers. Returns false
    /// once the voice is done and can be dropped.
    pub fn render(&mut self, ctx: &BlockContext, modulator_input: Option<&[f32]>, mix: VoiceMix) -> bool {
        if self.delay_ticks > 0 {
            self.delay_ticks -= 1;
            self.out.fill(0.0);
            return true;
        }

        self.update_parameters(ctx);

        match self.source {
            VoiceSource::Oscillator => self.render_oscillator(modulator_input),
            _ => self.render_noise(),
        }

        let stereo = ctx.stereo;
        self.left.fill(0.0);
        if stereo {
            self.right.fill(0.0);
        }
        for (buf, sub) in self.buffers.iter().zip(self.unison.subs()) {
            if stereo {
                for ((l, r), s) in self.left.iter_mut().zip(self.right.iter_mut()).zip(buf.iter()) {
                    *l += s * sub.lvol;
                    *r += s * sub.rvol;
                }
            } else {
                for (l, s) in self.left.iter_mut().zip(buf.iter()) {
                    *l += s;
                }
            }
        }

        self.apply_amplitude(stereo);

        if self.first_tick {
            fade_in(&mut self.left, self.fade_in_adjustment);
            if stereo {
                fade_in(&mut self.right, self.fade_in_adjustment);
            }
            self.first_tick = false;
        }

        if let Some(filter) = self.filter.as_mut() {
            if stereo {
                filter.filter(&mut self.left, Some(&mut self.right));
            } else {
                filter.filter(&mut self.left, None);
            }
        }

        let finished = self.amp_envelope.as_ref().map(|e| e.finished()).unwrap_or(false);
        if finished {
            fade_out(&mut self.left);
            if stereo {
                fade_out(&mut self.right);
            }
        }

        if stereo {
            for ((o, l), r) in self.out.iter_mut().zip(self.left.iter()).zip(self.right.iter()) {
                *o = l + r;
            }
        } else {
            self.out.copy_from_slice(&self.left);
        }

        let (left, right) = if self.bypass_global_filter {
            (mix.bypass_left, mix.bypass_right)
        } else {
            (mix.left, mix.right)
        };
        if self.volume != 0.0 {
            if stereo {
                let lgain = self.volume * self.panning * 2.0;
                let rgain = self.volume * (1.0 - self.panning) * 2.0;
                for (o, s) in left.iter_mut().zip(self.left.iter()) {
                    *o += s * lgain;
                }
                for (o, s) in right.iter_mut().zip(self.right.iter()) {
                    *o += s * rgain;
                }
            } else {
                for (o, s) in left.iter_mut().zip(self.left.iter()) {
                    *o += s * self.volume;
                }
            }
        }

        !finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        helpers::note_rng,
        oscillator::OscillatorParams,
        voice::{Modulation, UnisonParams},
    };

    fn config() -> SynthConfig {
        SynthConfig::new(44100, 256, 1024)
    }

    fn ctx(log2: f32) -> BlockContext {
        BlockContext {
            note_log2_freq: log2,
            global_pitch: 0.0,
            portamento_log2: 0.0,
            bandwidth: 1.0,
            pitch_bend: 1.0,
            fm_amp: 1.0,
            global_detune: 0.0,
            stereo: false,
        }
    }

    fn voice(params: &VoiceParams, modulator: Option<&mut SpectralOscillator>) -> VoiceEngine {
        let config = config();
        let mut carrier = SpectralOscillator::new(&config, OscillatorParams::default());
        let global = GlobalParams::default();
        VoiceEngine::new(
            VoiceInit {
                params,
                global: &global,
                config: &config,
                carrier: &mut carrier,
                modulator,
                resonance: None,
                note_log2_freq: 440f32.log2(),
                velocity: 1.0,
            },
            &mut note_rng(1),
        )
        .unwrap()
    }

    fn render(voice: &mut VoiceEngine, ctx: &BlockContext, input: Option<&[f32]>) -> (Vec<f32>, bool) {
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        let mut bl = vec![0.0; 256];
        let mut br = vec![0.0; 256];
        let alive = voice.render(
            ctx,
            input,
            VoiceMix {
                left: &mut l,
                right: &mut r,
                bypass_left: &mut bl,
                bypass_right: &mut br,
            },
        );
        (l, alive)
    }

    fn params() -> VoiceParams {
        VoiceParams {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_voice_is_a_sine() {
        let mut v = voice(&params(), None);
        let ctx = ctx(440f32.log2());
        // Skip the fade in.
        render(&mut v, &ctx, None);
        let (out, alive) = render(&mut v, &ctx, None);
        assert!(alive);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let volume = params().volume(1.0);
        assert!((peak - volume).abs() < 0.02 * volume);
    }

    #[test]
    fn test_delay_keeps_silence() {
        let p = VoiceParams {
            delay: 127,
            ..params()
        };
        let mut v = voice(&p, None);
        let ctx = ctx(440f32.log2());
        let (out, alive) = render(&mut v, &ctx, None);
        assert!(alive);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(v.voice_out().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_unison_buffers_match_size() {
        let p = VoiceParams {
            unison: UnisonParams {
                size: 5,
                ..Default::default()
            },
            ..params()
        };
        let v = voice(&p, None);
        assert_eq!(v.unison_size(), 5);
        assert_eq!(v.buffers.len(), 5);
        assert_eq!(v.phases.len(), 5);
    }

    #[test]
    fn test_noise_is_bounded() {
        for source in [VoiceSource::WhiteNoise, VoiceSource::PinkNoise, VoiceSource::Dc] {
            let p = VoiceParams { source, ..params() };
            let mut v = voice(&p, None);
            let ctx = ctx(440f32.log2());
            for _ in 0..20 {
                let (out, _) = render(&mut v, &ctx, None);
                assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 2.0));
            }
        }
    }

    #[test]
    fn test_voice_modulator_reads_input() {
        let p = VoiceParams {
            modulation: Modulation::Ring(ModulatorParams {
                source: ModulatorSource::Voice(0),
                volume: 100,
                damp_freq: 64,
                ..Default::default()
            }),
            ..params()
        };
        let mut v = voice(&p, None);
        assert_eq!(v.modulator_slot(), Some(0));
        let ctx = ctx(440f32.log2());
        let zeros = vec![0.0; 256];
        render(&mut v, &ctx, Some(&zeros));
        let (out, _) = render(&mut v, &ctx, Some(&zeros));
        // A full ring modulation by silence is silence.
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_phase_modulation_stays_finite() {
        let config = config();
        let mut modulator = SpectralOscillator::new(&config, OscillatorParams::default());
        for modulation in [
            Modulation::Phase(ModulatorParams::default()),
            Modulation::Frequency(ModulatorParams::default()),
            Modulation::Morph(ModulatorParams::default()),
        ] {
            let p = VoiceParams {
                modulation,
                ..params()
            };
            let mut v = voice(&p, Some(&mut modulator));
            let ctx = ctx(440f32.log2());
            for _ in 0..50 {
                let (out, _) = render(&mut v, &ctx, None);
                assert!(out.iter().all(|s| s.is_finite() && s.abs() < 4.0));
            }
        }
    }

    #[test]
    fn test_finished_envelope_ends_voice() {
        let p = VoiceParams {
            amp_envelope: Some(crate::voice::EnvelopeParams::adsr_db(0.0, 0.01, 0, 0.01)),
            ..params()
        };
        let mut v = voice(&p, None);
        let ctx = ctx(440f32.log2());
        v.release_key();
        let mut blocks = 0;
        while render(&mut v, &ctx, None).1 {
            blocks += 1;
            assert!(blocks < 1000);
        }
    }
}
