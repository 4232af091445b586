use std::sync::Arc;

use crate::{
    config::{SynthConfig, ThreadCount},
    controller::{Controller, Portamento},
    helpers::{
        above_amplitude_threshold, fade_in, fade_out, interpolate_amplitude, note_rng, rnd,
        NoteRng,
    },
    voice::{
        fixed_freq_log2, panning, EnvelopeGenerator, Legato, Lfo, ModulatedFilter, NoteError,
        NoteTrigger, Punch, ReleaseType, SynthNote,
    },
};

use super::{shared_pad_bank, PadBank, PadError, PadJob, PadParams, SharedPadBank};

/// A wavetable instrument. Owns the published bank and the job that
/// regenerates it whenever the parameters change.
pub struct PadSynth {
    params: Arc<PadParams>,
    config: SynthConfig,
    threads: ThreadCount,
    bank: SharedPadBank,
    job: Option<PadJob>,
}

impl PadSynth {
    /// Creates the instrument and starts generating its first bank. Notes
    /// are silent until the bank is published.
    pub fn new(
        config: SynthConfig,
        params: PadParams,
        threads: ThreadCount,
    ) -> Result<Self, PadError> {
        let mut synth = Self {
            params: Arc::new(params.clone()),
            config,
            threads,
            bank: shared_pad_bank(),
            job: None,
        };
        synth.set_params(params)?;
        Ok(synth)
    }

    pub fn params(&self) -> &PadParams {
        &self.params
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// The currently published bank.
    pub fn bank(&self) -> Arc<PadBank> {
        self.bank.load_full()
    }

    /// Replaces the parameters. A running generation is cancelled and a new
    /// one is started; the old bank keeps playing until it is replaced.
    pub fn set_params(&mut self, params: PadParams) -> Result<(), PadError> {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
        self.job = Some(PadJob::spawn(
            params.clone(),
            self.config,
            self.threads,
            self.bank.clone(),
        )?);
        self.params = Arc::new(params);
        Ok(())
    }

    /// Blocks until the latest generation has finished.
    pub fn wait(&mut self) -> Result<usize, PadError> {
        match self.job.as_mut() {
            Some(job) => job.wait(),
            None => Ok(self.bank.load().tables().len()),
        }
    }

    pub fn note(
        &self,
        ctl: &Controller,
        trigger: NoteTrigger,
        silent: bool,
    ) -> Result<PadNote, NoteError> {
        Ok(PadNote::new(self, ctl, trigger, silent))
    }
}

/// A note playing the tables of a bank. The bank it started with stays
/// alive for as long as the note runs.
pub struct PadNote {
    params: Arc<PadParams>,
    config: SynthConfig,
    bank: Arc<PadBank>,
    table: Option<usize>,

    pos_left: usize,
    pos_right: usize,
    pos_frac: f32,

    trigger: NoteTrigger,
    base_log2_freq: f32,
    volume: f32,
    panning: f32,
    detune: f32,
    bend_adjust: f32,
    offset_hz: f32,

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
    first_block: bool,

    releasing: bool,
    finished: bool,
}

impl PadNote {
    fn new(synth: &PadSynth, _ctl: &Controller, trigger: NoteTrigger, silent: bool) -> Self {
        let params = Arc::clone(&synth.params);
        let config = synth.config;
        let global = &params.global;
        let bank = synth.bank.load_full();

        let mut rng: NoteRng = note_rng(trigger.seed);
        let velocity = trigger.velocity.clamp(0.0, 1.0);
        let trigger = NoteTrigger {
            velocity,
            ..trigger
        };
        let freq = 2f32.powf(trigger.log2_freq);

        let mut amp_envelope = EnvelopeGenerator::new(&global.amp_envelope, freq, &config);
        let mut amp_lfo = Lfo::new(&global.amp_lfo, freq, &config, &mut rng);
        let volume = global.volume(velocity);
        let new_amplitude = volume * amp_envelope.envout_db() * amp_lfo.amplitude();

        let mut filter = ModulatedFilter::new(
            &global.filter,
            Some(&global.filter_envelope),
            Some(&global.filter_lfo),
            freq,
            &config,
            &mut rng,
        );
        filter.update_sense(global.filter_velocity_offset(velocity));

        let mut note = Self {
            bank,
            table: None,
            pos_left: 0,
            pos_right: 0,
            pos_frac: 0.0,
            trigger,
            base_log2_freq: trigger.log2_freq,
            volume,
            panning: panning(global.panning, &mut rng),
            detune: global.detune.cents(global.detune_type),
            bend_adjust: params.bend_adjust(),
            offset_hz: params.offset_hz(),
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
            first_block: true,
            releasing: false,
            finished: false,
            config,
            params,
        };
        note.select_table(trigger.log2_freq);

        let size = note.table_len();
        note.pos_left = (rnd(&mut rng) * (size - 1) as f32) as usize % size;
        note.pos_right = if note.params.stereo {
            (note.pos_left + size / 2) % size
        } else {
            note.pos_left
        };
        note
    }

    pub fn trigger(&self) -> NoteTrigger {
        self.trigger
    }

    /// Index of the table being played, `None` while no bank is published.
    pub fn table(&self) -> Option<usize> {
        self.table
    }

    fn table_len(&self) -> usize {
        self.table
            .and_then(|t| self.bank.tables().get(t))
            .map(|t| t.len())
            .unwrap_or(1)
            .max(1)
    }

    fn select_table(&mut self, log2_freq: f32) {
        self.base_log2_freq = if self.params.fixed_freq {
            fixed_freq_log2(log2_freq, self.params.fixed_freq_et)
        } else {
            log2_freq
        };
        self.table = self
            .bank
            .nearest(self.base_log2_freq + self.detune / 1200.0);
    }

    fn retrigger(&mut self, trigger: NoteTrigger) {
        log::debug!("Legato re-trigger to {:.3}", trigger.log2_freq);
        let velocity = trigger.velocity.clamp(0.0, 1.0);
        self.trigger = NoteTrigger {
            velocity,
            ..trigger
        };

        let global = &self.params.global;
        self.volume = global.volume(velocity);
        self.detune = global.detune.cents(global.detune_type);
        if global.panning != 0 {
            self.panning = global.panning as f32 / 128.0;
        }
        self.filter
            .update_sense(global.filter_velocity_offset(velocity));
        self.filter.update_note_freq(2f32.powf(trigger.log2_freq));

        // Positions carry over, the new table has the same length.
        self.select_table(trigger.log2_freq);
        let size = self.table_len();
        self.pos_left %= size;
        self.pos_right %= size;
    }

    fn kill(&mut self) {
        self.amp_envelope.force_finish();
        self.finished = true;
    }

    fn render_table(&mut self, freq: f32, left: &mut [f32], right: &mut [f32]) {
        let Some(table) = self.table.and_then(|t| self.bank.tables().get(t)) else {
            left.fill(0.0);
            right.fill(0.0);
            return;
        };
        let size = table.len();
        let smps = table.samples();

        let ratio = (freq / table.base_freq()).max(0.0);
        let step = ratio.floor() as usize;
        let frac = ratio - ratio.floor();

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            self.pos_left += step;
            self.pos_right += step;
            self.pos_frac += frac;
            if self.pos_frac >= 1.0 {
                self.pos_left += 1;
                self.pos_right += 1;
                self.pos_frac -= 1.0;
            }
            self.pos_left %= size;
            self.pos_right %= size;

            let x = self.pos_frac;
            *l = smps[self.pos_left] * (1.0 - x) + smps[self.pos_left + 1] * x;
            *r = smps[self.pos_right] * (1.0 - x) + smps[self.pos_right + 1] * x;
        }
    }
}

impl SynthNote for PadNote {
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

        self.old_amplitude = self.new_amplitude;
        self.new_amplitude =
            self.volume * self.amp_envelope.envout_db() * self.amp_lfo.amplitude();
        let global_pitch = 0.01
            * (self.freq_envelope.envout()
                + self.freq_lfo.out() * ctl.mod_wheel()
                + self.detune);
        self.filter
            .update(ctl.filter_cutoff() + self.filter_cutoff, ctl.filter_q());

        if self.trigger.portamento && !portamento.is_active() {
            self.trigger.portamento = false;
        }
        let porta = if self.trigger.portamento {
            portamento.delta_log2()
        } else {
            0.0
        };
        let freq = 2f32.powf(self.base_log2_freq + global_pitch / 12.0 + porta)
            * ctl.pitch_bend().powf(self.bend_adjust)
            + self.offset_hz;

        self.render_table(freq, left, right);

        if self.first_block {
            let adjustment = self.params.global.fade_in_adjustment();
            fade_in(left, adjustment);
            fade_in(right, adjustment);
            self.first_block = false;
        }

        self.filter.filter(left, Some(&mut *right));

        if let Some(punch) = self.punch.as_mut() {
            if !punch.apply(left, right) {
                self.punch = None;
            }
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
        self.releasing = true;
        match rel_type {
            ReleaseType::Standard => {
                self.amp_envelope.release_key();
                self.freq_envelope.release_key();
                self.filter.release_key();
            }
            ReleaseType::Kill => self.amp_envelope.force_finish(),
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
