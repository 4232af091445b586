use crate::{
    config::{SynthConfig, ThreadCount},
    controller::{cc, Controller, ControllerAction},
    helpers::{db_to_rap, interpolate_amplitude},
    instrument::{Instrument, InstrumentParams},
    pad::PadError,
    polyphony::{KeyState, PolyphonyManager},
    AudioPipe, AudioStreamParams,
};

mod event;
pub use event::*;

mod options;
pub use options::*;

/// One MIDI channel worth of synthesis: an instrument, the notes it plays
/// and the controllers that shape them.
///
/// Notes are rendered in fixed blocks of the configured buffer size. Reads
/// of any length are served from the current block, so events always take
/// effect on the next block boundary.
///
/// Supported MIDI CC:
/// - 1 mod wheel, 7 volume, 10 pan, 11 expression
/// - 6/38 data entry with RPN 0 (pitch bend range)
/// - 64 sustain, 65 portamento
/// - 71 filter Q, 74 filter cutoff, 75 bandwidth, 76 FM amplitude
/// - 77/78 resonance center and bandwidth
/// - 120 all sounds off, 121 reset all controllers, 123 all notes off
pub struct Part {
    config: SynthConfig,
    options: PartOptions,
    ctl: Controller,
    instrument: Instrument,
    poly: PolyphonyManager,

    volume_db: f32,
    /// Gains applied at the end of the last block, ramped from on the next.
    gains: (f32, f32),

    left: Vec<f32>,
    right: Vec<f32>,
    /// Read position in the current block.
    cursor: usize,

    stream_params: AudioStreamParams,
}

impl Part {
    pub fn new(
        config: SynthConfig,
        options: PartOptions,
        instrument: InstrumentParams,
        threads: ThreadCount,
    ) -> Result<Self, PadError> {
        let mut ctl = Controller::new(options.controller);
        ctl.portamento = options.portamento;

        let mut part = Self {
            config,
            ctl,
            instrument: Instrument::new(config, instrument, threads)?,
            poly: PolyphonyManager::new(config, options.polyphony),
            volume_db: options.volume_db(),
            gains: (0.0, 0.0),
            left: vec![0.0; config.buffer_size],
            right: vec![0.0; config.buffer_size],
            cursor: config.buffer_size,
            stream_params: AudioStreamParams::new(config.sample_rate, 2),
            options,
        };
        part.gains = part.target_gains();
        Ok(part)
    }

    pub fn options(&self) -> &PartOptions {
        &self.options
    }

    pub fn controller(&self) -> &Controller {
        &self.ctl
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn polyphony(&self) -> &PolyphonyManager {
        &self.poly
    }

    /// Reseeds the random source of new notes.
    pub fn seed(&mut self, seed: u64) {
        self.poly.seed(seed);
    }

    pub fn key_state(&self, key: u8) -> Option<KeyState> {
        self.poly.key_state(key)
    }

    /// Amount of notes that exist, including releasing ones.
    pub fn voice_count(&self) -> u64 {
        self.poly.note_count() as u64
    }

    /// Blocks until the wavetable banks of the instrument are generated.
    pub fn wait_for_banks(&mut self) -> Result<(), PadError> {
        self.instrument.wait_for_banks()
    }

    pub fn process_event(&mut self, event: PartEvent) {
        self.push_events_iter(std::iter::once(event));
    }

    pub fn push_events_iter<T: Iterator<Item = PartEvent>>(&mut self, iter: T) {
        for e in iter {
            match e {
                PartEvent::Audio(audio) => self.process_audio_event(audio),
                PartEvent::Config(config) => self.process_config_event(config),
            }
        }
    }

    pub fn process_audio_event(&mut self, event: PartAudioEvent) {
        match event {
            PartAudioEvent::NoteOn { key, vel: 0 } => self.note_off(key),
            PartAudioEvent::NoteOn { key, vel } => self.note_on(key, vel),
            PartAudioEvent::NoteOff { key } => self.note_off(key),
            PartAudioEvent::KeyPressure { key, value } => {
                if self.options.plays(key) {
                    // Aftertouch never silences a held key
                    let velocity = self.options.velocity(value.max(1));
                    self.poly.set_velocity(key, velocity);
                }
            }
            PartAudioEvent::AllNotesOff => self.poly.release_all(),
            PartAudioEvent::AllNotesKilled => self.poly.kill_all(),
            PartAudioEvent::ResetControl => {
                self.process_control_event(ControlEvent::Raw(cc::RESET_ALL_CONTROLLERS, 0))
            }
            PartAudioEvent::Control(control) => self.process_control_event(control),
        }
    }

    fn note_on(&mut self, key: u8, vel: u8) {
        if !self.options.plays(key) {
            log::trace!("Key {} is outside of the part's range", key);
            return;
        }
        let velocity = self.options.velocity(vel);
        let log2_freq = self.options.key_log2_freq(key);
        if let Err(err) =
            self.poly
                .note_on(&mut self.instrument, &self.ctl, key, velocity, log2_freq)
        {
            log::warn!("Dropped note on of key {}: {}", key, err);
        }
    }

    fn note_off(&mut self, key: u8) {
        self.poly.note_off(&mut self.instrument, &self.ctl, key);
    }

    pub fn process_control_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Raw(controller, value) => {
                match self.ctl.set_controller(controller, value) {
                    ControllerAction::SustainChanged(false) => {
                        self.poly.release_sustained(&mut self.instrument, &self.ctl)
                    }
                    ControllerAction::AllSoundsOff => self.poly.kill_all(),
                    ControllerAction::AllNotesOff => self.poly.release_all(),
                    ControllerAction::SustainChanged(true) | ControllerAction::None => {}
                }
                match controller {
                    cc::VOLUME if self.ctl.params.receive_volume => {
                        self.volume_db = part_volume_db(value);
                    }
                    cc::RESET_ALL_CONTROLLERS => self.volume_db = self.options.volume_db(),
                    _ => {}
                }
            }
            ControlEvent::PitchBendSensitivity(semitones) => {
                let cents = (semitones * 100.0).round().clamp(0.0, 12700.0);
                self.ctl.set_bend_range(cents as i16);
            }
            ControlEvent::PitchBendValue(value) => {
                let wheel = (value * 8192.0).round().clamp(-8192.0, 8191.0);
                self.ctl.set_pitch_wheel(wheel as i16);
            }
        }
    }

    pub fn process_config_event(&mut self, event: PartConfigEvent) {
        match event {
            PartConfigEvent::SetInstrument(params) => {
                if let Err(err) = self.instrument.set_params(*params) {
                    log::warn!("Failed to set the part's instrument: {}", err);
                }
            }
            PartConfigEvent::SetOptions(options) => self.set_options(*options),
        }
    }

    /// Replaces the options. The controllers go back to their defaults and
    /// sustained notes are released.
    pub fn set_options(&mut self, options: PartOptions) {
        let sustained = self.ctl.sustain();
        self.ctl = Controller::new(options.controller);
        self.ctl.portamento = options.portamento;
        self.poly.set_options(options.polyphony);
        if sustained {
            self.poly.release_sustained(&mut self.instrument, &self.ctl);
        }
        self.volume_db = options.volume_db();
        self.options = options;
    }

    /// Left and right gain from the volume, expression and panning.
    fn target_gains(&self) -> (f32, f32) {
        let gain = db_to_rap(self.volume_db) * self.ctl.expression();
        let pan = (self.options.panning.min(127) as f32 / 127.0 + self.ctl.pan()).clamp(0.0, 1.0);
        let left = gain * ((1.0 - pan) * 2.0).min(1.0);
        let right = gain * (pan * 2.0).min(1.0);
        (left, right)
    }

    fn render_block(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
        if !self.options.enabled {
            self.poly.clear();
            return;
        }

        self.poly.render(&self.ctl, &mut self.left, &mut self.right);

        let (from_left, from_right) = self.gains;
        let (to_left, to_right) = self.target_gains();
        let len = self.left.len();
        for (i, (l, r)) in self.left.iter_mut().zip(self.right.iter_mut()).enumerate() {
            *l *= interpolate_amplitude(from_left, to_left, i, len);
            *r *= interpolate_amplitude(from_right, to_right, i, len);
        }
        self.gains = (to_left, to_right);
    }

    /// Renders interleaved stereo into `out`, continuing the current block
    /// where the previous read stopped.
    fn render_to(&mut self, out: &mut [f32]) {
        let block = self.config.buffer_size;
        for frame in out.chunks_exact_mut(2) {
            if self.cursor >= block {
                self.render_block();
                self.cursor = 0;
            }
            frame[0] = self.left[self.cursor];
            frame[1] = self.right[self.cursor];
            self.cursor += 1;
        }
    }
}

impl AudioPipe for Part {
    fn stream_params(&self) -> &AudioStreamParams {
        &self.stream_params
    }

    fn read_samples_unchecked(&mut self, out: &mut [f32]) {
        self.render_to(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(options: PartOptions) -> Part {
        let mut part = Part::new(
            SynthConfig::default(),
            options,
            InstrumentParams::default(),
            ThreadCount::None,
        )
        .unwrap();
        part.seed(7);
        part
    }

    fn note_on(key: u8, vel: u8) -> PartEvent {
        PartEvent::Audio(PartAudioEvent::NoteOn { key, vel })
    }

    fn control(controller: u8, value: u8) -> PartEvent {
        PartEvent::Audio(PartAudioEvent::Control(ControlEvent::Raw(controller, value)))
    }

    fn render(part: &mut Part, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        part.read_samples(&mut out);
        out
    }

    fn peak(smps: impl Iterator<Item = f32>) -> f32 {
        smps.fold(0.0, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_note_renders_stereo() {
        let mut part = part(PartOptions::default());
        part.process_event(note_on(60, 100));
        assert_eq!(part.voice_count(), 1);
        let out = render(&mut part, 2048);
        assert!(peak(out.iter().step_by(2).copied()) > 1e-3);
        assert!(peak(out.iter().skip(1).step_by(2).copied()) > 1e-3);
    }

    #[test]
    fn test_out_of_range_and_disabled() {
        let mut ranged = part(PartOptions {
            min_key: 40,
            max_key: 50,
            ..Default::default()
        });
        ranged.process_event(note_on(60, 100));
        assert_eq!(ranged.voice_count(), 0);
        ranged.process_event(note_on(45, 100));
        assert_eq!(ranged.voice_count(), 1);

        let mut disabled = part(PartOptions {
            enabled: false,
            ..Default::default()
        });
        disabled.process_event(note_on(60, 100));
        assert_eq!(disabled.voice_count(), 0);
        assert!(render(&mut disabled, 512).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_zero_velocity_releases() {
        let mut part = part(PartOptions::default());
        part.process_event(note_on(60, 100));
        part.process_event(note_on(60, 0));
        assert_eq!(part.key_state(60), Some(KeyState::Released));
    }

    #[test]
    fn test_sustain_pedal() {
        let mut part = part(PartOptions::default());
        part.process_event(control(cc::SUSTAIN, 127));
        part.process_event(note_on(60, 100));
        part.process_event(PartEvent::Audio(PartAudioEvent::NoteOff { key: 60 }));
        assert_eq!(part.key_state(60), Some(KeyState::Sustained));
        part.process_event(control(cc::SUSTAIN, 0));
        assert_eq!(part.key_state(60), Some(KeyState::Released));
    }

    #[test]
    fn test_hard_pan_silences_other_side() {
        let mut part = part(PartOptions {
            panning: 0,
            ..Default::default()
        });
        part.process_event(note_on(60, 100));
        let out = render(&mut part, 2048);
        assert!(peak(out.iter().step_by(2).copied()) > 1e-3);
        assert_eq!(peak(out.iter().skip(1).step_by(2).copied()), 0.0);
    }

    #[test]
    fn test_all_sounds_off_kills_on_next_block() {
        let mut part = part(PartOptions::default());
        part.process_event(note_on(60, 100));
        part.process_event(note_on(64, 100));
        render(&mut part, 1024);
        part.process_event(control(cc::ALL_SOUNDS_OFF, 0));
        render(&mut part, 256);
        assert_eq!(part.voice_count(), 0);
        assert!(render(&mut part, 256).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_pitch_bend_events() {
        let mut part = part(PartOptions::default());
        part.process_control_event(ControlEvent::PitchBendSensitivity(12.0));
        assert_eq!(part.controller().params.bend_range, 1200);
        part.process_control_event(ControlEvent::PitchBendValue(1.0));
        assert!((part.controller().pitch_bend() - 2.0).abs() < 1e-3);
        part.process_control_event(ControlEvent::PitchBendValue(-1.0));
        assert!((part.controller().pitch_bend() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_volume_controller() {
        let mut part = part(PartOptions::default());
        part.process_event(control(cc::VOLUME, 0));
        assert_eq!(part.volume_db, MIN_PART_VOLUME_DB);
        part.process_event(PartEvent::Audio(PartAudioEvent::ResetControl));
        assert_eq!(part.volume_db, 0.0);
    }

    #[test]
    fn test_reads_are_block_independent() {
        let mut a = part(PartOptions::default());
        let mut b = part(PartOptions::default());
        a.process_event(note_on(60, 100));
        b.process_event(note_on(60, 100));

        let whole = render(&mut a, 1000);
        let mut split = render(&mut b, 100);
        split.extend(render(&mut b, 333));
        split.extend(render(&mut b, 567));
        assert_eq!(whole, split);
    }

    #[test]
    fn test_set_options_resets_controllers() {
        let mut part = part(PartOptions::default());
        part.process_event(control(cc::SUSTAIN, 127));
        part.process_event(note_on(60, 100));
        part.process_event(PartEvent::Audio(PartAudioEvent::NoteOff { key: 60 }));
        part.process_event(PartEvent::Config(PartConfigEvent::SetOptions(Box::new(
            PartOptions {
                volume: 64,
                ..Default::default()
            },
        ))));
        assert!(!part.controller().sustain());
        assert_eq!(part.key_state(60), Some(KeyState::Released));
        assert_eq!(part.options().volume, 64);
    }
}
