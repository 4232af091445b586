use crate::{
    config::SynthConfig,
    effects::FilterParams,
    helpers::{rnd, velocity_scale, NoteRng},
    oscillator::{OscillatorParams, Resonance},
};

use super::{EnvelopeParams, LfoParams, Modulation, ModulatorSource, UnisonParams};

/// The largest amount of voices in one additive instrument.
pub const MAX_VOICES: usize = 8;

/// How detune knobs map to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetuneType {
    /// Fine detune up to 35 cents, coarse steps of 50 cents.
    #[default]
    L35Cents,
    /// Fine detune up to 10 cents, coarse steps of 10 cents.
    L10Cents,
    /// Exponential fine detune up to 100 cents, coarse steps of a semitone.
    E100Cents,
    /// Exponential fine detune up to an octave, coarse steps of a fifth.
    E1200Cents,
}

impl DetuneType {
    fn coarse_step(self) -> f32 {
        match self {
            DetuneType::L35Cents => 50.0,
            DetuneType::L10Cents => 10.0,
            DetuneType::E100Cents => 100.0,
            DetuneType::E1200Cents => 701.955,
        }
    }

    fn fine_cents(self, fine: i16) -> f32 {
        let x = (fine as f32 / 8192.0).abs();
        let cents = match self {
            DetuneType::L35Cents => x * 35.0,
            DetuneType::L10Cents => x * 10.0,
            DetuneType::E100Cents => 10f32.powf(x * 3.0) / 10.0 - 0.1,
            DetuneType::E1200Cents => (2f32.powf(x * 12.0) - 1.0) / 4095.0 * 1200.0,
        };
        if fine < 0 {
            -cents
        } else {
            cents
        }
    }

    /// Total detune in cents.
    pub fn cents(self, octave: i8, coarse: i16, fine: i16) -> f32 {
        octave.clamp(-8, 7) as f32 * 1200.0
            + coarse.clamp(-64, 63) as f32 * self.coarse_step()
            + self.fine_cents(fine.clamp(-8192, 8191))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Detune {
    /// `None` uses the instrument's detune type.
    pub kind: Option<DetuneType>,
    /// -8 to 7 octaves.
    pub octave: i8,
    /// -64 to 63 coarse steps.
    pub coarse: i16,
    /// -8192 to 8191.
    pub fine: i16,
}

impl Detune {
    fn kind_or(&self, global: DetuneType) -> DetuneType {
        self.kind.unwrap_or(global)
    }

    /// Octave and coarse detune in cents.
    pub fn coarse_cents(&self, global: DetuneType) -> f32 {
        self.kind_or(global).cents(self.octave, self.coarse, 0)
    }

    /// Fine detune in cents.
    pub fn fine_cents(&self, global: DetuneType) -> f32 {
        self.kind_or(global).cents(0, 0, self.fine)
    }

    pub fn cents(&self, global: DetuneType) -> f32 {
        self.kind_or(global).cents(self.octave, self.coarse, self.fine)
    }
}

/// What a voice plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VoiceSource {
    #[default]
    Oscillator,
    WhiteNoise,
    PinkNoise,
    Dc,
}

/// Settings of one voice of an additive instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoiceParams {
    pub enabled: bool,
    pub source: VoiceSource,
    pub oscillator: OscillatorParams,
    /// Start position in the waveform, 64 is the position the oscillator
    /// picked.
    pub oscil_phase: u8,
    pub unison: UnisonParams,

    /// 0 to 127, 0 silences the voice's direct output while it still works
    /// as a modulator.
    pub volume: u8,
    pub volume_minus: bool,
    pub velocity_sense: u8,
    /// 0 picks a random position per note.
    pub panning: u8,
    /// Delay before the voice starts, 0 to 127.
    pub delay: u8,

    pub detune: Detune,
    /// How much the pitch wheel moves the voice, 64 is none and 88 is the
    /// full bend range.
    pub bend_adjust: u8,
    /// Constant frequency offset, 64 is none.
    pub offset_hz: u8,
    /// Play at 440Hz regardless of the note.
    pub fixed_freq: bool,
    /// Equal temperament tracking of a fixed frequency voice, 0 is none.
    pub fixed_freq_et: u8,

    /// Apply the instrument's resonance curve to this voice.
    pub resonance: bool,
    pub filter: Option<FilterParams>,
    /// Send the output past the note's global filter.
    pub bypass_global_filter: bool,

    pub amp_envelope: Option<EnvelopeParams>,
    pub amp_lfo: Option<LfoParams>,
    pub freq_envelope: Option<EnvelopeParams>,
    pub freq_lfo: Option<LfoParams>,
    pub filter_envelope: Option<EnvelopeParams>,
    pub filter_lfo: Option<LfoParams>,

    pub modulation: Modulation,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            enabled: false,
            source: VoiceSource::Oscillator,
            oscillator: OscillatorParams::default(),
            oscil_phase: 64,
            unison: UnisonParams::default(),
            volume: 100,
            volume_minus: false,
            velocity_sense: 127,
            panning: 64,
            delay: 0,
            detune: Detune::default(),
            bend_adjust: 88,
            offset_hz: 64,
            fixed_freq: false,
            fixed_freq_et: 0,
            resonance: true,
            filter: None,
            bypass_global_filter: false,
            amp_envelope: None,
            amp_lfo: None,
            freq_envelope: None,
            freq_lfo: None,
            filter_envelope: None,
            filter_lfo: None,
            modulation: Modulation::None,
        }
    }
}

impl VoiceParams {
    /// Linear volume at a velocity, negative when inverted.
    pub fn volume(&self, velocity: f32) -> f32 {
        if self.volume == 0 {
            return 0.0;
        }
        let db = -60.0 * (1.0 - self.volume as f32 / 127.0);
        let volume = 10f32.powf(db / 20.0) * velocity_scale(velocity, self.velocity_sense);
        if self.volume_minus {
            -volume
        } else {
            volume
        }
    }

    /// Pitch wheel multiplier exponent.
    pub fn bend_adjust(&self) -> f32 {
        bend_adjust(self.bend_adjust)
    }

    pub fn offset_hz(&self) -> f32 {
        offset_hz(self.offset_hz)
    }

    /// Amount of blocks the voice waits before starting.
    pub fn delay_ticks(&self, config: &SynthConfig) -> usize {
        let seconds = ((self.delay as f32 / 127.0 * 50f32.ln()).exp() - 1.0) / 10.0;
        (seconds * config.sample_rate_f() / config.buffer_size_f()) as usize
    }
}

/// Pitch wheel multiplier exponent of a `0..=127` knob, 64 is none.
pub fn bend_adjust(raw: u8) -> f32 {
    (raw as f32 - 64.0) / 24.0
}

/// Frequency offset in Hz of a `0..=127` knob, 64 is none.
pub fn offset_hz(raw: u8) -> f32 {
    let x = (raw as f32 - 64.0) / 64.0;
    15.0 * x * x.abs().sqrt()
}

/// Pitch of a fixed frequency voice. `et` makes it follow the keyboard by
/// a fraction of the key's distance from A4, 0 keeps it at 440Hz.
pub fn fixed_freq_log2(note_log2_freq: f32, et: u8) -> f32 {
    let a4 = 440f32.log2();
    if et == 0 {
        return a4;
    }
    let tracked = (note_log2_freq - a4) * (2f32.powf((et as f32 - 1.0) / 63.0) - 1.0);
    if et <= 64 {
        a4 + tracked
    } else {
        a4 + tracked * 3f32.log2()
    }
}

/// Note level settings shared by every voice.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalParams {
    pub stereo: bool,

    pub volume: u8,
    pub velocity_sense: u8,
    /// 0 picks a random position per note.
    pub panning: u8,

    pub detune_type: DetuneType,
    pub detune: Detune,
    /// Scales the fine detune and the unison spread, 64 is neutral.
    pub bandwidth: u8,

    pub punch_strength: u8,
    pub punch_time: u8,
    pub punch_stretch: u8,
    pub punch_velocity_sense: u8,

    /// Length of the fade in at note start, 0 to 127.
    pub fade_in_adjustment: u8,

    pub amp_envelope: EnvelopeParams,
    pub amp_lfo: LfoParams,
    pub freq_envelope: EnvelopeParams,
    pub freq_lfo: LfoParams,

    pub filter: FilterParams,
    /// How much velocity moves the cutoff, 0 to 127.
    pub filter_velocity_scale: u8,
    pub filter_velocity_sense: u8,
    pub filter_envelope: EnvelopeParams,
    pub filter_lfo: LfoParams,

    pub resonance: Resonance,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            stereo: true,
            volume: 90,
            velocity_sense: 64,
            panning: 64,
            detune_type: DetuneType::L35Cents,
            detune: Detune::default(),
            bandwidth: 64,
            punch_strength: 0,
            punch_time: 60,
            punch_stretch: 64,
            punch_velocity_sense: 72,
            fade_in_adjustment: FADE_IN_ADJUSTMENT_SCALE as u8,
            amp_envelope: EnvelopeParams::global_amplitude(),
            amp_lfo: LfoParams::global_amplitude(),
            freq_envelope: EnvelopeParams::global_frequency(),
            freq_lfo: LfoParams::global_frequency(),
            filter: FilterParams::default(),
            filter_velocity_scale: 0,
            filter_velocity_sense: 64,
            filter_envelope: EnvelopeParams::global_filter(),
            filter_lfo: LfoParams::global_filter(),
            resonance: Resonance::default(),
        }
    }
}

/// The fade in adjustment value of a neutral fade.
pub const FADE_IN_ADJUSTMENT_SCALE: f32 = 20.0;

impl GlobalParams {
    pub fn volume(&self, velocity: f32) -> f32 {
        let db = 12.0412 - 60.0 * (1.0 - self.volume as f32 / 96.0);
        10f32.powf(db / 20.0) * velocity_scale(velocity, self.velocity_sense)
    }

    /// Multiplier of the bandwidth knob on fine detune and unison spread.
    pub fn bandwidth_multiplier(&self) -> f32 {
        let bw = (self.bandwidth as f32 - 64.0) / 64.0;
        2f32.powf(bw * bw.abs().powf(0.2) * 5.0)
    }

    pub fn fade_in_adjustment(&self) -> f32 {
        (self.fade_in_adjustment as f32 / FADE_IN_ADJUSTMENT_SCALE).powi(2)
    }

    /// Filter cutoff offset in octaves from the velocity.
    pub fn filter_velocity_offset(&self, velocity: f32) -> f32 {
        self.filter_velocity_scale as f32 / 127.0
            * 6.0
            * (velocity_scale(velocity, self.filter_velocity_sense) - 1.0)
    }
}

/// Panning of a `0..=127` knob where 0 is random.
pub fn panning(raw: u8, rng: &mut NoteRng) -> f32 {
    if raw == 0 {
        rnd(rng)
    } else {
        raw as f32 / 128.0
    }
}

/// A complete additive instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdditiveParams {
    pub global: GlobalParams,
    pub voices: Vec<VoiceParams>,
}

impl Default for AdditiveParams {
    fn default() -> Self {
        let mut voices = vec![VoiceParams::default(); MAX_VOICES];
        voices[0].enabled = true;
        Self {
            global: GlobalParams::default(),
            voices,
        }
    }
}

impl AdditiveParams {
    /// Clamps the parameters to what a note can play: at most
    /// [`MAX_VOICES`] voices, and modulators only taken from enabled voices
    /// with a lower index.
    pub fn sanitize(&mut self) {
        if self.voices.len() > MAX_VOICES {
            log::warn!(
                "Additive instrument has {} voices, keeping the first {}",
                self.voices.len(),
                MAX_VOICES
            );
            self.voices.truncate(MAX_VOICES);
        }

        let enabled: Vec<bool> = self.voices.iter().map(|v| v.enabled).collect();
        for (i, voice) in self.voices.iter_mut().enumerate() {
            if let Some(modulator) = voice.modulation.params_mut() {
                if let ModulatorSource::Voice(slot) = modulator.source {
                    if slot >= i || !enabled[slot] {
                        log::warn!(
                            "Voice {} can't be modulated by voice {}, using its own oscillator",
                            i,
                            slot
                        );
                        modulator.source = ModulatorSource::Oscillator;
                    }
                }
            }
        }
    }

    pub fn enabled_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.enabled).count()
    }
}
