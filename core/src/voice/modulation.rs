use crate::{helpers::velocity_scale, oscillator::OscillatorParams};

use super::{Detune, EnvelopeParams};

/// Makes the modulator volume knob span a useful range of phase offsets.
const FM_AMP_MULTIPLIER: f32 = 14.712_806;

/// Where a voice's modulator signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModulatorSource {
    /// The modulator's own oscillator.
    #[default]
    Oscillator,
    /// The output of an earlier voice of the same note.
    Voice(usize),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModulatorParams {
    pub source: ModulatorSource,
    pub oscillator: OscillatorParams,
    /// Start position in the modulator waveform, 64 is neutral.
    pub oscil_phase: u8,
    /// 0 to 127, in percent.
    pub volume: u8,
    pub velocity_sense: u8,
    /// How the volume falls with the note frequency, 64 is none.
    pub damp_freq: u8,
    pub detune: Detune,
    /// Run the modulator at 440Hz regardless of the note.
    pub fixed_freq: bool,
    pub freq_envelope: Option<EnvelopeParams>,
    pub amp_envelope: Option<EnvelopeParams>,
}

impl Default for ModulatorParams {
    fn default() -> Self {
        Self {
            source: ModulatorSource::Oscillator,
            oscillator: OscillatorParams::default(),
            oscil_phase: 64,
            volume: 70,
            velocity_sense: 64,
            damp_freq: 64,
            detune: Detune::default(),
            fixed_freq: false,
            freq_envelope: None,
            amp_envelope: None,
        }
    }
}

/// How a voice is modulated.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modulation {
    #[default]
    None,
    /// Cross fade from the carrier to the modulator.
    Morph(ModulatorParams),
    /// Multiply the carrier by the modulator.
    Ring(ModulatorParams),
    /// Offset the carrier phase by the modulator.
    Phase(ModulatorParams),
    /// Offset the carrier phase by the integrated modulator.
    Frequency(ModulatorParams),
}

/// The modulation kind without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationKind {
    Morph,
    Ring,
    Phase,
    Frequency,
}

impl Modulation {
    pub fn params(&self) -> Option<&ModulatorParams> {
        match self {
            Modulation::None => None,
            Modulation::Morph(p)
            | Modulation::Ring(p)
            | Modulation::Phase(p)
            | Modulation::Frequency(p) => Some(p),
        }
    }

    pub fn params_mut(&mut self) -> Option<&mut ModulatorParams> {
        match self {
            Modulation::None => None,
            Modulation::Morph(p)
            | Modulation::Ring(p)
            | Modulation::Phase(p)
            | Modulation::Frequency(p) => Some(p),
        }
    }

    pub fn kind(&self) -> Option<ModulationKind> {
        match self {
            Modulation::None => None,
            Modulation::Morph(_) => Some(ModulationKind::Morph),
            Modulation::Ring(_) => Some(ModulationKind::Ring),
            Modulation::Phase(_) => Some(ModulationKind::Phase),
            Modulation::Frequency(_) => Some(ModulationKind::Frequency),
        }
    }
}

impl ModulationKind {
    /// Whether the modulator bends the carrier's phase rather than mixing
    /// with its output.
    #[inline(always)]
    pub fn is_phase_based(self) -> bool {
        matches!(self, ModulationKind::Phase | ModulationKind::Frequency)
    }

    /// Volume of the modulator for a voice at `base_freq` Hz.
    pub fn volume(self, params: &ModulatorParams, base_freq: f32, velocity: f32) -> f32 {
        let ratio = 440.0 / base_freq.max(0.1);
        let damp = params.damp_freq as f32 / 64.0;
        let volume = params.volume as f32 / 100.0;
        let exp_volume = ((volume * FM_AMP_MULTIPLIER).exp() - 1.0) * 4.0;

        let out = match self {
            ModulationKind::Phase => exp_volume * ratio.powf(damp),
            ModulationKind::Frequency => exp_volume * ratio.powf(damp - 1.0),
            ModulationKind::Morph | ModulationKind::Ring => ratio.powf(damp - 1.0).min(1.0) * volume,
        };
        out * velocity_scale(velocity, params.velocity_sense)
    }

    /// Scale from modulator samples to carrier phase offsets, in table
    /// samples, so every table size and sample rate sound alike.
    pub fn phase_scale(self, oscil_size: usize, sample_rate: f32) -> f32 {
        let size = oscil_size as f32 / 262_144.0;
        match self {
            ModulationKind::Frequency => size * 44100.0 / sample_rate,
            _ => size,
        }
    }
}

/// Cross fade a carrier block towards a modulator block. `amp` gives the
/// modulator amount of every sample.
#[inline(always)]
pub fn morph(carrier: &mut [f32], modulator: &[f32], amp: impl Fn(usize) -> f32) {
    for (i, (c, m)) in carrier.iter_mut().zip(modulator.iter()).enumerate() {
        let a = amp(i);
        *c = *c * (1.0 - a) + a * m;
    }
}

/// Ring modulate a carrier block.
#[inline(always)]
pub fn ring(carrier: &mut [f32], modulator: &[f32], amp: impl Fn(usize) -> f32) {
    for (i, (c, m)) in carrier.iter_mut().zip(modulator.iter()).enumerate() {
        let a = amp(i);
        *c *= (1.0 - a) + a * m;
    }
}
