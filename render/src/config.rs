use adsynth_core::{
    config::SynthConfig,
    instrument::InstrumentParams,
    part::PartOptions,
    part_group::{ParallelismOptions, PartGroupConfig, MIDI_PART_COUNT},
};

/// Output container of the renderer.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderAudioFormat {
    /// 32-bit float WAV
    #[default]
    Wav,
}

/// Options of an offline render. The output is always stereo.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderConfig {
    pub synth: SynthConfig,
    /// Amount of parts, one per MIDI channel.
    pub part_count: u32,
    /// Options every part starts with.
    pub part_options: PartOptions,
    /// Instrument every part plays.
    pub instrument: InstrumentParams,
    pub parallelism: ParallelismOptions,
    pub use_limiter: bool,
    /// Skip the silence before the first sound.
    pub trim_leading_silence: bool,
    /// Longest time rendered after the last event while waiting for the
    /// notes to die out, in seconds.
    pub max_tail: f64,
    pub audio_format: RenderAudioFormat,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            synth: SynthConfig {
                sample_rate: 48000,
                ..Default::default()
            },
            part_count: MIDI_PART_COUNT,
            part_options: PartOptions::default(),
            instrument: InstrumentParams::default(),
            parallelism: ParallelismOptions::default(),
            use_limiter: true,
            trim_leading_silence: true,
            max_tail: 60.0,
            audio_format: RenderAudioFormat::Wav,
        }
    }
}

impl RenderConfig {
    /// The configuration of the part group that renders the audio.
    pub fn group_config(&self) -> PartGroupConfig {
        PartGroupConfig {
            synth: self.synth,
            part_count: self.part_count,
            part_options: self.part_options.clone(),
            instrument: self.instrument.clone(),
            use_limiter: self.use_limiter,
            parallelism: self.parallelism,
        }
    }
}
