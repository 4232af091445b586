use crate::{
    config::{SynthConfig, ThreadCount},
    instrument::InstrumentParams,
    part::PartOptions,
};

/// Amount of parts of a MIDI synthesizer, one per channel.
pub const MIDI_PART_COUNT: u32 = 16;

/// Defines the multithreading options for each task that supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParallelismOptions {
    /// Render the parts in parallel in a thread pool with the specified
    /// thread count.
    pub part: ThreadCount,

    /// Generate the wavetable banks of PAD kit items with the specified
    /// thread count. Capped by the amount of hardware threads.
    pub pad: ThreadCount,
}

/// Options for initializing a new [`PartGroup`](super::PartGroup).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartGroupConfig {
    /// Engine constants shared by every part.
    pub synth: SynthConfig,

    /// Amount of parts to create. MIDI uses 16.
    pub part_count: u32,

    /// Options every part starts with.
    pub part_options: PartOptions,

    /// Instrument every part starts with.
    pub instrument: InstrumentParams,

    /// Keep the summed output from clipping.
    pub use_limiter: bool,

    pub parallelism: ParallelismOptions,
}

impl Default for PartGroupConfig {
    fn default() -> Self {
        Self {
            synth: SynthConfig::default(),
            part_count: MIDI_PART_COUNT,
            part_options: PartOptions::default(),
            instrument: InstrumentParams::default(),
            use_limiter: true,
            parallelism: ParallelismOptions::default(),
        }
    }
}
