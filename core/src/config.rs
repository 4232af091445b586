use thiserror::Error;

/// The smallest supported oscillator table size.
pub const MIN_OSCIL_SIZE: usize = 256;
/// The largest supported oscillator table size.
pub const MAX_OSCIL_SIZE: usize = 1 << 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Oscillator size {0} must be a power of two between 256 and 65536")]
    InvalidOscilSize(usize),

    #[error("Buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("Sample rate must be greater than zero")]
    ZeroSampleRate,
}

/// Engine wide constants shared by every oscillator, voice and note.
///
/// All of the values are fixed for the lifetime of the engine. Changing any
/// of them requires rebuilding the notes that were created with the old ones.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynthConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    /// Amount of samples processed per call to a note's render function.
    pub buffer_size: usize,

    /// Length of one oscillator period table, also the FFT size.
    pub oscil_size: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 256,
            oscil_size: 1024,
        }
    }
}

impl SynthConfig {
    pub fn new(sample_rate: u32, buffer_size: usize, oscil_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            oscil_size,
        }
    }

    /// Checks that the configuration can be used to build an engine.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if !self.oscil_size.is_power_of_two()
            || !(MIN_OSCIL_SIZE..=MAX_OSCIL_SIZE).contains(&self.oscil_size)
        {
            return Err(ConfigError::InvalidOscilSize(self.oscil_size));
        }
        Ok(self)
    }

    #[inline(always)]
    pub fn sample_rate_f(&self) -> f32 {
        self.sample_rate as f32
    }

    #[inline(always)]
    pub fn half_sample_rate_f(&self) -> f32 {
        self.sample_rate as f32 * 0.5
    }

    #[inline(always)]
    pub fn buffer_size_f(&self) -> f32 {
        self.buffer_size as f32
    }

    #[inline(always)]
    pub fn oscil_size_f(&self) -> f32 {
        self.oscil_size as f32
    }

    /// Duration of one block in seconds.
    #[inline(always)]
    pub fn dt(&self) -> f32 {
        self.buffer_size as f32 / self.sample_rate as f32
    }
}

/// How many threads a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThreadCount {
    /// No multithreading. Run everything on the calling thread.
    None,

    /// Run with multithreading, with an automatically determined thread count.
    /// Please read
    /// [this](https://docs.rs/rayon-core/1.5.0/rayon_core/struct.ThreadPoolBuilder.html#method.num_threads)
    /// for more information about the thread count selection.
    #[default]
    Auto,

    /// Run with multithreading, with the specified thread count.
    Manual(usize),
}

impl ThreadCount {
    /// Builds the thread pool for this thread count, or `None` when the
    /// task runs on the calling thread. `max` caps the amount of threads.
    pub fn build_pool(
        self,
        max: Option<usize>,
    ) -> Result<Option<rayon::ThreadPool>, rayon::ThreadPoolBuildError> {
        let threads = match self {
            ThreadCount::None => return Ok(None),
            ThreadCount::Auto => max,
            ThreadCount::Manual(threads) => Some(max.map_or(threads, |m| threads.min(m))),
        };
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = threads {
            builder = builder.num_threads(threads.max(1));
        }
        builder.build().map(Some)
    }
}

/// Amount of hardware threads, 1 when unknown.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(SynthConfig::default().validate().is_ok());
        assert_eq!(
            SynthConfig::new(44100, 256, 1000).validate(),
            Err(ConfigError::InvalidOscilSize(1000))
        );
        assert_eq!(
            SynthConfig::new(44100, 0, 1024).validate(),
            Err(ConfigError::ZeroBufferSize)
        );
        assert_eq!(
            SynthConfig::new(0, 256, 1024).validate(),
            Err(ConfigError::ZeroSampleRate)
        );
    }

    #[test]
    fn test_block_duration() {
        let config = SynthConfig::new(48000, 480, 2048);
        assert!((config.dt() - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_thread_pools() {
        assert!(ThreadCount::None.build_pool(None).unwrap().is_none());
        let pool = ThreadCount::Manual(8).build_pool(Some(2)).unwrap().unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        assert!(hardware_threads() >= 1);
    }
}
