/// Format of the audio produced by an [`AudioPipe`](crate::AudioPipe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamParams {
    pub sample_rate: u32,
    /// Amount of interleaved channels. Parts and part groups render stereo.
    pub channels: u16,
}

impl AudioStreamParams {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Amount of frames in `samples` interleaved samples.
    pub fn frames(&self, samples: usize) -> usize {
        samples / self.channels.max(1) as usize
    }
}
