use crate::AudioStreamParams;

/// A source of interleaved audio samples.
pub trait AudioPipe {
    /// The audio stream parameters of the audio pipe.
    fn stream_params(&self) -> &'_ AudioStreamParams;

    /// Reads samples from the pipe.
    ///
    /// The amount of samples read is the amount of time that passes for the
    /// events sent so far. A note on followed by a read of 44100 frames at
    /// 44.1kHz plays the note for one second. A note off sent after that
    /// read releases the note on the next read.
    ///
    /// Panics if the length of `to` is not a multiple of the channel count.
    fn read_samples(&mut self, to: &mut [f32]) {
        assert!(to.len() % self.stream_params().channels.max(1) as usize == 0);
        self.read_samples_unchecked(to);
    }

    /// Reads samples from the pipe without checking the channel count of the output.
    fn read_samples_unchecked(&mut self, to: &mut [f32]);
}
