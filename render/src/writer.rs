use std::{fs::File, io::BufWriter, path::Path};

use hound::{WavSpec, WavWriter};

use crate::config::{RenderAudioFormat, RenderConfig};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AudioWriterState {
    /// Waiting for the first sound.
    Idle,
    Writing,
    Finished,
}

/// Writes interleaved stereo frames to the output file.
pub struct AudioFileWriter {
    format: RenderAudioFormat,
    state: AudioWriterState,
    wav_writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl AudioFileWriter {
    pub const CHANNELS: u16 = 2;

    pub fn new(config: &RenderConfig, path: &Path) -> Result<Self, hound::Error> {
        match config.audio_format {
            RenderAudioFormat::Wav => {
                let spec = WavSpec {
                    channels: Self::CHANNELS,
                    sample_rate: config.synth.sample_rate,
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                };
                let writer = WavWriter::create(path, spec)?;

                Ok(Self {
                    format: config.audio_format,
                    state: if config.trim_leading_silence {
                        AudioWriterState::Idle
                    } else {
                        AudioWriterState::Writing
                    },
                    wav_writer: Some(writer),
                    frames_written: 0,
                })
            }
        }
    }

    /// Writes and drains `samples`. Whole frames of silence are skipped
    /// until the first sound.
    pub fn write_samples(&mut self, samples: &mut Vec<f32>) -> Result<(), hound::Error> {
        match self.format {
            RenderAudioFormat::Wav => {
                let Some(writer) = self.wav_writer.as_mut() else {
                    samples.clear();
                    return Ok(());
                };
                for frame in samples.chunks_exact(Self::CHANNELS as usize) {
                    if self.state == AudioWriterState::Idle {
                        if frame.iter().all(|s| *s == 0.0) {
                            continue;
                        }
                        self.state = AudioWriterState::Writing;
                    }
                    for s in frame {
                        writer.write_sample(*s)?;
                    }
                    self.frames_written += 1;
                }
                samples.clear();
            }
        }
        Ok(())
    }

    pub fn finalize(mut self) -> Result<(), hound::Error> {
        match self.format {
            RenderAudioFormat::Wav => {
                if let Some(writer) = self.wav_writer.take() {
                    writer.finalize()?;
                    self.state = AudioWriterState::Finished;
                    log::debug!("Finished writing {} frames", self.frames_written);
                }
            }
        }
        Ok(())
    }

    pub fn state(&self) -> AudioWriterState {
        self.state
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("adsynth-writer-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_leading_silence_is_trimmed_per_frame() {
        let path = temp_path("trim");
        let mut writer = AudioFileWriter::new(&RenderConfig::default(), &path).unwrap();
        assert_eq!(writer.state(), AudioWriterState::Idle);

        let mut samples = vec![0.0, 0.0, 0.0, 0.5, 0.25, 0.0, 0.0, 0.0];
        writer.write_samples(&mut samples).unwrap();
        assert!(samples.is_empty());
        assert_eq!(writer.state(), AudioWriterState::Writing);
        assert_eq!(writer.frames_written(), 3);
        writer.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        let written: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(written, vec![0.0, 0.5, 0.25, 0.0, 0.0, 0.0]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_untrimmed_output_keeps_silence() {
        let path = temp_path("untrimmed");
        let config = RenderConfig {
            trim_leading_silence: false,
            ..Default::default()
        };
        let mut writer = AudioFileWriter::new(&config, &path).unwrap();
        writer.write_samples(&mut vec![0.0; 8]).unwrap();
        assert_eq!(writer.frames_written(), 4);
        writer.finalize().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
