use std::path::Path;

use adsynth_core::{
    part_group::{PartGroup, SynthEvent},
    AudioPipe, AudioStreamParams,
};

use crate::{
    builder::RenderError,
    config::RenderConfig,
    writer::AudioFileWriter,
};

/// Longest stretch of time rendered in one go.
const MAX_BATCH_SECONDS: f64 = 10.0;

/// Peak under which a block of the tail counts as silent.
const SILENCE_THRESHOLD: f32 = 0.0001;

struct BatchRenderElements {
    output_vec: Vec<f32>,
    missed_samples: f64,
}

/// Renders a stream of timed events through a part group into a file.
pub struct AdsynthRender {
    config: RenderConfig,
    part_group: PartGroup,
    audio_writer: AudioFileWriter,
    render_elements: BatchRenderElements,
}

impl AdsynthRender {
    /// Builds the synthesizer, waits for its wavetables and opens the
    /// output file.
    pub fn new(config: RenderConfig, out_path: &Path) -> Result<Self, RenderError> {
        let mut part_group = PartGroup::new(config.group_config())?;
        part_group.wait_for_banks()?;

        let audio_writer = AudioFileWriter::new(&config, out_path)?;

        Ok(Self {
            config,
            part_group,
            audio_writer,
            render_elements: BatchRenderElements {
                output_vec: Vec::new(),
                missed_samples: 0.0,
            },
        })
    }

    pub fn stream_params(&self) -> &AudioStreamParams {
        self.part_group.stream_params()
    }

    pub fn send_event(&mut self, event: SynthEvent) {
        self.part_group.send_event(event);
    }

    /// Renders `event_time` seconds. The fraction of a sample that doesn't
    /// fit is carried over to the next batch.
    pub fn render_batch(&mut self, event_time: f64) -> Result<(), RenderError> {
        let mut remaining_time = event_time;
        while remaining_time > MAX_BATCH_SECONDS {
            self.render_chunk(MAX_BATCH_SECONDS)?;
            remaining_time -= MAX_BATCH_SECONDS;
        }
        self.render_chunk(remaining_time)
    }

    fn render_chunk(&mut self, event_time: f64) -> Result<(), RenderError> {
        let samples = self.config.synth.sample_rate as f64 * event_time
            + self.render_elements.missed_samples;
        self.render_elements.missed_samples = samples % 1.0;
        let samples = samples as usize * AudioFileWriter::CHANNELS as usize;
        if samples == 0 {
            return Ok(());
        }

        self.render_elements.output_vec.resize(samples, 0.0);
        self.part_group
            .read_samples(&mut self.render_elements.output_vec);
        self.audio_writer
            .write_samples(&mut self.render_elements.output_vec)?;
        Ok(())
    }

    /// Renders until the output goes silent, then finishes the file.
    pub fn finalize(mut self) -> Result<(), RenderError> {
        let chunk = self.config.synth.sample_rate as usize * AudioFileWriter::CHANNELS as usize;
        let max_chunks = self.config.max_tail.max(0.0).ceil() as usize;
        let mut rendered = 0;
        while rendered < max_chunks {
            self.render_elements.output_vec.resize(chunk, 0.0);
            self.part_group
                .read_samples(&mut self.render_elements.output_vec);
            let is_empty = self
                .render_elements
                .output_vec
                .iter()
                .all(|s| s.abs() <= SILENCE_THRESHOLD);
            if is_empty {
                break;
            }
            self.audio_writer
                .write_samples(&mut self.render_elements.output_vec)?;
            rendered += 1;
        }
        if rendered == max_chunks && max_chunks > 0 {
            log::warn!(
                "The output was still sounding after {} seconds, cutting it off",
                max_chunks
            );
        }
        self.audio_writer.finalize()?;
        Ok(())
    }

    pub fn voice_count(&self) -> u64 {
        self.part_group.voice_count()
    }

    /// Amount of frames written to the file so far.
    pub fn frames_written(&self) -> u64 {
        self.audio_writer.frames_written()
    }
}
