use std::path::Path;

use adsynth_core::{
    config::{SynthConfig, ThreadCount},
    instrument::InstrumentParams,
    pad::PadError,
    part::{ControlEvent, PartAudioEvent, PartEvent, PartOptions},
    part_group::{PartGroupError, SynthEvent},
};

use thiserror::Error;

use midi_toolkit::{
    events::{Event, MIDIEventEnum},
    io::{MIDIFile, MIDILoadError},
    pipe,
    sequence::{
        event::{cancel_tempo_events, scale_event_time},
        unwrap_items, TimeCaster,
    },
};

use crate::{
    config::{RenderAudioFormat, RenderConfig},
    AdsynthRender,
};

pub struct RenderStats {
    /// Position in the MIDI file, in seconds.
    pub progress: f64,
    pub voice_count: u64,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("MIDI loading failed")]
    MidiLoadingFailed(MIDILoadError),

    #[error("Writing the audio file failed")]
    AudioWriteFailed(#[from] hound::Error),

    #[error("Creating the synthesizer failed")]
    SynthFailed(#[from] PartGroupError),

    #[error("Generating the wavetables failed")]
    WavetableFailed(#[from] PadError),
}

impl From<MIDILoadError> for RenderError {
    fn from(e: MIDILoadError) -> Self {
        RenderError::MidiLoadingFailed(e)
    }
}

pub struct AdsynthRenderBuilder<'a, StatsCallback: FnMut(RenderStats)> {
    config: RenderConfig,
    midi_path: &'a str,
    out_path: &'a str,
    stats_callback: StatsCallback,
}

/// Starts building a render of the MIDI file at `midi_path` into `out_path`.
pub fn adsynth_renderer<'a>(
    midi_path: &'a str,
    out_path: &'a str,
) -> AdsynthRenderBuilder<'a, impl FnMut(RenderStats)> {
    AdsynthRenderBuilder {
        config: RenderConfig::default(),
        midi_path,
        out_path,
        stats_callback: |_| {},
    }
}

impl<'a, ProgressCallback: FnMut(RenderStats)> AdsynthRenderBuilder<'a, ProgressCallback> {
    // Config functions
    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_synth_config(mut self, synth: SynthConfig) -> Self {
        self.config.synth = synth;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.synth.sample_rate = sample_rate;
        self
    }

    pub fn with_part_count(mut self, parts: u32) -> Self {
        self.config.part_count = parts;
        self
    }

    pub fn with_part_options(mut self, options: PartOptions) -> Self {
        self.config.part_options = options;
        self
    }

    pub fn with_instrument(mut self, instrument: InstrumentParams) -> Self {
        self.config.instrument = instrument;
        self
    }

    pub fn with_threads(mut self, part: ThreadCount, pad: ThreadCount) -> Self {
        self.config.parallelism.part = part;
        self.config.parallelism.pad = pad;
        self
    }

    pub fn use_threadpool(mut self, use_threadpool: bool) -> Self {
        self.config.parallelism.part = if use_threadpool {
            ThreadCount::Auto
        } else {
            ThreadCount::None
        };
        self
    }

    pub fn use_limiter(mut self, use_limiter: bool) -> Self {
        self.config.use_limiter = use_limiter;
        self
    }

    pub fn trim_leading_silence(mut self, trim: bool) -> Self {
        self.config.trim_leading_silence = trim;
        self
    }

    pub fn with_max_tail(mut self, seconds: f64) -> Self {
        self.config.max_tail = seconds;
        self
    }

    pub fn with_audio_format(mut self, audio_format: RenderAudioFormat) -> Self {
        self.config.audio_format = audio_format;
        self
    }

    // Set up functions
    pub fn with_progress_callback<F: FnMut(RenderStats)>(
        self,
        stats_callback: F,
    ) -> AdsynthRenderBuilder<'a, F> {
        AdsynthRenderBuilder {
            config: self.config,
            midi_path: self.midi_path,
            out_path: self.out_path,
            stats_callback,
        }
    }

    pub fn run(mut self) -> Result<(), RenderError> {
        let midi = MIDIFile::open(self.midi_path, None)?;

        let mut synth = AdsynthRender::new(self.config.clone(), Path::new(self.out_path))?;

        let ppq = midi.ppq();
        let merged = pipe!(
            midi.iter_all_track_events_merged_batches()
            |>TimeCaster::<f64>::cast_event_delta()
            |>cancel_tempo_events(250000)
            |>scale_event_time(1.0 / ppq as f64)
            |>unwrap_items()
        );

        let mut pos: f64 = 0.0;

        for batch in merged {
            if batch.delta > 0.0 {
                synth.render_batch(batch.delta)?;
                pos += batch.delta;
                (self.stats_callback)(RenderStats {
                    progress: pos,
                    voice_count: synth.voice_count(),
                });
            }
            for e in batch.iter_events() {
                match e.as_event() {
                    Event::NoteOn(e) => {
                        synth.send_event(SynthEvent::Part(
                            e.channel as u32,
                            PartEvent::Audio(PartAudioEvent::NoteOn {
                                key: e.key,
                                vel: e.velocity,
                            }),
                        ));
                    }
                    Event::NoteOff(e) => {
                        synth.send_event(SynthEvent::Part(
                            e.channel as u32,
                            PartEvent::Audio(PartAudioEvent::NoteOff { key: e.key }),
                        ));
                    }
                    Event::ControlChange(e) => {
                        synth.send_event(SynthEvent::Part(
                            e.channel as u32,
                            PartEvent::Audio(PartAudioEvent::Control(ControlEvent::Raw(
                                e.controller,
                                e.value,
                            ))),
                        ));
                    }
                    Event::PitchWheelChange(e) => {
                        synth.send_event(SynthEvent::Part(
                            e.channel as u32,
                            PartEvent::Audio(PartAudioEvent::Control(
                                ControlEvent::PitchBendValue(e.pitch as f32 / 8192.0),
                            )),
                        ));
                    }
                    _ => {}
                }
            }
        }
        synth.send_event(SynthEvent::AllParts(PartEvent::Audio(
            PartAudioEvent::AllNotesOff,
        )));
        synth.send_event(SynthEvent::AllParts(PartEvent::Audio(
            PartAudioEvent::ResetControl,
        )));
        log::debug!("Reached the end of the MIDI at {:.3}s", pos);
        synth.finalize()
    }
}
