use rayon::prelude::*;
use thiserror::Error;

use crate::{
    config::ConfigError,
    effects::VolumeLimiter,
    helpers::{prepare_cache_vec, sum_into},
    pad::PadError,
    part::{Part, PartAudioEvent, PartEvent},
    AudioPipe, AudioStreamParams,
};

mod config;
pub use config::*;
mod events;
pub use events::*;

const MAX_EVENT_CACHE_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum PartGroupError {
    #[error("Invalid synth configuration")]
    Config(#[from] ConfigError),

    #[error("Failed to start the wavetable generation")]
    Pad(#[from] PadError),

    #[error("Failed to build the part thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A multi-part synthesizer.
///
/// Manages several [`Part`] objects at once, routes events to them and
/// mixes their output into interleaved stereo. For the supported MIDI CC
/// see the documentation of [`Part`].
pub struct PartGroup {
    thread_pool: Option<rayon::ThreadPool>,
    cached_event_count: u32,
    part_events_cache: Box<[Vec<PartAudioEvent>]>,
    sample_cache_vecs: Box<[Vec<f32>]>,
    parts: Box<[Part]>,
    limiter: Option<VolumeLimiter>,
    audio_params: AudioStreamParams,
}

impl PartGroup {
    /// Creates a new PartGroup with the given configuration.
    /// See the [`PartGroupConfig`] documentation for the available options.
    pub fn new(config: PartGroupConfig) -> Result<Self, PartGroupError> {
        let synth = config.synth.validate()?;
        let thread_pool = config.parallelism.part.build_pool(None)?;

        let mut parts = Vec::with_capacity(config.part_count as usize);
        for i in 0..config.part_count {
            let mut part = Part::new(
                synth,
                config.part_options.clone(),
                config.instrument.clone(),
                config.parallelism.pad,
            )?;
            part.seed(i as u64);
            parts.push(part);
        }
        log::debug!("Created a part group with {} parts", parts.len());

        let audio_params = AudioStreamParams::new(synth.sample_rate, 2);
        Ok(Self {
            thread_pool,
            cached_event_count: 0,
            part_events_cache: vec![Vec::new(); parts.len()].into_boxed_slice(),
            sample_cache_vecs: vec![Vec::new(); parts.len()].into_boxed_slice(),
            limiter: config
                .use_limiter
                .then(|| VolumeLimiter::new(audio_params.channels, audio_params.sample_rate)),
            parts: parts.into_boxed_slice(),
            audio_params,
        })
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    /// Sends a SynthEvent to the PartGroup.
    ///
    /// Audio events are cached and applied right before the next render,
    /// configuration events are applied immediately. Events for parts that
    /// don't exist are ignored.
    pub fn send_event(&mut self, event: SynthEvent) {
        match event {
            SynthEvent::Part(part, event) => {
                let part = part as usize;
                if part >= self.parts.len() {
                    log::trace!("Ignoring an event for missing part {}", part);
                    return;
                }
                match event {
                    PartEvent::Audio(e) => {
                        self.part_events_cache[part].push(e);
                        self.cached_event_count += 1;
                        if self.cached_event_count > MAX_EVENT_CACHE_SIZE {
                            self.flush_events();
                        }
                    }
                    PartEvent::Config(_) => {
                        self.flush_events();
                        self.parts[part].process_event(event);
                    }
                }
            }
            SynthEvent::AllParts(event) => match event {
                PartEvent::Audio(e) => {
                    for part in self.part_events_cache.iter_mut() {
                        part.push(e);
                    }
                    self.cached_event_count += self.part_events_cache.len() as u32;
                    if self.cached_event_count > MAX_EVENT_CACHE_SIZE {
                        self.flush_events();
                    }
                }
                PartEvent::Config(_) => {
                    self.flush_events();
                    for part in self.parts.iter_mut() {
                        part.process_event(event.clone());
                    }
                }
            },
        }
    }

    fn flush_events(&mut self) {
        if self.cached_event_count == 0 {
            return;
        }

        match self.thread_pool.as_ref() {
            Some(pool) => {
                let parts = &mut self.parts;
                let part_events_cache = &mut self.part_events_cache;

                pool.install(move || {
                    parts
                        .par_iter_mut()
                        .zip(part_events_cache.par_iter_mut())
                        .for_each(|(part, events)| {
                            part.push_events_iter(events.drain(..).map(PartEvent::Audio));
                        });
                });
            }
            None => {
                for (part, events) in self.parts.iter_mut().zip(self.part_events_cache.iter_mut()) {
                    part.push_events_iter(events.drain(..).map(PartEvent::Audio));
                }
            }
        }

        self.cached_event_count = 0;
    }

    fn render_to(&mut self, buffer: &mut [f32]) {
        self.flush_events();
        buffer.fill(0.0);

        let len = buffer.len();
        match self.thread_pool.as_ref() {
            Some(pool) => {
                let parts = &mut self.parts;
                let sample_cache_vecs = &mut self.sample_cache_vecs;
                pool.install(move || {
                    parts
                        .par_iter_mut()
                        .zip(sample_cache_vecs.par_iter_mut())
                        .for_each(|(part, samples)| {
                            prepare_cache_vec(samples, len, 0.0);
                            part.read_samples(samples.as_mut_slice());
                        });
                });
            }
            None => {
                for (part, samples) in self.parts.iter_mut().zip(self.sample_cache_vecs.iter_mut()) {
                    prepare_cache_vec(samples, len, 0.0);
                    part.read_samples(samples.as_mut_slice());
                }
            }
        }

        for vec in self.sample_cache_vecs.iter() {
            sum_into(vec, buffer);
        }

        if let Some(limiter) = self.limiter.as_mut() {
            limiter.limit(buffer);
        }
    }

    /// Returns the active voice count of the synthesizer.
    pub fn voice_count(&self) -> u64 {
        self.parts.iter().map(|p| p.voice_count()).sum()
    }

    /// Blocks until every part's wavetable banks are generated.
    pub fn wait_for_banks(&mut self) -> Result<(), PadError> {
        for part in self.parts.iter_mut() {
            part.wait_for_banks()?;
        }
        Ok(())
    }
}

impl AudioPipe for PartGroup {
    fn stream_params(&self) -> &AudioStreamParams {
        &self.audio_params
    }

    fn read_samples_unchecked(&mut self, to: &mut [f32]) {
        self.render_to(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SynthConfig, ThreadCount},
        controller::cc,
        part::{ControlEvent, PartConfigEvent, PartOptions},
    };

    fn group(part: ThreadCount) -> PartGroup {
        PartGroup::new(PartGroupConfig {
            parallelism: ParallelismOptions {
                part,
                pad: ThreadCount::None,
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn note_on(part: u32, key: u8) -> SynthEvent {
        SynthEvent::Part(part, PartEvent::Audio(PartAudioEvent::NoteOn { key, vel: 100 }))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = PartGroup::new(PartGroupConfig {
            synth: SynthConfig::new(44100, 256, 1000),
            ..Default::default()
        });
        assert!(matches!(
            result,
            Err(PartGroupError::Config(ConfigError::InvalidOscilSize(1000)))
        ));
    }

    #[test]
    fn test_events_are_routed() {
        let mut group = group(ThreadCount::None);
        assert_eq!(group.part_count(), 16);
        group.send_event(note_on(0, 60));
        group.send_event(note_on(9, 62));
        group.send_event(note_on(40, 64));
        // Cached until the next render
        assert_eq!(group.voice_count(), 0);

        let mut out = vec![0.0; 512];
        group.read_samples(&mut out);
        assert_eq!(group.voice_count(), 2);
        assert_eq!(group.part(9).map(|p| p.voice_count()), Some(1));
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_all_parts_events() {
        let mut group = group(ThreadCount::None);
        for part in 0..4 {
            group.send_event(note_on(part, 60));
        }
        group.send_event(SynthEvent::AllParts(PartEvent::Audio(
            PartAudioEvent::Control(ControlEvent::Raw(cc::ALL_SOUNDS_OFF, 0)),
        )));
        let mut out = vec![0.0; 1024];
        group.read_samples(&mut out);
        assert_eq!(group.voice_count(), 0);
    }

    #[test]
    fn test_config_events_apply_after_cached_notes() {
        let mut group = group(ThreadCount::None);
        group.send_event(note_on(3, 60));
        group.send_event(SynthEvent::Part(
            3,
            PartEvent::Config(PartConfigEvent::SetOptions(Box::new(PartOptions {
                enabled: false,
                ..Default::default()
            }))),
        ));
        assert_eq!(group.voice_count(), 1);
        let mut out = vec![0.0; 512];
        group.read_samples(&mut out);
        assert_eq!(group.voice_count(), 0);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_parallel_render_matches_serial() {
        let mut serial = group(ThreadCount::None);
        let mut parallel = group(ThreadCount::Manual(4));
        for part in 0..16 {
            serial.send_event(note_on(part, 40 + part as u8));
            parallel.send_event(note_on(part, 40 + part as u8));
        }
        let mut a = vec![0.0; 4096];
        let mut b = vec![0.0; 4096];
        serial.read_samples(&mut a);
        parallel.read_samples(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_limiter_keeps_output_in_range() {
        let mut group = group(ThreadCount::Auto);
        for part in 0..16 {
            for key in 40..46 {
                group.send_event(note_on(part, key));
            }
        }
        let mut out = vec![0.0; 22050 * 2];
        group.read_samples(&mut out);
        assert!(out[22050..].iter().all(|s| s.abs() < 1.5));
    }
}
