//! An additive synthesis engine.
//!
//! Spectral oscillators are built from harmonic tables with an FFT, voices
//! layer them with unison and cross modulation, and parts manage the notes
//! of one MIDI channel each. A [`PartGroup`](part_group::PartGroup) mixes
//! several parts into interleaved stereo through the [`AudioPipe`] trait.

pub mod config;

pub mod controller;

pub mod helpers;

pub mod oscillator;

pub mod effects;

pub mod voice;

pub mod polyphony;

pub mod pad;

pub mod instrument;

pub mod part;

pub mod part_group;

mod audio_pipe;
pub use audio_pipe::*;

mod audio_stream;
pub use audio_stream::*;
