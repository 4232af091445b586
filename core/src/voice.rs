use thiserror::Error;

use crate::controller::{Controller, Portamento};

mod envelopes;
pub use envelopes::*;

mod lfo;
pub use lfo::*;

mod phase;
pub use phase::*;

mod unison;
pub use unison::*;

mod legato;
pub use legato::*;

mod modulation;
pub use modulation::*;

mod params;
pub use params::*;

mod mod_filter;
pub use mod_filter::*;

mod engine;
pub use engine::*;

mod note;
pub use note::*;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("Failed to allocate the note's buffers")]
    Alloc(#[from] std::collections::TryReserveError),

    #[error("The note pool is full")]
    PoolFull,

    #[error("The instrument has no enabled voices")]
    NoVoices,
}

/// How a note should be released.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReleaseType {
    /// Standard release. Uses the note's envelopes.
    Standard,

    /// Stops the note at the end of the next block.
    Kill,
}

/// A sounding note of any synthesis engine.
pub trait SynthNote: Send + Sync {
    /// Renders one block into `left` and `right`, overwriting them. Returns
    /// false once the note is silent for good.
    fn noteout(
        &mut self,
        ctl: &Controller,
        portamento: &Portamento,
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool;

    fn signal_release(&mut self, rel_type: ReleaseType);

    fn is_releasing(&self) -> bool;

    fn finished(&self) -> bool;

    /// Moves the note to a new pitch without retriggering its envelopes.
    fn legato(&mut self, trigger: NoteTrigger);

    /// Whether the note is the silent half of a legato pair.
    fn is_silent(&self) -> bool;

    fn set_velocity(&mut self, velocity: f32);

    fn set_pitch(&mut self, log2_freq: f32);

    /// Offsets the note's filter cutoff, in octaves.
    fn set_filter_cutoff(&mut self, octaves: f32);
}
