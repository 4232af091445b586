//! Wavetable synthesis from long, randomly phased sample tables.
//!
//! Every harmonic of an oscillator is widened into a band shaped by a
//! harmonic profile, and the resulting spectrum is turned into one long
//! looped table per pitch range. Generation runs in the background; notes
//! play whatever bank was last published.

mod params;
pub use params::*;

mod profile;
pub use profile::*;

mod bank;
pub use bank::*;

mod job;
pub use job::*;

mod note;
pub use note::*;
