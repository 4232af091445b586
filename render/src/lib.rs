//! Offline rendering of MIDI files through an adsynth part group.
//!
//! ```no_run
//! use adsynth_render::adsynth_renderer;
//!
//! adsynth_renderer("song.mid", "song.wav")
//!     .with_sample_rate(48000)
//!     .with_progress_callback(|stats| println!("{:.1}s", stats.progress))
//!     .run()
//!     .unwrap();
//! ```

pub mod config;
pub use config::*;

mod rendered;
pub use rendered::*;

pub mod builder;
pub use builder::*;

mod writer;
pub use writer::{AudioFileWriter, AudioWriterState};
