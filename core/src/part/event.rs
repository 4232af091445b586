use crate::instrument::InstrumentParams;

use super::PartOptions;

#[derive(Debug, Clone)]
pub enum PartConfigEvent {
    /// Replaces the part's instrument. Running notes keep playing.
    SetInstrument(Box<InstrumentParams>),
    /// Replaces the part's options and resets its controllers.
    SetOptions(Box<PartOptions>),
}

#[derive(Debug, Clone, Copy)]
pub enum PartAudioEvent {
    /// Starts a new note. A velocity of 0 releases the key instead.
    NoteOn { key: u8, vel: u8 },
    /// Releases a key
    NoteOff { key: u8 },
    /// Polyphonic aftertouch, moves the velocity of a playing key
    KeyPressure { key: u8, value: u8 },
    /// Releases every note
    AllNotesOff,
    /// Fades every note out within one block
    AllNotesKilled,
    /// Restores the controllers to their defaults
    ResetControl,
    /// Control event for the part
    Control(ControlEvent),
}

#[derive(Debug, Clone)]
pub enum PartEvent {
    /// Audio
    Audio(PartAudioEvent),

    /// Config event for the part
    Config(PartConfigEvent),
}

#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    /// A MIDI control change, controller number and value
    Raw(u8, u8),

    /// The pitch bend range, in semitones
    PitchBendSensitivity(f32),

    /// The pitch bend value, between -1 and 1
    PitchBendValue(f32),
}
