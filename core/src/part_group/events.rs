use crate::part::PartEvent;

/// Wrapper enum for the events sent to a [`PartGroup`](super::PartGroup).
#[derive(Debug, Clone)]
pub enum SynthEvent {
    /// An event for the part with the given index
    Part(u32, PartEvent),

    /// An event for every part
    AllParts(PartEvent),
}
