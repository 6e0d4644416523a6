//! MIDI channel state machine and the processor that drives it.

pub mod channel;
pub mod controllers;
pub mod data_entry;
pub mod events;
pub mod key_modifiers;
pub mod master;
pub mod processor;
pub mod schedule;
pub mod snapshot;
pub mod sysex;
pub mod voices;

pub use channel::MidiChannel;
pub use controllers::CustomController;
pub use events::{ChannelEventSink, ChannelProperty, EventSink, SynthEvent};
pub use key_modifiers::{KeyMapping, KeyModifier};
pub use master::{MasterParameter, MasterParameters};
pub use processor::Processor;
pub use schedule::ScheduledCommand;
pub use snapshot::{ChannelSnapshot, SynthesizerSnapshot};
pub use voices::StealPolicy;
