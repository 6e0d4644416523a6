//! Events the processor reports to monitoring and UI layers.
//!
//! Events are pushed to an injected [`EventSink`]. Any `FnMut(SynthEvent)`
//! closure is a sink; [`ChannelEventSink`] hands events to another thread
//! through a bounded channel and drops them when the receiver falls behind.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::master::MasterParameter;
use crate::midi::MidiPatchNamed;
use crate::soundbank::PresetListEntry;

/// Channel state shown by monitoring layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProperty {
    pub voices_amount: usize,
    pub pitch_wheel: u16,
    /// In semitones.
    pub pitch_wheel_range: f32,
    pub is_muted: bool,
    pub is_drum: bool,
    /// In semitones, including the master transposition.
    pub transposition: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SynthEvent {
    NoteOn {
        channel: usize,
        midi_note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: usize,
        midi_note: u8,
    },
    PitchWheel {
        channel: usize,
        value: u16,
    },
    ControllerChange {
        channel: usize,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: usize,
        patch: MidiPatchNamed,
    },
    ChannelPressure {
        channel: usize,
        pressure: u8,
    },
    PolyPressure {
        channel: usize,
        midi_note: u8,
        pressure: u8,
    },
    DrumChange {
        channel: usize,
        is_drum_channel: bool,
    },
    StopAll {
        channel: usize,
        force: bool,
    },
    NewChannel {
        channel: usize,
    },
    MuteChannel {
        channel: usize,
        is_muted: bool,
    },
    PresetListChange {
        presets: Vec<PresetListEntry>,
    },
    AllControllerReset,
    MasterParameterChange(MasterParameter),
    ChannelPropertyChange {
        channel: usize,
        property: ChannelProperty,
    },
}

/// Receives processor events. Called synchronously on the audio thread, so
/// implementations must not block.
pub trait EventSink: Send {
    fn send(&mut self, event: SynthEvent);
}

impl<F> EventSink for F
where
    F: FnMut(SynthEvent) + Send,
{
    fn send(&mut self, event: SynthEvent) {
        self(event)
    }
}

/// Non-blocking sink backed by a bounded crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: Sender<SynthEvent>,
}

impl ChannelEventSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<SynthEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (ChannelEventSink { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&mut self, event: SynthEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Event queue full, event dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Optional sink plus the enable switch.
#[derive(Default)]
pub struct EventDispatcher {
    sink: Option<Box<dyn EventSink>>,
    pub enabled: bool,
}

impl EventDispatcher {
    pub fn new(enabled: bool) -> Self {
        EventDispatcher { sink: None, enabled }
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn EventSink>>) {
        self.sink = sink;
    }

    pub fn emit(&mut self, event: SynthEvent) {
        if !self.enabled {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.send(event);
        }
    }

    /// Build and emit only when someone is listening.
    pub fn emit_with(&mut self, event: impl FnOnce() -> SynthEvent) {
        if self.enabled && self.sink.is_some() {
            self.emit(event());
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("enabled", &self.enabled)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
