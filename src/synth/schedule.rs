//! Time-ordered queue of deferred MIDI commands.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// A MIDI-equivalent call that can be applied now or later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScheduledCommand {
    NoteOn {
        channel: usize,
        midi_note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: usize,
        midi_note: u8,
    },
    ControllerChange {
        channel: usize,
        controller: u8,
        value: u8,
        force: bool,
    },
    ProgramChange {
        channel: usize,
        program: u8,
    },
    PitchWheel {
        channel: usize,
        value: u16,
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
    SystemExclusive {
        data: Vec<u8>,
        channel_offset: usize,
    },
    SystemReset,
}

#[derive(Debug, Clone)]
struct Entry {
    time: f64,
    seq: u64,
    command: ScheduledCommand,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap on `(time, submission order)`.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn push(&mut self, time: f64, command: ScheduledCommand) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { time, seq, command }));
    }

    /// Remove the earliest command due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<ScheduledCommand> {
        if self.heap.peek()?.0.time > now {
            return None;
        }
        self.heap.pop().map(|Reverse(entry)| entry.command)
    }

    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(entry)| entry.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
