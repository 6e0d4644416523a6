//! Per-key overrides of velocity, gain and patch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::midi::MidiPatch;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyModifier {
    /// Replaces the note-on velocity.
    pub velocity: Option<u8>,
    /// Linear gain applied to the key's voices.
    pub gain: f32,
    /// Plays this patch instead of the channel's preset.
    pub patch: Option<MidiPatch>,
}

impl Default for KeyModifier {
    fn default() -> Self {
        KeyModifier {
            velocity: None,
            gain: 1.0,
            patch: None,
        }
    }
}

/// A modifier bound to one key of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    pub channel: usize,
    pub key: u8,
    pub modifier: KeyModifier,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyModifierManager {
    mappings: HashMap<(usize, u8), KeyModifier>,
}

impl KeyModifierManager {
    pub fn new() -> Self {
        KeyModifierManager::default()
    }

    pub fn add_mapping(&mut self, channel: usize, key: u8, modifier: KeyModifier) {
        self.mappings.insert((channel, key), modifier);
    }

    pub fn delete_mapping(&mut self, channel: usize, key: u8) {
        self.mappings.remove(&(channel, key));
    }

    pub fn clear_mappings(&mut self) {
        self.mappings.clear();
    }

    pub fn modifier(&self, channel: usize, key: u8) -> Option<&KeyModifier> {
        self.mappings.get(&(channel, key))
    }

    pub fn velocity(&self, channel: usize, key: u8) -> Option<u8> {
        self.modifier(channel, key).and_then(|m| m.velocity)
    }

    pub fn gain(&self, channel: usize, key: u8) -> f32 {
        self.modifier(channel, key).map_or(1.0, |m| m.gain)
    }

    pub fn patch(&self, channel: usize, key: u8) -> Option<MidiPatch> {
        self.modifier(channel, key).and_then(|m| m.patch)
    }

    /// All mappings, ordered by channel then key.
    pub fn mappings(&self) -> Vec<KeyMapping> {
        let mut out: Vec<KeyMapping> = self
            .mappings
            .iter()
            .map(|(&(channel, key), &modifier)| KeyMapping {
                channel,
                key,
                modifier,
            })
            .collect();
        out.sort_by_key(|m| (m.channel, m.key));
        out
    }

    pub fn set_mappings(&mut self, mappings: &[KeyMapping]) {
        self.mappings = mappings
            .iter()
            .map(|m| ((m.channel, m.key), m.modifier))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_fall_back_to_neutral() {
        let mut m = KeyModifierManager::new();
        assert_eq!(m.velocity(0, 60), None);
        assert_eq!(m.gain(0, 60), 1.0);

        m.add_mapping(
            0,
            60,
            KeyModifier {
                velocity: Some(20),
                gain: 0.5,
                patch: Some(MidiPatch::melodic(5)),
            },
        );
        assert_eq!(m.velocity(0, 60), Some(20));
        assert_eq!(m.gain(0, 60), 0.5);
        assert_eq!(m.patch(0, 60), Some(MidiPatch::melodic(5)));
        assert_eq!(m.velocity(1, 60), None);

        m.delete_mapping(0, 60);
        assert!(m.modifier(0, 60).is_none());
    }

    #[test]
    fn mappings_round_trip_sorted() {
        let mut m = KeyModifierManager::new();
        m.add_mapping(2, 10, KeyModifier::default());
        m.add_mapping(0, 99, KeyModifier::default());
        m.add_mapping(0, 1, KeyModifier::default());
        let list = m.mappings();
        let keys: Vec<_> = list.iter().map(|k| (k.channel, k.key)).collect();
        assert_eq!(keys, vec![(0, 1), (0, 99), (2, 10)]);

        let mut other = KeyModifierManager::new();
        other.set_mappings(&list);
        assert_eq!(other, m);
    }
}
