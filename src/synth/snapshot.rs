//! Serializable synthesizer state.
//!
//! A snapshot captures what a host needs to restore a session: every
//! channel's controllers, locks, patch and tuning, the master parameters and
//! the key modifiers. Applying one assigns the fields directly and
//! re-resolves presets without emitting program changes.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::channel::MidiChannel;
use super::controllers::{ControllerLocks, CUSTOM_CONTROLLER_COUNT};
use super::key_modifiers::KeyMapping;
use super::master::MasterParameters;
use super::processor::Processor;
use crate::dsp::voice::ChannelVibrato;
use crate::error::Result;
use crate::midi::{CONTROLLER_TABLE_SIZE, MidiPatchNamed, SynthSystem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub channel_number: usize,
    pub patch: MidiPatchNamed,
    pub lock_preset: bool,
    pub locked_system: SynthSystem,
    pub controllers: Vec<i16>,
    pub locked_controllers: Vec<bool>,
    pub custom_controllers: Vec<f32>,
    pub lock_vibrato: bool,
    pub channel_vibrato: ChannelVibrato,
    /// Channel transposition in semitones.
    pub key_shift: f32,
    pub octave_tuning: Vec<i8>,
    pub is_muted: bool,
    pub drum_channel: bool,
}

impl ChannelSnapshot {
    pub fn capture(channel: &MidiChannel) -> Self {
        let name = channel
            .preset
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        ChannelSnapshot {
            channel_number: channel.number,
            patch: MidiPatchNamed {
                patch: channel.patch,
                name,
            },
            lock_preset: channel.lock_preset,
            locked_system: channel.locked_system,
            controllers: channel.controllers.to_vec(),
            locked_controllers: channel.locked_controllers.to_vec(),
            custom_controllers: channel.custom_controllers.to_vec(),
            lock_vibrato: channel.lock_vibrato,
            channel_vibrato: channel.vibrato,
            key_shift: channel.transposition,
            octave_tuning: channel.octave_tuning.to_vec(),
            is_muted: channel.is_muted,
            drum_channel: channel.drum_channel,
        }
    }

    /// Copy the captured state onto `channel`. Short arrays leave the
    /// remaining slots untouched.
    pub fn restore(&self, channel: &mut MidiChannel) {
        channel.patch = self.patch.patch;
        channel.lock_preset = self.lock_preset;
        channel.locked_system = self.locked_system;
        let n = self.controllers.len().min(CONTROLLER_TABLE_SIZE);
        channel.controllers[..n].copy_from_slice(&self.controllers[..n]);
        channel.locked_controllers = ControllerLocks::from_slice(&self.locked_controllers);
        let n = self.custom_controllers.len().min(CUSTOM_CONTROLLER_COUNT);
        channel.custom_controllers[..n].copy_from_slice(&self.custom_controllers[..n]);
        channel.lock_vibrato = self.lock_vibrato;
        channel.vibrato = self.channel_vibrato;
        channel.transposition = self.key_shift;
        for (slot, &cents) in channel.octave_tuning.iter_mut().zip(&self.octave_tuning) {
            *slot = cents;
        }
        channel.is_muted = self.is_muted;
        channel.drum_channel = self.drum_channel;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizerSnapshot {
    pub channel_snapshots: Vec<ChannelSnapshot>,
    pub master_parameters: MasterParameters,
    pub key_mappings: Vec<KeyMapping>,
}

impl SynthesizerSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Processor {
    pub fn get_snapshot(&self) -> SynthesizerSnapshot {
        SynthesizerSnapshot {
            channel_snapshots: self.channels.iter().map(ChannelSnapshot::capture).collect(),
            master_parameters: self.state.master.clone(),
            key_mappings: self.state.key_modifiers.mappings(),
        }
    }

    /// Restore a snapshot. Missing channels are created; sounding voices are
    /// dropped.
    pub fn apply_snapshot(&mut self, snapshot: &SynthesizerSnapshot) {
        info!(channels = snapshot.channel_snapshots.len(), "Applying snapshot");
        self.state.master = snapshot.master_parameters.clone();
        self.state.key_modifiers.set_mappings(&snapshot.key_mappings);
        for saved in &snapshot.channel_snapshots {
            while self.channels.len() <= saved.channel_number {
                self.create_channel();
            }
            let channel = &mut self.channels[saved.channel_number];
            channel.voices.clear();
            saved.restore(channel);
            let drum_channel = channel.drum_channel;
            channel.resolve_preset(&self.state);
            channel.drum_channel = drum_channel;
            channel.recompute_voices(None);
        }
    }
}
