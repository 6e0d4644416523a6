//! Controller handling for a MIDI channel.
//!
//! Wire CCs arrive as 7-bit values and are stored 14-bit. LSB controllers
//! (33–63, except data entry) are merged into their MSB partner. After a
//! change, only the modulators that read the changed controller are
//! recomputed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::channel::MidiChannel;
use super::events::SynthEvent;
use super::processor::SynthState;
use crate::midi::{cc, default_controller_values, non_cc, source, CONTROLLER_TABLE_SIZE};

/// Channel parameters that are not MIDI controllers but behave like them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomController {
    /// RPN fine tuning, in cents.
    ChannelTuning,
    /// RPN coarse tuning, in semitones.
    ChannelTuningSemitones,
    /// Vibrato depth multiplier from RPN 5.
    ModulationMultiplier,
    /// Sysex master tuning, in cents.
    MasterTuning,
    /// Sysex key shift, in semitones.
    ChannelKeyShift,
    /// Generator index being built by SF2 NRPN LSBs.
    Sf2NrpnGeneratorLsb,
}

pub const CUSTOM_CONTROLLER_COUNT: usize = 6;

impl CustomController {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn defaults() -> [f32; CUSTOM_CONTROLLER_COUNT] {
        let mut values = [0.0; CUSTOM_CONTROLLER_COUNT];
        values[CustomController::ModulationMultiplier.index()] = 1.0;
        values
    }
}

/// One bit per controller table slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerLocks([u64; 3]);

impl ControllerLocks {
    pub fn set(&mut self, index: usize, locked: bool) {
        if index >= CONTROLLER_TABLE_SIZE {
            return;
        }
        let (word, bit) = (index / 64, index % 64);
        if locked {
            self.0[word] |= 1 << bit;
        } else {
            self.0[word] &= !(1 << bit);
        }
    }

    pub fn is_locked(&self, index: usize) -> bool {
        index < CONTROLLER_TABLE_SIZE && (self.0[index / 64] & (1 << (index % 64))) != 0
    }

    pub fn to_vec(&self) -> Vec<bool> {
        (0..CONTROLLER_TABLE_SIZE).map(|i| self.is_locked(i)).collect()
    }

    pub fn from_slice(locked: &[bool]) -> Self {
        let mut locks = ControllerLocks::default();
        for (i, &l) in locked.iter().enumerate() {
            locks.set(i, l);
        }
        locks
    }
}

/// Left alone by reset-all-controllers (RP-15).
fn survives_rp15_reset(controller: u8) -> bool {
    matches!(
        controller,
        cc::BANK_SELECT
            | cc::BANK_SELECT_LSB
            | cc::MAIN_VOLUME
            | cc::MAIN_VOLUME_LSB
            | cc::PAN
            | cc::PAN_LSB
            | cc::REVERB_DEPTH
            | cc::TREMOLO_DEPTH
            | cc::CHORUS_DEPTH
            | cc::DETUNE_DEPTH
            | cc::PHASER_DEPTH
            | cc::PORTAMENTO_CONTROL
            | cc::SOUND_VARIATION..=cc::SOUND_CONTROLLER_10
            | cc::LOCAL_CONTROL..=cc::POLY_ON
    )
}

impl MidiChannel {
    /// Apply a controller change. Indices of 128 and above address the
    /// non-CC part of the table and need `force`.
    pub(crate) fn controller_change(
        &mut self,
        state: &mut SynthState,
        controller: u8,
        value: u8,
        force: bool,
    ) {
        let value = value & 0x7f;
        let index = controller as usize;
        if index >= CONTROLLER_TABLE_SIZE {
            return;
        }
        if index > 127 {
            if !force {
                return;
            }
            self.controllers[index] = (value as i16) << 7;
            self.recompute_voices(Some((false, controller - 128)));
            return;
        }

        if (cc::MODULATION_WHEEL_LSB..=cc::LSB_LAST).contains(&controller)
            && controller != cc::DATA_ENTRY_LSB
        {
            let msb = index - 32;
            if force || !self.locked_controllers.is_locked(msb) {
                self.controllers[msb] = (self.controllers[msb] & 0x3f80) | value as i16;
                self.recompute_voices(Some((true, msb as u8)));
            }
        }

        if self.locked_controllers.is_locked(index) && !force {
            return;
        }
        self.controllers[index] = (value as i16) << 7;

        match controller {
            cc::ALL_NOTES_OFF => self.stop_all_notes(state, false),
            cc::ALL_SOUND_OFF => self.stop_all_notes(state, true),
            cc::BANK_SELECT => self.set_bank_msb(state, value),
            cc::BANK_SELECT_LSB => {
                if !self.lock_preset {
                    self.patch.bank_lsb = value;
                }
            }
            cc::RPN_LSB | cc::RPN_MSB | cc::NRPN_LSB | cc::NRPN_MSB => {
                self.select_parameter(controller, value)
            }
            cc::DATA_ENTRY_MSB => self.data_entry_coarse(state, value),
            cc::DATA_ENTRY_LSB => self.data_entry_fine(value),
            cc::RESET_ALL_CONTROLLERS => self.reset_controllers_rp15(state),
            cc::SUSTAIN_PEDAL => {
                if value < 64 {
                    self.release_sustained(state);
                }
                self.recompute_voices(Some((true, controller)));
            }
            _ => self.recompute_voices(Some((true, controller))),
        }

        state.events.emit(SynthEvent::ControllerChange {
            channel: self.number,
            controller,
            value,
        });
    }

    /// Reset-all-controllers per RP-15: volume, pan, banks, effect depths
    /// and sound controllers stay as they are.
    pub(crate) fn reset_controllers_rp15(&mut self, state: &mut SynthState) {
        debug!(channel = self.number, "Reset all controllers");
        let defaults = default_controller_values();
        for controller in 0..128u8 {
            let i = controller as usize;
            if survives_rp15_reset(controller) || self.locked_controllers.is_locked(i) {
                continue;
            }
            self.controllers[i] = defaults[i];
        }
        for s in [source::PITCH_WHEEL, source::CHANNEL_PRESSURE] {
            let i = non_cc(s);
            if !self.locked_controllers.is_locked(i) {
                self.controllers[i] = defaults[i];
            }
        }
        self.data_entry = Default::default();
        self.release_sustained(state);
        self.recompute_voices(None);
    }

    /// Full reset used by system resets. Locked controllers keep their value.
    pub(crate) fn reset_controllers(&mut self) {
        let defaults = default_controller_values();
        for (i, value) in defaults.iter().enumerate() {
            if !self.locked_controllers.is_locked(i) {
                self.controllers[i] = *value;
            }
        }
        self.custom_controllers = CustomController::defaults();
        self.octave_tuning = [0; 12];
        if !self.lock_vibrato {
            self.vibrato = Default::default();
        }
        self.random_pan = false;
        self.data_entry = Default::default();
        self.reset_generator_overrides();
        self.reset_generator_offsets();
        for v in &mut self.voices {
            v.sustained = false;
        }
        self.recompute_voices(None);
    }

    /// Set a custom controller and refresh everything that depends on it.
    pub fn set_custom_controller(&mut self, controller: CustomController, value: f32) {
        self.custom_controllers[controller.index()] = value;
        if controller == CustomController::ModulationMultiplier {
            self.recompute_voices(None);
        }
    }

    pub fn custom_controller(&self, controller: CustomController) -> f32 {
        self.custom_controllers[controller.index()]
    }

    pub fn lock_controller(&mut self, index: usize, locked: bool) {
        self.locked_controllers.set(index, locked);
    }
}
