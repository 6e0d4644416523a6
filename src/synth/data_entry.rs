//! RPN / NRPN data entry.
//!
//! Selecting a parameter moves the channel into an `Rp*` or `Nrp*` state;
//! data entry then applies it and moves to `DataCoarse`/`DataFine` while
//! remembering which kind of parameter is addressed. A null parameter
//! (127/127) returns to `Idle` and leaves every value as it was.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::channel::MidiChannel;
use super::controllers::CustomController;
use super::processor::SynthState;
use crate::midi::{cc, non_cc, source};
use crate::soundbank::generator::{GeneratorType, GENERATORS_AMOUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataEntryState {
    #[default]
    Idle,
    RpCoarse,
    RpFine,
    NrpCoarse,
    NrpFine,
    DataCoarse,
    DataFine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterKind {
    Registered,
    NonRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataEntry {
    pub state: DataEntryState,
    target: Option<ParameterKind>,
}

/// Registered parameter numbers.
mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0x0000;
    pub const FINE_TUNING: u16 = 0x0001;
    pub const COARSE_TUNING: u16 = 0x0002;
    pub const MODULATION_DEPTH: u16 = 0x0005;
}

/// NRPN MSB values and GS part parameters.
mod nrpn {
    pub const PART_PARAMETER: u8 = 0x01;
    pub const SF2: u8 = 120;

    pub const VIBRATO_RATE: u8 = 0x08;
    pub const VIBRATO_DEPTH: u8 = 0x09;
    pub const VIBRATO_DELAY: u8 = 0x0a;
    pub const FILTER_CUTOFF: u8 = 0x20;
    pub const FILTER_RESONANCE: u8 = 0x21;
    pub const ATTACK_TIME: u8 = 0x63;
    pub const DECAY_TIME: u8 = 0x64;
    pub const RELEASE_TIME: u8 = 0x66;
}

impl MidiChannel {
    fn controller7(&self, controller: u8) -> u8 {
        (self.controllers[controller as usize] >> 7) as u8
    }

    fn rpn_number(&self) -> u16 {
        ((self.controller7(cc::RPN_MSB) as u16) << 7) | self.controller7(cc::RPN_LSB) as u16
    }

    /// Handle CC 98–101.
    pub(crate) fn select_parameter(&mut self, controller: u8, value: u8) {
        let (state, kind) = match controller {
            cc::RPN_LSB => (DataEntryState::RpFine, ParameterKind::Registered),
            cc::RPN_MSB => (DataEntryState::RpCoarse, ParameterKind::Registered),
            cc::NRPN_MSB => {
                self.custom_controllers[CustomController::Sf2NrpnGeneratorLsb.index()] = 0.0;
                (DataEntryState::NrpCoarse, ParameterKind::NonRegistered)
            }
            _ => {
                if self.controller7(cc::NRPN_MSB) == nrpn::SF2 {
                    self.accumulate_sf2_generator(value);
                }
                (DataEntryState::NrpFine, ParameterKind::NonRegistered)
            }
        };

        let is_null = match kind {
            ParameterKind::Registered => {
                self.controller7(cc::RPN_MSB) == 127 && self.controller7(cc::RPN_LSB) == 127
            }
            ParameterKind::NonRegistered => {
                self.controller7(cc::NRPN_MSB) == 127 && self.controller7(cc::NRPN_LSB) == 127
            }
        };
        self.data_entry = if is_null {
            DataEntry::default()
        } else {
            DataEntry {
                state,
                target: Some(kind),
            }
        };
    }

    /// SF2 NRPN LSBs 100/101/102 add 100/1000/10000 to the generator index;
    /// anything below 100 adds itself.
    fn accumulate_sf2_generator(&mut self, value: u8) {
        let slot = &mut self.custom_controllers[CustomController::Sf2NrpnGeneratorLsb.index()];
        if *slot % 100.0 != 0.0 {
            *slot = 0.0;
        }
        *slot += match value {
            100 => 100.0,
            101 => 1000.0,
            102 => 10000.0,
            v if v < 100 => v as f32,
            _ => 0.0,
        };
    }

    pub(crate) fn data_entry_coarse(&mut self, state: &mut SynthState, value: u8) {
        match self.data_entry.target {
            Some(ParameterKind::Registered) => self.apply_rpn(value, None),
            Some(ParameterKind::NonRegistered) => self.apply_nrpn_coarse(state, value),
            None => return,
        }
        self.data_entry.state = DataEntryState::DataCoarse;
    }

    pub(crate) fn data_entry_fine(&mut self, value: u8) {
        match self.data_entry.target {
            Some(ParameterKind::Registered) => {
                let coarse = self.controller7(cc::DATA_ENTRY_MSB);
                self.apply_rpn(coarse, Some(value));
            }
            Some(ParameterKind::NonRegistered) => {
                if self.controller7(cc::NRPN_MSB) == nrpn::SF2 {
                    let coarse = self.controller7(cc::DATA_ENTRY_MSB) as i32;
                    self.apply_sf2_offset(((coarse << 7) | value as i32) - 8192);
                }
            }
            None => return,
        }
        self.data_entry.state = DataEntryState::DataFine;
    }

    /// `fine` is `None` when only the MSB has arrived.
    fn apply_rpn(&mut self, coarse: u8, fine: Option<u8>) {
        let number = self.rpn_number();
        match number {
            rpn::PITCH_BEND_RANGE => {
                let range = ((coarse as i16) << 7) | fine.unwrap_or(0) as i16;
                self.controllers[non_cc(source::PITCH_WHEEL_RANGE)] = range;
                self.recompute_voices(Some((false, source::PITCH_WHEEL_RANGE)));
                debug!(channel = self.number, semitones = coarse, cents = fine.unwrap_or(0), "Pitch bend range");
            }
            rpn::FINE_TUNING => {
                let raw = (coarse as i32 - 64) * 128 + fine.unwrap_or(0) as i32;
                let cents = raw as f32 / 8192.0 * 100.0;
                self.set_custom_controller(CustomController::ChannelTuning, cents);
                debug!(channel = self.number, cents, "Fine tuning");
            }
            rpn::COARSE_TUNING => {
                let semitones = coarse as f32 - 64.0;
                self.set_custom_controller(CustomController::ChannelTuningSemitones, semitones);
                debug!(channel = self.number, semitones, "Coarse tuning");
            }
            rpn::MODULATION_DEPTH => {
                let cents = coarse as f32 * 100.0 + fine.unwrap_or(0) as f32 / 128.0 * 100.0;
                self.set_custom_controller(CustomController::ModulationMultiplier, cents / 50.0);
                debug!(channel = self.number, cents, "Modulation depth");
            }
            other => warn!(channel = self.number, rpn = other, "Unrecognized RPN"),
        }
    }

    fn apply_nrpn_coarse(&mut self, state: &mut SynthState, value: u8) {
        let msb = self.controller7(cc::NRPN_MSB);
        let lsb = self.controller7(cc::NRPN_LSB);
        match msb {
            nrpn::PART_PARAMETER => {
                if self.lock_gs_nrpn_params {
                    return;
                }
                self.apply_gs_part_parameter(state, lsb, value);
            }
            nrpn::SF2 => {
                let fine = self.controller7(cc::DATA_ENTRY_LSB) as i32;
                self.apply_sf2_offset((((value as i32) << 7) | fine) - 8192);
            }
            _ => {
                if value != 64 {
                    warn!(channel = self.number, msb, lsb, value, "Unrecognized NRPN");
                }
            }
        }
    }

    fn apply_gs_part_parameter(&mut self, state: &mut SynthState, parameter: u8, value: u8) {
        let target = match parameter {
            nrpn::VIBRATO_RATE | nrpn::VIBRATO_DEPTH | nrpn::VIBRATO_DELAY => {
                if value == 64 || self.lock_vibrato {
                    return;
                }
                self.add_default_vibrato();
                let v = value as f64;
                match parameter {
                    nrpn::VIBRATO_RATE => self.vibrato.rate = v / 64.0 * 8.0,
                    nrpn::VIBRATO_DEPTH => self.vibrato.depth = v / 2.0,
                    _ => self.vibrato.delay = v / 64.0 / 3.0,
                }
                debug!(channel = self.number, vibrato = ?self.vibrato, "GS vibrato");
                return;
            }
            nrpn::FILTER_CUTOFF => cc::BRIGHTNESS,
            nrpn::FILTER_RESONANCE => cc::FILTER_RESONANCE,
            nrpn::ATTACK_TIME => cc::ATTACK_TIME,
            nrpn::DECAY_TIME => cc::DECAY_TIME,
            nrpn::RELEASE_TIME => cc::RELEASE_TIME,
            _ => {
                if value != 64 {
                    warn!(channel = self.number, parameter, value, "Unrecognized GS NRPN");
                }
                return;
            }
        };
        self.controller_change(state, target, value, false);
    }

    fn add_default_vibrato(&mut self) {
        let v = &mut self.vibrato;
        if v.rate == 0.0 && v.depth == 0.0 && v.delay == 0.0 {
            v.rate = 8.0;
            v.depth = 50.0;
            v.delay = 0.6;
        }
    }

    fn apply_sf2_offset(&mut self, offset: i32) {
        let generator = self.custom_controller(CustomController::Sf2NrpnGeneratorLsb) as usize;
        if generator >= GENERATORS_AMOUNT {
            warn!(channel = self.number, generator, "SF2 NRPN for an unknown generator");
            return;
        }
        let scale = GeneratorType::all()[generator].limits().nrpn;
        self.set_generator_offset(generator, offset * scale);
        debug!(channel = self.number, generator, offset, "SF2 NRPN generator offset");
    }
}
