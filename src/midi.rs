//! MIDI vocabulary shared by the channel state machine and the modulator model.
//!
//! The controller table holds 128 CC slots followed by the non-CC modulator
//! sources (pitch wheel, channel pressure, ...) at [`NON_CC_INDEX_OFFSET`].
//! Every slot stores a 14-bit value.

use std::fmt;

use midly::MidiMessage;
use midly::live::LiveEvent;
use serde::{Deserialize, Serialize};

pub const NON_CC_INDEX_OFFSET: usize = 128;
pub const CONTROLLER_TABLE_SIZE: usize = 147;

/// The channel's controller table, 14-bit values.
pub type ControllerTable = [i16; CONTROLLER_TABLE_SIZE];

/// MIDI channel used for percussion on each 16-channel port.
pub const DEFAULT_PERCUSSION: usize = 9;

/// Raw portamento-control value meaning "no previous key".
pub const PORTAMENTO_CONTROL_UNSET: i16 = 1;

/// Controller numbers.
pub mod cc {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION_WHEEL: u8 = 1;
    pub const BREATH_CONTROLLER: u8 = 2;
    pub const FOOT_CONTROLLER: u8 = 4;
    pub const PORTAMENTO_TIME: u8 = 5;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const MAIN_VOLUME: u8 = 7;
    pub const BALANCE: u8 = 8;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const MODULATION_WHEEL_LSB: u8 = 33;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const MAIN_VOLUME_LSB: u8 = 39;
    pub const PAN_LSB: u8 = 42;
    pub const EXPRESSION_LSB: u8 = 43;
    pub const LSB_LAST: u8 = 63;
    pub const SUSTAIN_PEDAL: u8 = 64;
    pub const PORTAMENTO_ON_OFF: u8 = 65;
    pub const SOSTENUTO_PEDAL: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const LEGATO_FOOTSWITCH: u8 = 68;
    pub const HOLD2_PEDAL: u8 = 69;
    pub const SOUND_VARIATION: u8 = 70;
    pub const FILTER_RESONANCE: u8 = 71;
    pub const RELEASE_TIME: u8 = 72;
    pub const ATTACK_TIME: u8 = 73;
    pub const BRIGHTNESS: u8 = 74;
    pub const DECAY_TIME: u8 = 75;
    pub const VIBRATO_RATE: u8 = 76;
    pub const VIBRATO_DEPTH: u8 = 77;
    pub const VIBRATO_DELAY: u8 = 78;
    pub const SOUND_CONTROLLER_10: u8 = 79;
    pub const PORTAMENTO_CONTROL: u8 = 84;
    pub const REVERB_DEPTH: u8 = 91;
    pub const TREMOLO_DEPTH: u8 = 92;
    pub const CHORUS_DEPTH: u8 = 93;
    pub const DETUNE_DEPTH: u8 = 94;
    pub const PHASER_DEPTH: u8 = 95;
    pub const DATA_INCREMENT: u8 = 96;
    pub const DATA_DECREMENT: u8 = 97;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const LOCAL_CONTROL: u8 = 122;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_OFF: u8 = 124;
    pub const OMNI_ON: u8 = 125;
    pub const MONO_ON: u8 = 126;
    pub const POLY_ON: u8 = 127;
}

/// Non-CC modulator source indices. Added to [`NON_CC_INDEX_OFFSET`] they
/// address the controller table.
pub mod source {
    pub const NO_CONTROLLER: u8 = 0;
    pub const NOTE_ON_VELOCITY: u8 = 2;
    pub const NOTE_ON_KEY_NUM: u8 = 3;
    pub const POLY_PRESSURE: u8 = 10;
    pub const CHANNEL_PRESSURE: u8 = 13;
    pub const PITCH_WHEEL: u8 = 14;
    pub const PITCH_WHEEL_RANGE: u8 = 16;
    pub const LINK: u8 = 127;
}

/// Controller table index of a non-CC source.
pub const fn non_cc(source_index: u8) -> usize {
    NON_CC_INDEX_OFFSET + source_index as usize
}

/// Reset values for every controller slot.
pub fn default_controller_values() -> ControllerTable {
    let mut table = [0i16; CONTROLLER_TABLE_SIZE];
    let mut set = |index: usize, value7: i16| table[index] = value7 << 7;
    set(cc::MAIN_VOLUME as usize, 100);
    set(cc::BALANCE as usize, 64);
    set(cc::PAN as usize, 64);
    set(cc::EXPRESSION as usize, 127);
    for c in cc::FILTER_RESONANCE..=cc::SOUND_CONTROLLER_10 {
        set(c as usize, 64);
    }
    set(cc::NRPN_LSB as usize, 127);
    set(cc::NRPN_MSB as usize, 127);
    set(cc::RPN_LSB as usize, 127);
    set(cc::RPN_MSB as usize, 127);
    set(non_cc(source::PITCH_WHEEL_RANGE), 2);
    table[non_cc(source::PITCH_WHEEL)] = 8192;
    table[cc::PORTAMENTO_CONTROL as usize] = PORTAMENTO_CONTROL_UNSET;
    table
}

/// MIDI system variant, which decides bank-select and drum semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthSystem {
    Gm,
    Gm2,
    #[default]
    Gs,
    Xg,
}

impl SynthSystem {
    /// XG reserves these bank MSBs for drum kits.
    pub fn is_xg_drum_bank(self, bank_msb: u8) -> bool {
        self == SynthSystem::Xg && matches!(bank_msb, 120 | 126 | 127)
    }
}

impl fmt::Display for SynthSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthSystem::Gm => "gm",
            SynthSystem::Gm2 => "gm2",
            SynthSystem::Gs => "gs",
            SynthSystem::Xg => "xg",
        };
        f.write_str(name)
    }
}

/// Program and bank addressing of a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MidiPatch {
    pub program: u8,
    #[serde(rename = "bankMSB")]
    pub bank_msb: u8,
    #[serde(rename = "bankLSB")]
    pub bank_lsb: u8,
    /// GM/GS drum kit flag. XG kits use a drum bank instead.
    #[serde(rename = "isGMGSDrum")]
    pub is_gm_gs_drum: bool,
}

impl MidiPatch {
    pub fn new(program: u8, bank_msb: u8, bank_lsb: u8, is_gm_gs_drum: bool) -> Self {
        MidiPatch {
            program,
            bank_msb,
            bank_lsb,
            is_gm_gs_drum,
        }
    }

    pub fn melodic(program: u8) -> Self {
        MidiPatch::new(program, 0, 0, false)
    }

    pub fn drums(program: u8) -> Self {
        MidiPatch::new(program, 0, 0, true)
    }
}

impl fmt::Display for MidiPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_gm_gs_drum {
            write!(f, "DRUMS:{}", self.program)
        } else {
            write!(f, "{}:{}:{}", self.bank_lsb, self.bank_msb, self.program)
        }
    }
}

/// A patch together with the name of the preset it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MidiPatchNamed {
    #[serde(flatten)]
    pub patch: MidiPatch,
    pub name: String,
}

/// A raw message after status decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Channel { channel: u8, message: MidiMessage },
    /// Payload without the leading F0 and trailing F7.
    SystemExclusive(Vec<u8>),
    SystemReset,
}

/// Decode one complete message. Data bytes are masked to 7 bits first, so
/// sloppy senders still get through.
pub fn decode_message(bytes: &[u8]) -> Option<WireMessage> {
    let (&status, data) = bytes.split_first()?;
    match status {
        0xff => Some(WireMessage::SystemReset),
        0xf0 => {
            let payload = data.strip_suffix(&[0xf7]).unwrap_or(data);
            Some(WireMessage::SystemExclusive(payload.to_vec()))
        }
        0x80..=0xef => {
            let masked: Vec<u8> = std::iter::once(status)
                .chain(data.iter().map(|b| b & 0x7f))
                .collect();
            match LiveEvent::parse(&masked).ok()? {
                LiveEvent::Midi { channel, message } => Some(WireMessage::Channel {
                    channel: channel.as_int(),
                    message,
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_14_bit() {
        let t = default_controller_values();
        assert_eq!(t[cc::MAIN_VOLUME as usize], 100 << 7);
        assert_eq!(t[cc::EXPRESSION as usize], 127 << 7);
        assert_eq!(t[non_cc(source::PITCH_WHEEL)], 8192);
        assert_eq!(t[non_cc(source::PITCH_WHEEL_RANGE)] >> 7, 2);
        assert!(t.iter().all(|&v| (0..=16383).contains(&v)));
    }

    #[test]
    fn xg_drum_banks() {
        assert!(SynthSystem::Xg.is_xg_drum_bank(127));
        assert!(!SynthSystem::Gs.is_xg_drum_bank(127));
        assert!(!SynthSystem::Xg.is_xg_drum_bank(0));
    }

    #[test]
    fn patch_serde_names() {
        let json = serde_json::to_string(&MidiPatch::drums(16)).unwrap();
        assert_eq!(json, r#"{"program":16,"bankMSB":0,"bankLSB":0,"isGMGSDrum":true}"#);
        let named = MidiPatchNamed {
            patch: MidiPatch::melodic(0),
            name: "Piano".into(),
        };
        let back: MidiPatchNamed =
            serde_json::from_str(&serde_json::to_string(&named).unwrap()).unwrap();
        assert_eq!(back, named);
    }

    #[test]
    fn system_display() {
        assert_eq!(SynthSystem::Gm2.to_string(), "gm2");
    }

    #[test]
    fn decodes_wire_messages() {
        match decode_message(&[0x93, 60, 0xff]) {
            Some(WireMessage::Channel { channel, message }) => {
                assert_eq!(channel, 3);
                assert!(matches!(
                    message,
                    MidiMessage::NoteOn { key, vel } if key.as_int() == 60 && vel.as_int() == 127
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            decode_message(&[0xf0, 0x7e, 0x7f, 0x09, 0x01, 0xf7]),
            Some(WireMessage::SystemExclusive(vec![0x7e, 0x7f, 0x09, 0x01]))
        );
        assert_eq!(decode_message(&[0xff]), Some(WireMessage::SystemReset));
        assert_eq!(decode_message(&[]), None);
        assert_eq!(decode_message(&[0x90, 60]), None);
        assert_eq!(decode_message(&[0xf8]), None);
    }
}
