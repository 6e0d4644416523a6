//! System exclusive decoding: GM/GS/XG resets, master volume, tuning and
//! pan, GS rhythm-part assignment and MIDI Tuning Standard messages.
//!
//! Payloads arrive without the F0/F7 framing.

use tracing::{debug, info, warn};

use super::controllers::CustomController;
use super::master::MasterParameter;
use super::processor::Processor;
use crate::dsp::voice::KeyTuning;
use crate::midi::SynthSystem;

const NON_REALTIME: u8 = 0x7e;
const REALTIME: u8 = 0x7f;
const ROLAND: u8 = 0x41;
const YAMAHA: u8 = 0x43;

const BROADCAST_DEVICE: u8 = 0x7f;

/// GS part number (the low nibble of the address) to MIDI channel.
const GS_PART_TO_CHANNEL: [usize; 16] = [9, 0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 15];

/// 14-bit value from LSB, MSB.
fn u14(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7f) << 7) | (lsb as u16 & 0x7f)
}

/// Three MTS bytes: target semitone and a 14-bit fraction of 100 cents.
/// 7F 7F 7F means "no change".
fn mts_tuning(bytes: &[u8]) -> Option<KeyTuning> {
    let &[semitone, msb, lsb] = bytes else {
        return None;
    };
    if (semitone, msb, lsb) == (0x7f, 0x7f, 0x7f) {
        return None;
    }
    Some(KeyTuning {
        midi_note: Some(semitone & 0x7f),
        cents: u14(lsb, msb) as f32 * 100.0 / 16384.0,
    })
}

impl Processor {
    fn accepts_device(&self, device: u8) -> bool {
        let filter = self.state.master.device_id;
        filter == -1 || device == BROADCAST_DEVICE || device as i32 == filter
    }

    pub(super) fn apply_system_exclusive(&mut self, data: &[u8], channel_offset: usize) {
        let Some((&manufacturer, rest)) = data.split_first() else {
            return;
        };
        let device = rest.first().copied().unwrap_or(BROADCAST_DEVICE);
        if manufacturer != YAMAHA && !self.accepts_device(device & 0x7f) {
            debug!(device, "Sysex for another device ignored");
            return;
        }
        let handled = match manufacturer {
            NON_REALTIME | REALTIME => {
                let body = rest.get(1..).unwrap_or_default();
                self.universal_sysex(manufacturer, body, channel_offset)
            }
            ROLAND => self.roland_sysex(rest, channel_offset),
            YAMAHA => self.yamaha_sysex(rest),
            _ => false,
        };
        if !handled {
            warn!(?data, "Unrecognized system exclusive dropped");
        }
    }

    /// `data` starts at the sub-ID #1, after the device byte.
    fn universal_sysex(&mut self, kind: u8, data: &[u8], channel_offset: usize) -> bool {
        match (kind, data) {
            (NON_REALTIME, [0x09, 0x01, ..]) => self.set_system_and_reset(SynthSystem::Gm),
            // GM off falls back to GS.
            (NON_REALTIME, [0x09, 0x02, ..]) => self.set_system_and_reset(SynthSystem::Gs),
            (NON_REALTIME, [0x09, 0x03, ..]) => self.set_system_and_reset(SynthSystem::Gm2),

            (REALTIME, [0x04, 0x01, lsb, msb, ..]) => {
                self.state.midi_volume = u14(*lsb, *msb) as f32 / 16383.0;
                debug!(volume = self.state.midi_volume, "Master volume");
            }
            (REALTIME, [0x04, 0x03, lsb, msb, ..]) => {
                let cents = (u14(*lsb, *msb) as f32 - 8192.0) / 8192.0 * 100.0;
                self.state.master_fine_tuning = cents;
                self.apply_master_tuning();
            }
            (REALTIME, [0x04, 0x04, _, msb, ..]) => {
                self.state.master_coarse_tuning = (*msb as f32 - 64.0) * 100.0;
                self.apply_master_tuning();
            }

            (REALTIME, [0x08, 0x02, program, count, entries @ ..]) => {
                self.single_note_tuning(*program, *count, entries);
            }
            (NON_REALTIME | REALTIME, [0x08, 0x07, _bank, program, count, entries @ ..]) => {
                self.single_note_tuning(*program, *count, entries);
            }
            (NON_REALTIME | REALTIME, [0x08, 0x08, ff, gg, hh, tuning @ ..]) if tuning.len() >= 12 => {
                let mut octave = [0i8; 12];
                for (cents, &raw) in octave.iter_mut().zip(tuning) {
                    *cents = (raw & 0x7f) as i8 - 64;
                }
                // Mask bytes: ff holds channels 14-15, gg 7-13, hh 0-6.
                let mask = ((*ff as u32 & 0x03) << 14) | ((*gg as u32 & 0x7f) << 7) | (*hh as u32 & 0x7f);
                for channel in (0..16).filter(|c| mask & (1 << c) != 0) {
                    if let Some(ch) = self.channels.get_mut(channel + channel_offset) {
                        ch.set_octave_tuning(octave);
                    }
                }
                debug!(mask, ?octave, "Octave tuning");
            }
            _ => return false,
        }
        true
    }

    fn single_note_tuning(&mut self, program: u8, count: u8, entries: &[u8]) {
        for entry in entries.chunks_exact(4).take(count as usize) {
            if let Some(tuning) = mts_tuning(&entry[1..]) {
                self.state.tunings.set(program, entry[0], tuning);
            }
        }
        debug!(program, count, "Single note tuning");
    }

    fn apply_master_tuning(&mut self) {
        let cents = self.state.master_fine_tuning + self.state.master_coarse_tuning;
        for channel in &mut self.channels {
            channel.set_custom_controller(CustomController::MasterTuning, cents);
        }
        debug!(cents, "Master tuning");
    }

    fn set_system_and_reset(&mut self, system: SynthSystem) {
        info!(%system, "MIDI system reset");
        self.state.master.midi_system = system;
        self.reset_channels();
    }

    /// `data`: device, model, command, address (3 bytes), values, checksum.
    fn roland_sysex(&mut self, data: &[u8], channel_offset: usize) -> bool {
        let [_device, 0x42, 0x12, a1, a2, a3, values @ ..] = data else {
            return false;
        };
        // Drop the checksum.
        let values = match values {
            [v @ .., _checksum] if !v.is_empty() => v,
            _ => values,
        };
        let Some(&value) = values.first() else {
            return false;
        };
        match (*a1, *a2, *a3) {
            (0x40, 0x00, 0x7f) | (0x00, 0x00, 0x7f) => {
                self.set_system_and_reset(SynthSystem::Gs);
            }
            (0x40, 0x00, 0x04) => {
                self.state.midi_volume = value as f32 / 127.0;
                debug!(volume = self.state.midi_volume, "GS master volume");
            }
            (0x40, 0x00, 0x06) => {
                let pan = (value as f32 - 64.0) / 64.0;
                self.set_master_parameter(MasterParameter::MasterPan(pan));
            }
            (0x40, part, 0x15) if part & 0xf0 == 0x10 => {
                let channel = GS_PART_TO_CHANNEL[(part & 0x0f) as usize] + channel_offset;
                debug!(channel, is_drum = value > 0, "GS use for rhythm part");
                self.set_drums(channel, value > 0);
            }
            _ => return false,
        }
        true
    }

    /// `data`: device, model, address (3 bytes), values.
    fn yamaha_sysex(&mut self, data: &[u8]) -> bool {
        match data {
            [device, 0x4c, 0x00, 0x00, 0x7e, 0x00, ..] if device & 0xf0 == 0x10 => {
                self.set_system_and_reset(SynthSystem::Xg);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SynthConfig;
    use crate::midi::MidiPatch;
    use crate::soundbank::generator::GeneratorType as G;
    use crate::soundbank::{Instrument, Preset, Sample, SoundBank, Zone};

    fn processor() -> Processor {
        let mut bank = SoundBank::new("sysex");
        let s = bank.add_sample(Sample::new("dc", vec![0.5; 64], 44100, 60).with_loop(8, 56));
        let i = bank.add_instrument(Instrument::new("i").zone(Zone::new().with(G::SampleModes, 1), s));
        bank.add_preset(Preset::new("Melodic", MidiPatch::melodic(0)).zone(Zone::new(), i));
        bank.add_preset(Preset::new("Drums", MidiPatch::drums(0)).zone(Zone::new(), i));
        let mut p = Processor::new(SynthConfig::default());
        p.set_sound_bank(Arc::new(bank));
        p
    }

    fn send(p: &mut Processor, framed: &[u8]) {
        p.process_message(framed, 0, false, None);
    }

    #[test]
    fn mts_entry_decoding() {
        let t = mts_tuning(&[61, 0x40, 0x00]).unwrap();
        assert_eq!(t.midi_note, Some(61));
        assert!((t.cents - 50.0).abs() < 1e-4);
        assert!(mts_tuning(&[0x7f, 0x7f, 0x7f]).is_none());
        assert!(mts_tuning(&[1, 2]).is_none());
    }

    #[test]
    fn gm_on_switches_system() {
        let mut p = processor();
        send(&mut p, &[0xf0, 0x7e, 0x7f, 0x09, 0x01, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gm);
        send(&mut p, &[0xf0, 0x7e, 0x7f, 0x09, 0x03, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gm2);
        send(&mut p, &[0xf0, 0x43, 0x10, 0x4c, 0x00, 0x00, 0x7e, 0x00, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Xg);
        send(&mut p, &[0xf0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7f, 0x00, 0x41, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gs);
    }

    #[test]
    fn master_volume_and_tuning() {
        let mut p = processor();
        send(&mut p, &[0xf0, 0x7f, 0x7f, 0x04, 0x01, 0x00, 0x40, 0xf7]);
        assert!((p.state.midi_volume - 8192.0 / 16383.0).abs() < 1e-6);

        send(&mut p, &[0xf0, 0x7f, 0x7f, 0x04, 0x04, 0x00, 0x42, 0xf7]);
        send(&mut p, &[0xf0, 0x7f, 0x7f, 0x04, 0x03, 0x00, 0x60, 0xf7]);
        let tuning = p.channel(3).unwrap().custom_controller(CustomController::MasterTuning);
        assert!((tuning - 250.0).abs() < 1e-3);
    }

    #[test]
    fn gs_rhythm_part_and_pan() {
        let mut p = processor();
        // Part 2 is channel 1.
        send(&mut p, &[0xf0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x12, 0x15, 0x01, 0x18, 0xf7]);
        let ch = p.channel(1).unwrap();
        assert!(ch.drum_channel);
        assert_eq!(ch.preset.as_ref().unwrap().name, "Drums");

        send(&mut p, &[0xf0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x06, 0x00, 0x3a, 0xf7]);
        assert_eq!(p.master_parameters().master_pan, -1.0);
    }

    #[test]
    fn single_note_tuning_changes_target_key() {
        let mut p = processor();
        send(&mut p, &[0xf0, 0x7f, 0x7f, 0x08, 0x02, 0x00, 0x01, 60, 62, 0x00, 0x00, 0xf7]);
        let table = p.state.tunings.get(0).unwrap();
        assert_eq!(table[60].midi_note, Some(62));
        assert_eq!(table[61].midi_note, None);
    }

    #[test]
    fn octave_tuning_respects_channel_mask() {
        let mut p = processor();
        let mut msg = vec![0xf0, 0x7e, 0x7f, 0x08, 0x08, 0x00, 0x00, 0x05];
        msg.extend([64 + 10, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 54]);
        msg.push(0xf7);
        send(&mut p, &msg);
        assert_eq!(p.channel(0).unwrap().octave_tuning[0], 10);
        assert_eq!(p.channel(0).unwrap().octave_tuning[11], -10);
        assert_eq!(p.channel(2).unwrap().octave_tuning[0], 10);
        assert_eq!(p.channel(1).unwrap().octave_tuning[0], 0);
    }

    #[test]
    fn device_id_filter() {
        let mut p = processor();
        p.set_master_parameter(MasterParameter::DeviceId(0x10));
        send(&mut p, &[0xf0, 0x7e, 0x11, 0x09, 0x01, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gs);
        send(&mut p, &[0xf0, 0x7e, 0x10, 0x09, 0x01, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gm);
    }

    #[test]
    fn unknown_sysex_is_ignored() {
        let mut p = processor();
        send(&mut p, &[0xf0, 0x7d, 0x01, 0x02, 0xf7]);
        send(&mut p, &[0xf0, 0xf7]);
        assert_eq!(p.master_parameters().midi_system, SynthSystem::Gs);
    }
}
