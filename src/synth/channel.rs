//! Persistent per-channel state.
//!
//! A [`MidiChannel`] owns its controller table, tuning, vibrato and the
//! voices it started. It turns MIDI semantics (note on/off, program change,
//! sustain, portamento, exclusive classes) into voice creation and
//! mutation. Controller handling lives in `controllers.rs` and RPN/NRPN
//! handling in `data_entry.rs`.

use rand::Rng;
use tracing::{debug, warn};

use super::controllers::{ControllerLocks, CustomController, CUSTOM_CONTROLLER_COUNT};
use super::data_entry::DataEntry;
use super::events::{ChannelProperty, SynthEvent};
use super::master::MasterParameters;
use super::processor::SynthState;
use crate::dsp::voice::{ChannelVibrato, ForcedRelease, Voice};
use crate::midi::{
    cc, default_controller_values, non_cc, source, ControllerTable, MidiPatch, SynthSystem,
    DEFAULT_PERCUSSION, PORTAMENTO_CONTROL_UNSET,
};
use crate::soundbank::generator::{saturate_i16, GeneratorArray, GeneratorType as G, GENERATORS_AMOUNT};
use crate::soundbank::PresetHandle;

/// Generator override value meaning "leave the generator alone".
pub const GENERATOR_OVERRIDE_NO_CHANGE: i16 = 32767;

/// Release used by [`MidiChannel::kill_note`] by default, in timecents.
pub const KILL_RELEASE_TIME: i16 = -12000;

/// Release used by monophonic retrigger, in timecents.
pub const RETRIGGER_RELEASE_TIME: i16 = -7200;

/// Portamento time (7-bit) to seconds for a 36-key glide.
const PORTAMENTO_LOOKUP: [(u8, f64); 15] = [
    (0, 0.0),
    (1, 0.006),
    (2, 0.023),
    (4, 0.05),
    (8, 0.11),
    (16, 0.25),
    (32, 0.5),
    (64, 2.06),
    (80, 4.2),
    (96, 8.4),
    (112, 19.5),
    (116, 26.7),
    (120, 40.0),
    (124, 80.0),
    (127, 480.0),
];

/// Glide duration for a portamento time and key distance.
pub fn portamento_seconds(time: u8, distance: u8) -> f64 {
    let time = time.min(127);
    let base = PORTAMENTO_LOOKUP
        .windows(2)
        .find(|w| time <= w[1].0)
        .map(|w| {
            let (t0, s0) = w[0];
            let (t1, s1) = w[1];
            s0 + (s1 - s0) * (time - t0) as f64 / (t1 - t0) as f64
        })
        .unwrap_or(0.0);
    base * distance as f64 / 36.0
}

#[derive(Debug, Clone)]
pub struct MidiChannel {
    pub number: usize,
    pub controllers: ControllerTable,
    pub locked_controllers: ControllerLocks,
    pub custom_controllers: [f32; CUSTOM_CONTROLLER_COUNT],
    /// Requested patch; the resolved preset may differ.
    pub patch: MidiPatch,
    pub preset: Option<PresetHandle>,
    pub lock_preset: bool,
    /// System in force when the preset was locked.
    pub locked_system: SynthSystem,
    pub drum_channel: bool,
    pub voices: Vec<Voice>,
    pub generator_overrides: GeneratorArray,
    pub generator_overrides_enabled: bool,
    pub generator_offsets: GeneratorArray,
    pub generator_offsets_enabled: bool,
    pub vibrato: ChannelVibrato,
    pub lock_vibrato: bool,
    pub lock_gs_nrpn_params: bool,
    /// Cents per pitch class.
    pub octave_tuning: [i8; 12],
    /// Channel transpose in semitones, without the master transposition.
    pub transposition: f32,
    pub random_pan: bool,
    pub is_muted: bool,
    pub(crate) data_entry: DataEntry,
}

impl MidiChannel {
    pub fn new(number: usize) -> Self {
        let drum_channel = number % 16 == DEFAULT_PERCUSSION;
        MidiChannel {
            number,
            controllers: default_controller_values(),
            locked_controllers: ControllerLocks::default(),
            custom_controllers: CustomController::defaults(),
            patch: MidiPatch::new(0, 0, 0, drum_channel),
            preset: None,
            lock_preset: false,
            locked_system: SynthSystem::default(),
            drum_channel,
            voices: Vec::new(),
            generator_overrides: [GENERATOR_OVERRIDE_NO_CHANGE; GENERATORS_AMOUNT],
            generator_overrides_enabled: false,
            generator_offsets: [0; GENERATORS_AMOUNT],
            generator_offsets_enabled: false,
            vibrato: ChannelVibrato::default(),
            lock_vibrato: false,
            lock_gs_nrpn_params: false,
            octave_tuning: [0; 12],
            transposition: 0.0,
            random_pan: false,
            is_muted: false,
            data_entry: DataEntry::default(),
        }
    }

    pub fn data_entry_state(&self) -> super::data_entry::DataEntryState {
        self.data_entry.state
    }

    // ── Tuning ──────────────────────────────────────────────

    fn effective_transposition(&self, master: &MasterParameters) -> f32 {
        if self.drum_channel {
            self.transposition
        } else {
            self.transposition + master.transposition
        }
    }

    /// Integer key shift applied to incoming notes.
    pub fn key_shift(&self, master: &MasterParameters) -> i32 {
        self.effective_transposition(master).trunc() as i32
            + self.custom_controller(CustomController::ChannelKeyShift) as i32
    }

    /// Total tuning offset in cents: RPN tunings, master tuning and the
    /// fractional part of the transposition.
    pub fn tuning_cents(&self, master: &MasterParameters) -> f32 {
        let t = self.effective_transposition(master);
        self.custom_controller(CustomController::ChannelTuning)
            + self.custom_controller(CustomController::ChannelTuningSemitones) * 100.0
            + self.custom_controller(CustomController::MasterTuning)
            + (t - t.trunc()) * 100.0
    }

    pub fn pitch_wheel_range(&self) -> f32 {
        let raw = self.controllers[non_cc(source::PITCH_WHEEL_RANGE)];
        (raw >> 7) as f32 + (raw & 0x7f) as f32 / 100.0
    }

    pub fn property(&self, master: &MasterParameters) -> ChannelProperty {
        ChannelProperty {
            voices_amount: self.voices.len(),
            pitch_wheel: self.controllers[non_cc(source::PITCH_WHEEL)] as u16,
            pitch_wheel_range: self.pitch_wheel_range(),
            is_muted: self.is_muted,
            is_drum: self.drum_channel,
            transposition: self.effective_transposition(master),
        }
    }

    pub(crate) fn send_property(&self, state: &mut SynthState) {
        let master = &state.master;
        let number = self.number;
        let property = || SynthEvent::ChannelPropertyChange {
            channel: number,
            property: self.property(master),
        };
        state.events.emit_with(property);
    }

    // ── Voices ──────────────────────────────────────────────

    /// Recompute modulated generators of every voice. `source` narrows it
    /// to the modulators reading one controller.
    pub(crate) fn recompute_voices(&mut self, source: Option<(bool, u8)>) {
        let offsets = self.generator_offsets_enabled.then_some(&self.generator_offsets);
        for voice in &mut self.voices {
            voice.compute_modulators(&self.controllers, offsets, source);
        }
    }

    /// Start a note. Returns the new voices, which the processor adds after
    /// making room under the voice cap.
    pub(crate) fn note_on(&mut self, state: &mut SynthState, midi_note: u8, velocity: u8) -> Vec<Voice> {
        let midi_note = midi_note & 0x7f;
        let velocity = velocity.min(127);
        if velocity == 0 {
            self.note_off(state, midi_note);
            return Vec::new();
        }
        let master = &state.master;
        if self.is_muted
            || (master.black_midi_mode
                && (velocity < 10 || (state.total_voices > 200 && velocity < 40)))
        {
            return Vec::new();
        }
        if self.preset.is_none() {
            warn!(channel = self.number, midi_note, "No preset selected, note dropped");
            return Vec::new();
        }
        let real_key = midi_note as i32 + self.key_shift(master);
        if !(0..=127).contains(&real_key) {
            return Vec::new();
        }
        let real_key = real_key as u8;

        if master.monophonic_retrigger_mode {
            self.kill_note(state, midi_note, RETRIGGER_RELEASE_TIME);
        }

        let velocity = state.key_modifiers.velocity(self.number, real_key).unwrap_or(velocity);
        let gain = state.key_modifiers.gain(self.number, real_key);
        let (portamento_from_key, portamento_duration) = self.portamento(real_key);

        let Some(preset) = self.preset.as_ref() else {
            return Vec::new();
        };
        let mut voices = state.voices_for(self.number, preset, real_key, velocity);

        let pan_override = self
            .random_pan
            .then(|| state.rng.gen_range(-500.0f32..=500.0).round());
        let time = state.current_time;
        let offsets = self.generator_offsets_enabled.then_some(&self.generator_offsets);

        for voice in &mut voices {
            voice.channel = self.number;
            voice.midi_note = midi_note;
            voice.real_key = real_key;
            voice.start_time = time;
            voice.gain = gain;
            voice.pan_override = pan_override;
            voice.portamento_from_key = portamento_from_key;
            voice.portamento_duration = portamento_duration;

            if self.generator_overrides_enabled {
                for (i, &value) in self.generator_overrides.iter().enumerate() {
                    if value != GENERATOR_OVERRIDE_NO_CHANGE {
                        voice.generators[i] = value;
                    }
                }
            }

            let class = voice.exclusive_class;
            if class != 0 {
                for other in self.voices.iter_mut().filter(|v| {
                    v.exclusive_class == class && !v.is_in_release
                }) {
                    other.exclusive_release(time);
                }
            }

            voice.compute_modulators(&self.controllers, offsets, None);
            voice.current_pan = voice.modulated_generators[G::Pan.index()].clamp(-500, 500) as f32;
        }

        state.events.emit(SynthEvent::NoteOn {
            channel: self.number,
            midi_note,
            velocity,
        });
        voices
    }

    /// Portamento source key and glide duration for a new note.
    fn portamento(&mut self, key: u8) -> (Option<u8>, f64) {
        let time = (self.controllers[cc::PORTAMENTO_TIME as usize] >> 7) as u8;
        let control = self.controllers[cc::PORTAMENTO_CONTROL as usize];
        let from = (control >> 7) as u8;
        let enabled = self.controllers[cc::PORTAMENTO_ON_OFF as usize] >= 64 << 7;
        if self.drum_channel || !enabled || time == 0 || from == key {
            return (None, 0.0);
        }
        let glide = if control == PORTAMENTO_CONTROL_UNSET {
            (None, 0.0)
        } else {
            (Some(from), portamento_seconds(time, key.abs_diff(from)))
        };
        self.controllers[cc::PORTAMENTO_CONTROL as usize] = (key as i16) << 7;
        glide
    }

    pub(crate) fn note_off(&mut self, state: &mut SynthState, midi_note: u8) {
        let midi_note = midi_note & 0x7f;
        if state.master.black_midi_mode && !self.drum_channel {
            self.kill_note(state, midi_note, KILL_RELEASE_TIME);
        } else {
            let sustain = self.controllers[cc::SUSTAIN_PEDAL as usize] >= 64 << 7;
            let (time, min_length) = (state.current_time, state.min_note_length);
            for voice in self.voices.iter_mut().filter(|v| {
                v.midi_note == midi_note && v.release_start_time.is_infinite() && !v.sustained
            }) {
                if sustain {
                    voice.sustained = true;
                } else {
                    voice.release(time, min_length);
                }
            }
        }
        state.events.emit(SynthEvent::NoteOff {
            channel: self.number,
            midi_note,
        });
    }

    pub(crate) fn release_sustained(&mut self, state: &SynthState) {
        for voice in self.voices.iter_mut().filter(|v| v.sustained) {
            voice.sustained = false;
            voice.release(state.current_time, state.min_note_length);
        }
    }

    /// Release a note with a fixed release time, ignoring sustain.
    pub(crate) fn kill_note(&mut self, state: &SynthState, midi_note: u8, release_time: i16) {
        let forced = ForcedRelease {
            volume: release_time,
            modulation: release_time,
        };
        for voice in self.voices.iter_mut().filter(|v| v.midi_note == midi_note) {
            if voice.forced_release == Some(forced) {
                continue;
            }
            voice.sustained = false;
            voice.force_release(state.current_time, state.min_note_length, forced);
        }
    }

    /// Release every voice, or drop them outright when `force` is set.
    pub(crate) fn stop_all_notes(&mut self, state: &mut SynthState, force: bool) {
        if force {
            self.voices.clear();
        } else {
            for voice in self.voices.iter_mut().filter(|v| v.release_start_time.is_infinite() || v.sustained) {
                voice.sustained = false;
                voice.release(state.current_time, state.min_note_length);
            }
        }
        state.events.emit(SynthEvent::StopAll {
            channel: self.number,
            force,
        });
        self.send_property(state);
    }

    pub(crate) fn pitch_wheel(&mut self, state: &mut SynthState, value: u16) {
        let value = value.min(16383);
        self.controllers[non_cc(source::PITCH_WHEEL)] = value as i16;
        self.recompute_voices(Some((false, source::PITCH_WHEEL)));
        state.events.emit(SynthEvent::PitchWheel {
            channel: self.number,
            value,
        });
    }

    pub(crate) fn channel_pressure(&mut self, state: &mut SynthState, pressure: u8) {
        let pressure = pressure & 0x7f;
        self.controllers[non_cc(source::CHANNEL_PRESSURE)] = (pressure as i16) << 7;
        self.recompute_voices(Some((false, source::CHANNEL_PRESSURE)));
        state.events.emit(SynthEvent::ChannelPressure {
            channel: self.number,
            pressure,
        });
    }

    pub(crate) fn poly_pressure(&mut self, state: &mut SynthState, midi_note: u8, pressure: u8) {
        let pressure = pressure & 0x7f;
        let offsets = self.generator_offsets_enabled.then_some(&self.generator_offsets);
        for voice in self.voices.iter_mut().filter(|v| v.midi_note == midi_note) {
            voice.pressure = pressure;
            voice.compute_modulators(&self.controllers, offsets, Some((false, source::POLY_PRESSURE)));
        }
        state.events.emit(SynthEvent::PolyPressure {
            channel: self.number,
            midi_note,
            pressure,
        });
    }

    // ── Presets ─────────────────────────────────────────────

    fn system(&self, state: &SynthState) -> SynthSystem {
        if self.lock_preset {
            self.locked_system
        } else {
            state.master.midi_system
        }
    }

    pub(crate) fn set_bank_msb(&mut self, state: &SynthState, value: u8) {
        if self.lock_preset {
            return;
        }
        match self.system(state) {
            // GM has a single bank.
            SynthSystem::Gm => {}
            SynthSystem::Xg => {
                self.patch.bank_msb = value;
                self.patch.is_gm_gs_drum = false;
            }
            SynthSystem::Gs | SynthSystem::Gm2 => self.patch.bank_msb = value,
        }
    }

    /// Resolve the stored patch against the sound bank without emitting
    /// events.
    pub(crate) fn resolve_preset(&mut self, state: &SynthState) -> bool {
        let system = self.system(state);
        match state.lookup_preset(&self.patch, system) {
            Some(preset) => {
                self.drum_channel = preset.is_any_drums;
                self.preset = Some(preset);
                true
            }
            None => {
                self.preset = None;
                false
            }
        }
    }

    pub(crate) fn program_change(&mut self, state: &mut SynthState, program: u8) {
        if self.lock_preset {
            return;
        }
        self.patch.program = program & 0x7f;
        let was_drums = self.drum_channel;
        if !self.resolve_preset(state) {
            warn!(channel = self.number, patch = %self.patch, "No preset for program change");
            return;
        }
        let Some(preset) = self.preset.as_ref() else {
            return;
        };
        debug!(channel = self.number, patch = %self.patch, preset = %preset.name, "Program change");
        state.events.emit(SynthEvent::ProgramChange {
            channel: self.number,
            patch: preset.named_patch(),
        });
        if was_drums != self.drum_channel {
            state.events.emit(SynthEvent::DrumChange {
                channel: self.number,
                is_drum_channel: self.drum_channel,
            });
            self.send_property(state);
        }
    }

    /// Switch between drum and melodic mode, then re-resolve the program.
    pub(crate) fn set_drums(&mut self, state: &mut SynthState, is_drum: bool) {
        if self.lock_preset || self.drum_channel == is_drum {
            return;
        }
        if self.system(state) == SynthSystem::Xg {
            self.patch.bank_msb = if is_drum { 127 } else { 0 };
            self.patch.is_gm_gs_drum = false;
        } else {
            self.patch.is_gm_gs_drum = is_drum;
        }
        self.drum_channel = is_drum;
        debug!(channel = self.number, is_drum, "Drum change");
        state.events.emit(SynthEvent::DrumChange {
            channel: self.number,
            is_drum_channel: is_drum,
        });
        let program = self.patch.program;
        self.program_change(state, program);
        self.send_property(state);
    }

    pub(crate) fn set_preset_lock(&mut self, state: &SynthState, locked: bool) {
        if locked {
            self.locked_system = state.master.midi_system;
        }
        self.lock_preset = locked;
    }

    // ── Channel-level operations ────────────────────────────

    pub(crate) fn mute(&mut self, state: &mut SynthState, is_muted: bool) {
        if is_muted {
            self.stop_all_notes(state, true);
        }
        self.is_muted = is_muted;
        state.events.emit(SynthEvent::MuteChannel {
            channel: self.number,
            is_muted,
        });
        self.send_property(state);
    }

    /// Transpose the channel. Drum channels only move when `force` is set.
    pub(crate) fn transpose(&mut self, state: &mut SynthState, semitones: f32, force: bool) {
        if (self.drum_channel && !force) || semitones == self.transposition {
            return;
        }
        let old_shift = self.key_shift(&state.master);
        self.transposition = semitones;
        if self.key_shift(&state.master) != old_shift {
            self.stop_all_notes(state, false);
        }
        self.send_property(state);
    }

    pub fn set_octave_tuning(&mut self, tuning: [i8; 12]) {
        self.octave_tuning = tuning;
    }

    pub fn set_vibrato(&mut self, vibrato: ChannelVibrato) {
        if self.lock_vibrato {
            return;
        }
        self.vibrato = vibrato;
    }

    /// Override a generator for new voices; `live` also rewrites sounding
    /// voices.
    pub fn set_generator_override(&mut self, generator: G, value: i16, live: bool) {
        self.generator_overrides[generator.index()] = value;
        self.generator_overrides_enabled = true;
        if live && value != GENERATOR_OVERRIDE_NO_CHANGE {
            for voice in &mut self.voices {
                voice.generators[generator.index()] = value;
            }
            self.recompute_voices(None);
        }
    }

    pub fn reset_generator_overrides(&mut self) {
        self.generator_overrides = [GENERATOR_OVERRIDE_NO_CHANGE; GENERATORS_AMOUNT];
        self.generator_overrides_enabled = false;
    }

    /// Offset added to a generator before modulation, applied live.
    pub fn set_generator_offset(&mut self, generator: usize, value: i32) {
        if generator >= GENERATORS_AMOUNT {
            return;
        }
        self.generator_offsets[generator] = saturate_i16(value);
        self.generator_offsets_enabled = true;
        self.recompute_voices(None);
    }

    pub fn reset_generator_offsets(&mut self) {
        self.generator_offsets = [0; GENERATORS_AMOUNT];
        self.generator_offsets_enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portamento_table_interpolates() {
        assert_eq!(portamento_seconds(0, 36), 0.0);
        assert!((portamento_seconds(64, 36) - 2.06).abs() < 1e-12);
        assert!((portamento_seconds(64, 18) - 1.03).abs() < 1e-12);
        let mid = portamento_seconds(72, 36);
        assert!(mid > 2.06 && mid < 4.2);
        assert!((portamento_seconds(127, 36) - 480.0).abs() < 1e-9);
    }

    #[test]
    fn new_channel_defaults() {
        let ch = MidiChannel::new(9);
        assert!(ch.drum_channel);
        assert!(ch.patch.is_gm_gs_drum);
        assert!(!MidiChannel::new(25).drum_channel);
        assert!(MidiChannel::new(25).patch == MidiPatch::melodic(0));
        assert_eq!(ch.pitch_wheel_range(), 2.0);
        assert_eq!(ch.custom_controller(CustomController::ModulationMultiplier), 1.0);
    }

    #[test]
    fn key_shift_and_tuning() {
        let mut ch = MidiChannel::new(0);
        let mut master = MasterParameters::default();
        ch.transposition = 2.5;
        assert_eq!(ch.key_shift(&master), 2);
        assert!((ch.tuning_cents(&master) - 50.0).abs() < 1e-4);
        master.transposition = 1.0;
        assert_eq!(ch.key_shift(&master), 3);
        ch.custom_controllers[CustomController::ChannelTuningSemitones.index()] = -1.0;
        assert!((ch.tuning_cents(&master) - -50.0).abs() < 1e-4);

        let mut drums = MidiChannel::new(9);
        drums.transposition = 0.0;
        assert_eq!(drums.key_shift(&master), 0);
    }
}
