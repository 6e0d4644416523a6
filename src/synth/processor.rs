//! The synthesizer core.
//!
//! A [`Processor`] owns the channels, the shared synthesis state and the
//! scheduled-event queue. MIDI input either applies immediately or is queued
//! until the render clock reaches it. Rendering accumulates every voice into
//! caller-provided buffers, one quantum at a time.

use std::collections::HashMap;
use std::sync::Arc;

use midly::MidiMessage;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{debug, info, warn};

use super::channel::MidiChannel;
use super::controllers::CustomController;
use super::events::{EventDispatcher, EventSink, SynthEvent};
use super::key_modifiers::KeyModifierManager;
use super::master::{MasterParameter, MasterParameters, TuningTables};
use super::schedule::{EventQueue, ScheduledCommand};
use super::voices::{StealPolicy, VoiceCacheKey, steal_voices};
use crate::config::SynthConfig;
use crate::dsp::filter::CoefficientCache;
use crate::dsp::voice::{RenderContext, SmoothingFactors, Voice, VoiceOutputs};
use crate::midi::{MidiPatch, SynthSystem, WireMessage, decode_message};
use crate::soundbank::{PresetHandle, PresetListEntry, SoundBankSource};

const RNG_SEED: u64 = 0x5eed_cafe;

/// State shared by every channel: the clock, master settings, the sound bank
/// and everything voice creation needs.
pub(crate) struct SynthState {
    pub(crate) sample_rate: f32,
    pub(crate) min_note_length: f64,
    pub(crate) master: MasterParameters,
    pub(crate) sound_bank: Option<Arc<dyn SoundBankSource>>,
    pub(crate) voice_cache: HashMap<VoiceCacheKey, Vec<Voice>>,
    pub(crate) events: EventDispatcher,
    pub(crate) current_time: f64,
    pub(crate) key_modifiers: KeyModifierManager,
    pub(crate) tunings: TuningTables,
    /// Sysex master volume, linear.
    pub(crate) midi_volume: f32,
    /// Sysex master tuning, in cents.
    pub(crate) master_fine_tuning: f32,
    pub(crate) master_coarse_tuning: f32,
    /// Voices sounding before the note-on being processed.
    pub(crate) total_voices: usize,
    pub(crate) rng: SmallRng,
    pub(crate) smoothing: SmoothingFactors,
}

impl SynthState {
    pub(crate) fn lookup_preset(&self, patch: &MidiPatch, system: SynthSystem) -> Option<PresetHandle> {
        self.sound_bank.as_ref()?.lookup_preset(patch, system)
    }
}

pub struct Processor {
    pub(super) channels: Vec<MidiChannel>,
    pub(super) state: SynthState,
    queue: EventQueue,
    filter_cache: CoefficientCache,
    scratch: Vec<f32>,
    steal_policy: StealPolicy,
    effects: bool,
}

impl Processor {
    pub fn new(config: SynthConfig) -> Self {
        let sample_rate = if config.sample_rate > 0.0 {
            config.sample_rate
        } else {
            warn!(sample_rate = config.sample_rate, "Invalid sample rate, using 44100");
            44100.0
        };
        let state = SynthState {
            sample_rate,
            min_note_length: config.min_note_length,
            master: config.master_parameters,
            sound_bank: None,
            voice_cache: HashMap::new(),
            events: EventDispatcher::new(config.enable_event_system),
            current_time: config.initial_time,
            key_modifiers: KeyModifierManager::new(),
            tunings: TuningTables::new(),
            midi_volume: 1.0,
            master_fine_tuning: 0.0,
            master_coarse_tuning: 0.0,
            total_voices: 0,
            rng: SmallRng::seed_from_u64(RNG_SEED),
            smoothing: SmoothingFactors::for_sample_rate(sample_rate),
        };
        let mut processor = Processor {
            channels: Vec::with_capacity(config.channel_count),
            state,
            queue: EventQueue::new(),
            filter_cache: CoefficientCache::new(sample_rate as f64),
            scratch: Vec::new(),
            steal_policy: config.steal_policy,
            effects: config.enable_effects,
        };
        for _ in 0..config.channel_count {
            processor.create_channel();
        }
        processor
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn sample_rate(&self) -> f32 {
        self.state.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.state.current_time
    }

    pub fn voice_count(&self) -> usize {
        self.channels.iter().map(|c| c.voices.len()).sum()
    }

    pub fn channel(&self, index: usize) -> Option<&MidiChannel> {
        self.channels.get(index)
    }

    /// Direct access for the channel operations that need no shared state
    /// (octave tuning, vibrato, generator overrides, custom controllers).
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut MidiChannel> {
        self.channels.get_mut(index)
    }

    pub fn channels(&self) -> &[MidiChannel] {
        &self.channels
    }

    pub fn master_parameters(&self) -> &MasterParameters {
        &self.state.master
    }

    pub fn key_modifiers(&self) -> &KeyModifierManager {
        &self.state.key_modifiers
    }

    pub fn key_modifiers_mut(&mut self) -> &mut KeyModifierManager {
        &mut self.state.key_modifiers
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn cached_voice_sets(&self) -> usize {
        self.state.voice_cache.len()
    }

    // ── Setup ───────────────────────────────────────────────

    /// Add a channel at the end and return its index.
    pub fn create_channel(&mut self) -> usize {
        let number = self.channels.len();
        let mut channel = MidiChannel::new(number);
        channel.resolve_preset(&self.state);
        self.channels.push(channel);
        self.state.events.emit(SynthEvent::NewChannel { channel: number });
        number
    }

    fn ensure_channel(&mut self, index: usize) {
        while self.channels.len() <= index {
            self.create_channel();
        }
    }

    /// Swap the sound bank. Sounding voices keep their sample data; every
    /// channel re-resolves its stored patch.
    pub fn set_sound_bank(&mut self, bank: Arc<dyn SoundBankSource>) {
        let presets = bank.preset_list();
        info!(presets = presets.len(), "Sound bank loaded");
        self.state.sound_bank = Some(bank);
        self.state.voice_cache.clear();
        for channel in &mut self.channels {
            if !channel.resolve_preset(&self.state) {
                warn!(channel = channel.number, patch = %channel.patch, "No preset after bank swap");
            }
        }
        self.state.events.emit(SynthEvent::PresetListChange { presets });
    }

    pub fn preset_list(&self) -> Vec<PresetListEntry> {
        self.state
            .sound_bank
            .as_ref()
            .map(|bank| bank.preset_list())
            .unwrap_or_default()
    }

    pub fn set_event_sink(&mut self, sink: Option<Box<dyn EventSink>>) {
        self.state.events.set_sink(sink);
    }

    pub fn set_event_system(&mut self, enabled: bool) {
        self.state.events.enabled = enabled;
    }

    pub fn set_steal_policy(&mut self, policy: StealPolicy) {
        self.steal_policy = policy;
    }

    pub fn clear_cache(&mut self) {
        self.state.voice_cache.clear();
    }

    // ── MIDI input ──────────────────────────────────────────
    //
    // Every entry point takes an optional absolute time. Times in the future
    // queue the command; anything else applies now.

    pub fn note_on(&mut self, channel: usize, midi_note: u8, velocity: u8, time: Option<f64>) {
        self.dispatch(
            ScheduledCommand::NoteOn {
                channel,
                midi_note,
                velocity,
            },
            time,
        );
    }

    pub fn note_off(&mut self, channel: usize, midi_note: u8, time: Option<f64>) {
        self.dispatch(ScheduledCommand::NoteOff { channel, midi_note }, time);
    }

    pub fn controller_change(
        &mut self,
        channel: usize,
        controller: u8,
        value: u8,
        force: bool,
        time: Option<f64>,
    ) {
        self.dispatch(
            ScheduledCommand::ControllerChange {
                channel,
                controller,
                value,
                force,
            },
            time,
        );
    }

    pub fn program_change(&mut self, channel: usize, program: u8, time: Option<f64>) {
        self.dispatch(ScheduledCommand::ProgramChange { channel, program }, time);
    }

    /// `value` is the raw 14-bit wheel position, 8192 centred.
    pub fn pitch_wheel(&mut self, channel: usize, value: u16, time: Option<f64>) {
        self.dispatch(ScheduledCommand::PitchWheel { channel, value }, time);
    }

    pub fn channel_pressure(&mut self, channel: usize, pressure: u8, time: Option<f64>) {
        self.dispatch(ScheduledCommand::ChannelPressure { channel, pressure }, time);
    }

    pub fn poly_pressure(&mut self, channel: usize, midi_note: u8, pressure: u8, time: Option<f64>) {
        self.dispatch(
            ScheduledCommand::PolyPressure {
                channel,
                midi_note,
                pressure,
            },
            time,
        );
    }

    /// `data` excludes the F0 and F7 framing bytes.
    pub fn system_exclusive(&mut self, data: &[u8], channel_offset: usize, time: Option<f64>) {
        self.dispatch(
            ScheduledCommand::SystemExclusive {
                data: data.to_vec(),
                channel_offset,
            },
            time,
        );
    }

    pub fn system_reset(&mut self, time: Option<f64>) {
        self.dispatch(ScheduledCommand::SystemReset, time);
    }

    /// Decode and apply (or schedule) one raw MIDI message.
    /// `channel_offset` selects the 16-channel port.
    pub fn process_message(&mut self, bytes: &[u8], channel_offset: usize, force: bool, time: Option<f64>) {
        let Some(message) = decode_message(bytes) else {
            warn!(?bytes, "Malformed or unsupported MIDI message dropped");
            return;
        };
        let command = match message {
            WireMessage::SystemReset => ScheduledCommand::SystemReset,
            WireMessage::SystemExclusive(data) => ScheduledCommand::SystemExclusive {
                data,
                channel_offset,
            },
            WireMessage::Channel { channel, message } => {
                let channel = channel as usize + channel_offset;
                self.ensure_channel(channel);
                match message {
                    MidiMessage::NoteOff { key, .. } => ScheduledCommand::NoteOff {
                        channel,
                        midi_note: key.as_int(),
                    },
                    MidiMessage::NoteOn { key, vel } => ScheduledCommand::NoteOn {
                        channel,
                        midi_note: key.as_int(),
                        velocity: vel.as_int(),
                    },
                    MidiMessage::Aftertouch { key, vel } => ScheduledCommand::PolyPressure {
                        channel,
                        midi_note: key.as_int(),
                        pressure: vel.as_int(),
                    },
                    MidiMessage::Controller { controller, value } => {
                        ScheduledCommand::ControllerChange {
                            channel,
                            controller: controller.as_int(),
                            value: value.as_int(),
                            force,
                        }
                    }
                    MidiMessage::ProgramChange { program } => ScheduledCommand::ProgramChange {
                        channel,
                        program: program.as_int(),
                    },
                    MidiMessage::ChannelAftertouch { vel } => ScheduledCommand::ChannelPressure {
                        channel,
                        pressure: vel.as_int(),
                    },
                    MidiMessage::PitchBend { bend } => ScheduledCommand::PitchWheel {
                        channel,
                        value: bend.0.as_int(),
                    },
                }
            }
        };
        self.dispatch(command, time);
    }

    fn dispatch(&mut self, command: ScheduledCommand, time: Option<f64>) {
        match time {
            Some(t) if t > self.state.current_time => self.queue.push(t, command),
            _ => self.execute(command),
        }
    }

    fn execute(&mut self, command: ScheduledCommand) {
        let state = &mut self.state;
        match command {
            ScheduledCommand::NoteOn {
                channel,
                midi_note,
                velocity,
            } => self.start_note(channel, midi_note, velocity),
            ScheduledCommand::NoteOff { channel, midi_note } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.note_off(state, midi_note);
                }
            }
            ScheduledCommand::ControllerChange {
                channel,
                controller,
                value,
                force,
            } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.controller_change(state, controller, value, force);
                }
            }
            ScheduledCommand::ProgramChange { channel, program } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.program_change(state, program);
                }
            }
            ScheduledCommand::PitchWheel { channel, value } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.pitch_wheel(state, value);
                }
            }
            ScheduledCommand::ChannelPressure { channel, pressure } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.channel_pressure(state, pressure);
                }
            }
            ScheduledCommand::PolyPressure {
                channel,
                midi_note,
                pressure,
            } => {
                if let Some(ch) = self.channels.get_mut(channel) {
                    ch.poly_pressure(state, midi_note, pressure);
                }
            }
            ScheduledCommand::SystemExclusive {
                data,
                channel_offset,
            } => self.apply_system_exclusive(&data, channel_offset),
            ScheduledCommand::SystemReset => self.reset_system(),
        }
    }

    /// Create the note's voices, steal room under the voice cap, then add
    /// them to the channel.
    fn start_note(&mut self, channel: usize, midi_note: u8, velocity: u8) {
        if channel >= self.channels.len() {
            return;
        }
        self.state.total_voices = self.voice_count();
        let mut voices = self.channels[channel].note_on(&mut self.state, midi_note, velocity);
        if voices.is_empty() {
            return;
        }
        let cap = self.state.master.voice_cap;
        voices.truncate(cap);
        let excess = (self.voice_count() + voices.len()).saturating_sub(cap);
        if excess > 0 {
            let stolen = steal_voices(&mut self.channels, excess, self.steal_policy);
            debug!(stolen, cap, "Voice cap reached");
        }
        self.channels[channel].voices.extend(voices);
    }

    // ── Resets ──────────────────────────────────────────────

    /// Restore every channel to power-on defaults under the current system.
    pub(super) fn reset_channels(&mut self) {
        let state = &mut self.state;
        for channel in &mut self.channels {
            channel.stop_all_notes(state, true);
            channel.reset_controllers();
            channel.transposition = 0.0;
            if !channel.lock_preset {
                let drums = channel.number % 16 == crate::midi::DEFAULT_PERCUSSION;
                channel.patch = MidiPatch::new(0, 0, 0, drums);
                channel.drum_channel = drums;
            }
            channel.resolve_preset(state);
            let tuning = state.master_fine_tuning + state.master_coarse_tuning;
            channel.set_custom_controller(CustomController::MasterTuning, tuning);
            if let Some(preset) = channel.preset.as_ref() {
                state.events.emit(SynthEvent::ProgramChange {
                    channel: channel.number,
                    patch: preset.named_patch(),
                });
            }
            channel.send_property(state);
        }
        state.events.emit(SynthEvent::AllControllerReset);
    }

    /// MIDI system reset (FF): default system, tunings and master volume.
    fn reset_system(&mut self) {
        info!("System reset");
        self.queue.clear();
        self.state.master.midi_system = SynthSystem::default();
        self.state.tunings.clear();
        self.state.midi_volume = 1.0;
        self.state.master_fine_tuning = 0.0;
        self.state.master_coarse_tuning = 0.0;
        self.reset_channels();
    }

    // ── Rendering ───────────────────────────────────────────

    /// Render into one stereo pair plus the reverb and chorus sends.
    /// Audio is added to the buffers, starting at `start_index`.
    /// `sample_count` defaults to what fits in the shortest buffer.
    pub fn render_audio(
        &mut self,
        outputs: [&mut [f32]; 2],
        reverb: [&mut [f32]; 2],
        chorus: [&mut [f32]; 2],
        start_index: usize,
        sample_count: Option<usize>,
    ) {
        self.render_audio_split(&mut [outputs], reverb, chorus, start_index, sample_count);
    }

    /// Like [`Processor::render_audio`], but channel `n` goes to dry pair
    /// `n % dry.len()`.
    pub fn render_audio_split(
        &mut self,
        dry: &mut [[&mut [f32]; 2]],
        mut reverb: [&mut [f32]; 2],
        mut chorus: [&mut [f32]; 2],
        start_index: usize,
        sample_count: Option<usize>,
    ) {
        let shortest = dry
            .iter()
            .flatten()
            .chain(reverb.iter())
            .chain(chorus.iter())
            .map(|b| b.len())
            .min()
            .unwrap_or(0);
        let available = shortest.saturating_sub(start_index);
        let count = sample_count.map_or(available, |n| n.min(available));

        while let Some(command) = self.queue.pop_due(self.state.current_time) {
            self.execute(command);
        }

        if count > 0 && !dry.is_empty() {
            let end = start_index + count;
            let state = &self.state;
            let (pan_left, pan_right) = state.master.pan_gains();
            let pairs = dry.len();
            for channel in &mut self.channels {
                if channel.voices.is_empty() {
                    continue;
                }
                let octave_tuning = channel.octave_tuning;
                let key_tunings = channel
                    .preset
                    .as_ref()
                    .and_then(|p| state.tunings.get(p.patch.program));
                let mut ctx = RenderContext {
                    time: state.current_time,
                    interpolation: state.master.interpolation_type,
                    smoothing: state.smoothing,
                    channel_tuning_cents: channel.tuning_cents(&state.master),
                    octave_tuning: &octave_tuning,
                    key_tunings,
                    vibrato: channel.vibrato,
                    modulation_multiplier: channel
                        .custom_controller(CustomController::ModulationMultiplier),
                    gain: state.master.master_gain * state.midi_volume,
                    pan_left,
                    pan_right,
                    reverb_gain: state.master.reverb_gain,
                    chorus_gain: state.master.chorus_gain,
                    effects: self.effects,
                    filter_cache: &mut self.filter_cache,
                    scratch: &mut self.scratch,
                };
                let [left, right] = &mut dry[channel.number % pairs];
                let [reverb_left, reverb_right] = &mut reverb;
                let [chorus_left, chorus_right] = &mut chorus;
                let mut out = VoiceOutputs {
                    left: &mut left[start_index..end],
                    right: &mut right[start_index..end],
                    reverb_left: &mut reverb_left[start_index..end],
                    reverb_right: &mut reverb_right[start_index..end],
                    chorus_left: &mut chorus_left[start_index..end],
                    chorus_right: &mut chorus_right[start_index..end],
                };
                for voice in &mut channel.voices {
                    voice.render(&mut ctx, &mut out);
                }
                channel.voices.retain(|v| !v.finished);
            }
        }

        self.state.current_time += count as f64 / self.state.sample_rate as f64;
    }

    // ── Master and channel control ──────────────────────────

    pub fn set_master_parameter(&mut self, change: MasterParameter) {
        let old_shifts: Vec<i32> = self
            .channels
            .iter()
            .map(|c| c.key_shift(&self.state.master))
            .collect();
        self.state.master.apply(change);
        if let MasterParameter::Transposition(_) = change {
            let state = &mut self.state;
            for (channel, old) in self.channels.iter_mut().zip(old_shifts) {
                if channel.key_shift(&state.master) != old {
                    channel.stop_all_notes(state, false);
                }
            }
        }
        self.state.events.emit(SynthEvent::MasterParameterChange(change));
    }

    pub fn mute_channel(&mut self, channel: usize, is_muted: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.mute(&mut self.state, is_muted);
        }
    }

    /// Transpose a channel by (possibly fractional) semitones. Drum channels
    /// need `force`.
    pub fn transpose_channel(&mut self, channel: usize, semitones: f32, force: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.transpose(&mut self.state, semitones, force);
        }
    }

    pub fn set_drums(&mut self, channel: usize, is_drum: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.set_drums(&mut self.state, is_drum);
        }
    }

    pub fn lock_preset(&mut self, channel: usize, locked: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.set_preset_lock(&self.state, locked);
        }
    }

    pub fn set_random_pan(&mut self, channel: usize, enabled: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.random_pan = enabled;
        }
    }

    /// Release a note quickly regardless of sustain. `release_time` is in
    /// timecents.
    pub fn kill_note(&mut self, channel: usize, midi_note: u8, release_time: i16) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.kill_note(&self.state, midi_note, release_time);
        }
    }

    /// Stop every channel; `force` drops voices without a release.
    pub fn stop_all_notes(&mut self, force: bool) {
        let state = &mut self.state;
        for channel in &mut self.channels {
            channel.stop_all_notes(state, force);
        }
    }

    pub fn stop_channel(&mut self, channel: usize, force: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.stop_all_notes(&mut self.state, force);
        }
    }
}
