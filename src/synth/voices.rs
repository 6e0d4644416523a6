//! Voice creation through the voice cache, and voice stealing.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::channel::MidiChannel;
use super::processor::SynthState;
use crate::dsp::voice::Voice;
use crate::midi::MidiPatch;
use crate::soundbank::PresetHandle;

/// Voice sets held before the cache starts over.
pub const MAX_CACHED_VOICE_SETS: usize = 2048;

/// Voices are cached per resolved patch, key and velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceCacheKey {
    pub patch: MidiPatch,
    pub midi_note: u8,
    pub velocity: u8,
}

/// How voices are chosen when the voice cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StealPolicy {
    /// Releasing voices first, then the quietest.
    #[default]
    ReleaseThenAmplitude,
    /// Score from drum bias, release, velocity, envelope stage and level.
    Weighted,
}

impl SynthState {
    /// Fresh voices for a note, cloned from the cache when possible. A key
    /// modifier may substitute another patch.
    pub(crate) fn voices_for(
        &mut self,
        channel: usize,
        preset: &PresetHandle,
        real_key: u8,
        velocity: u8,
    ) -> Vec<Voice> {
        let Some(bank) = self.sound_bank.as_ref() else {
            return Vec::new();
        };
        let substitute = self
            .key_modifiers
            .patch(channel, real_key)
            .and_then(|patch| bank.lookup_preset(&patch, self.master.midi_system));
        let preset = substitute.as_ref().unwrap_or(preset);

        let key = VoiceCacheKey {
            patch: preset.patch,
            midi_note: real_key,
            velocity,
        };
        let time = self.current_time;
        if let Some(cached) = self.voice_cache.get(&key) {
            return cached.iter().map(|v| v.retimed(time)).collect();
        }

        let voices: Vec<Voice> = bank
            .synthesis_data(preset.id, real_key, velocity)
            .iter()
            .map(|data| Voice::new(data, real_key, velocity, self.sample_rate))
            .collect();
        let fresh = voices.iter().map(|v| v.retimed(time)).collect();
        if self.voice_cache.len() >= MAX_CACHED_VOICE_SETS {
            debug!(entries = self.voice_cache.len(), "Voice cache full, clearing");
            self.voice_cache.clear();
        }
        self.voice_cache.insert(key, voices);
        fresh
    }
}

fn weighted_priority(channel: &MidiChannel, voice: &Voice) -> f32 {
    let mut priority = 0.0;
    if channel.drum_channel {
        priority += 5.0;
    }
    if voice.is_in_release {
        priority -= 5.0;
    }
    priority += voice.velocity as f32 / 25.0;
    priority -= voice.volume_envelope.state as u8 as f32;
    priority -= voice.volume_envelope.current_attenuation_db / 50.0;
    priority
}

/// Remove up to `amount` voices across all channels, lowest priority first.
/// Returns how many were removed.
pub fn steal_voices(channels: &mut [MidiChannel], amount: usize, policy: StealPolicy) -> usize {
    if amount == 0 {
        return 0;
    }
    // (channel, voice index, releasing, score)
    let mut candidates: Vec<(usize, usize, bool, f32)> = channels
        .iter()
        .enumerate()
        .flat_map(|(c, channel)| {
            channel.voices.iter().enumerate().map(move |(v, voice)| {
                let releasing = voice.is_in_release;
                let score = match policy {
                    StealPolicy::ReleaseThenAmplitude => voice.current_amplitude(),
                    StealPolicy::Weighted => weighted_priority(channel, voice),
                };
                (c, v, releasing, score)
            })
        })
        .collect();

    match policy {
        StealPolicy::ReleaseThenAmplitude => candidates
            .sort_by(|a, b| b.2.cmp(&a.2).then(a.3.total_cmp(&b.3))),
        StealPolicy::Weighted => candidates.sort_by(|a, b| a.3.total_cmp(&b.3)),
    }
    candidates.truncate(amount);

    // Remove from the back so earlier indices stay valid.
    candidates.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    for &(c, v, releasing, score) in &candidates {
        trace!(channel = c, voice = v, releasing, score, "Stealing voice");
        channels[c].voices.remove(v);
    }
    candidates.len()
}
