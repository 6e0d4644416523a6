//! WAV renderer — bounces timed MIDI messages through a processor to WAV bytes.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::mixer::Mixer;
use crate::error::Result;
use crate::synth::processor::Processor;

/// Frames rendered per processor call.
pub const QUANTUM: usize = 128;

/// Render `duration` seconds as 16-bit stereo WAV.
///
/// Message times are relative to the processor's current time. The reverb
/// and chorus sends are mixed back in as plain returns.
pub fn render_wav(
    processor: &mut Processor,
    timed_messages: &[(f64, Vec<u8>)],
    duration: f64,
) -> Result<Vec<u8>> {
    let start = processor.current_time();
    for (time, message) in timed_messages {
        processor.process_message(message, 0, false, Some(start + time));
    }

    let sample_rate = processor.sample_rate();
    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    let mut dry = [[0f32; QUANTUM]; 2];
    let mut reverb = [[0f32; QUANTUM]; 2];
    let mut chorus = [[0f32; QUANTUM]; 2];
    let mut mixer = Mixer::new();

    let mut remaining = (duration.max(0.0) * sample_rate as f64).round() as usize;
    while remaining > 0 {
        let n = remaining.min(QUANTUM);
        for bus in dry.iter_mut().chain(reverb.iter_mut()).chain(chorus.iter_mut()) {
            bus.fill(0.0);
        }
        let [dl, dr] = &mut dry;
        let [rl, rr] = &mut reverb;
        let [cl, cr] = &mut chorus;
        processor.render_audio(
            [&mut dl[..n], &mut dr[..n]],
            [&mut rl[..n], &mut rr[..n]],
            [&mut cl[..n], &mut cr[..n]],
            0,
            Some(n),
        );

        mixer.clear(n);
        mixer.add(&dry[0], &dry[1], 1.0);
        mixer.add(&reverb[0], &reverb[1], 1.0);
        mixer.add(&chorus[0], &chorus[1], 1.0);
        for sample in mixer.output_interleaved() {
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        remaining -= n;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SynthConfig;
    use crate::midi::MidiPatch;
    use crate::soundbank::{GeneratorType as G, Instrument, Preset, Sample, SoundBank, Zone};

    fn processor() -> Processor {
        let mut bank = SoundBank::new("sine");
        let data: Vec<f32> = (0..441)
            .map(|i| (i as f32 * std::f32::consts::TAU / 100.0).sin() * 0.5)
            .collect();
        let s = bank.add_sample(Sample::new("sine", data, 44100, 69).with_loop(0, 400));
        let inst = bank.add_instrument(
            Instrument::new("sine").zone(Zone::new().with(G::SampleModes, 1), s),
        );
        bank.add_preset(Preset::new("Sine", MidiPatch::melodic(0)).zone(Zone::new(), inst));
        let mut p = Processor::new(SynthConfig::default());
        p.set_sound_bank(Arc::new(bank));
        p
    }

    #[test]
    fn wav_header_valid() {
        let mut p = processor();
        let wav = render_wav(&mut p, &[(0.0, vec![0x90, 69, 100]), (0.2, vec![0x80, 69, 0])], 0.5)
            .unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");

        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 22050 * 2);
    }

    #[test]
    fn note_produces_audio_then_silence() {
        let mut p = processor();
        let wav = render_wav(&mut p, &[(0.0, vec![0x90, 69, 127]), (0.1, vec![0x80, 69, 0])], 1.0)
            .unwrap();
        let samples: Vec<i16> = hound::WavReader::new(Cursor::new(&wav))
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        let peak = |range: std::ops::Range<usize>| {
            samples[range].iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
        };
        assert!(peak(0..8820) > 1000, "expected sound during the note");
        assert!(peak(80000..88200) < 50, "expected silence after the release");
        assert_eq!(p.voice_count(), 0);
    }

    #[test]
    fn zero_duration_is_header_only() {
        let mut p = processor();
        let wav = render_wav(&mut p, &[], 0.0).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        assert_eq!(reader.len(), 0);
    }
}
