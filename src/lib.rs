pub mod config;
pub mod dsp;
pub mod error;
pub mod midi;
pub mod soundbank;
pub mod synth;

use std::sync::Arc;

use wasm_bindgen::prelude::*;

use crate::config::SynthConfig;
use crate::dsp::mixer::Mixer;
use crate::soundbank::SoundBank;
use crate::synth::{Processor, SynthesizerSnapshot};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the wavetable-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed processor with a JSON sound bank.
#[wasm_bindgen]
pub struct WasmSynth {
    processor: Processor,
    mixer: Mixer,
}

#[wasm_bindgen]
impl WasmSynth {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f32, bank_json: &str) -> Result<WasmSynth, JsValue> {
        let bank = SoundBank::from_json(bank_json).map_err(js_error)?;
        let config = SynthConfig {
            sample_rate,
            ..SynthConfig::default()
        };
        let mut processor = Processor::new(config);
        processor.set_sound_bank(Arc::new(bank));
        Ok(WasmSynth {
            processor,
            mixer: Mixer::new(),
        })
    }

    /// Apply one raw MIDI message now.
    #[wasm_bindgen(js_name = processMessage)]
    pub fn process_message(&mut self, bytes: &[u8]) {
        self.processor.process_message(bytes, 0, false, None);
    }

    /// Render `frames` of interleaved stereo, with the effect sends mixed in.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut buses = vec![vec![0f32; frames]; 6];
        let [l, r, rl, rr, cl, cr] = &mut buses[..] else {
            return Vec::new();
        };
        self.processor
            .render_audio([l, r], [rl, rr], [cl, cr], 0, Some(frames));
        self.mixer.clear(frames);
        for pair in buses.chunks(2) {
            self.mixer.add(&pair[0], &pair[1], 1.0);
        }
        self.mixer.output_interleaved()
    }

    #[wasm_bindgen(js_name = voiceCount)]
    pub fn voice_count(&self) -> usize {
        self.processor.voice_count()
    }

    #[wasm_bindgen(js_name = currentTime)]
    pub fn current_time(&self) -> f64 {
        self.processor.current_time()
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.processor.get_snapshot()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = applySnapshot)]
    pub fn apply_snapshot(&mut self, snapshot: JsValue) -> Result<(), JsValue> {
        let snapshot: SynthesizerSnapshot =
            serde_wasm_bindgen::from_value(snapshot).map_err(js_error)?;
        self.processor.apply_snapshot(&snapshot);
        Ok(())
    }
}
