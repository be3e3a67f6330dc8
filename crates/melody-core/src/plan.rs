use serde::{Deserialize, Serialize};

use crate::config::{Complexity, Style};
use crate::theory::{Chord, Key, Waveform};

/// Fixed render rate for every plan.
pub const SAMPLE_RATE: u32 = 44_100;

/// Loop index per track, into the pools in [`crate::patterns`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelection {
    pub drums: usize,
    pub bass: usize,
    pub melody: usize,
    pub fx: usize,
}

/// Which tracks are audible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layers {
    pub drums: bool,
    pub bass: bool,
    pub melody: bool,
    pub fx: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectParams {
    /// Crackle density, 0 = off.
    pub vinyl_crackle: f32,
    /// Delay applied to off-beat sixteenths (0..0.35).
    pub swing: f32,
    /// Timing/velocity jitter (0..0.4).
    pub humanize: f32,
    pub lowpass_hz: f32,
    /// Wet level of the stereo echo.
    pub echo_mix: f32,
}

/// Everything needed to render one piece; a pure function of snapshot and config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionPlan {
    pub seed: u64,
    pub chain_id: u64,
    /// Decimal block number the plan was derived from.
    pub source_block: String,
    pub style: Style,
    pub complexity: Complexity,
    pub tempo_bpm: u32,
    pub key: Key,
    pub gas_bucket: u8,
    pub progression: Vec<Chord>,
    pub tracks: TrackSelection,
    pub layers: Layers,
    pub timbre: Vec<Waveform>,
    pub effects: EffectParams,
    pub duration_secs: u32,
    pub sample_rate: u32,
}

impl CompositionPlan {
    /// Exact number of sample frames a render of this plan produces.
    pub fn total_frames(&self) -> u64 {
        self.duration_secs as u64 * self.sample_rate as u64
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.tempo_bpm.max(1) as f64
    }

    /// NFT-style attribute list describing the plan.
    pub fn attributes(&self) -> serde_json::Value {
        serde_json::json!([
            { "trait_type": "Style", "value": self.style.as_str() },
            { "trait_type": "Tempo", "value": self.tempo_bpm },
            { "trait_type": "Key", "value": self.key.name() },
            { "trait_type": "Gas Bucket", "value": self.gas_bucket },
            { "trait_type": "Block", "value": self.source_block },
            { "trait_type": "Chain", "value": self.chain_id },
            { "trait_type": "Duration", "value": self.duration_secs },
        ])
    }
}
