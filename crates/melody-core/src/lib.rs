//! Music generation core: theory, caller config, and the deterministic mapping
//! from a [`ChainSnapshot`](chain_data::ChainSnapshot) to a [`CompositionPlan`].

pub mod arrange;
pub mod compose;
pub mod config;
mod error;
mod midi;
pub mod patterns;
pub mod plan;
pub mod rng;
pub mod style;
pub mod theory;

pub use arrange::{arrange, check_plan, Part, Score, ScoreNote};
pub use compose::{compose, gas_bucket, tempo_for_block};
pub use config::{Complexity, LofiSettings, MusicConfig, Style, MAX_DURATION};
pub use error::{ArrangeError, ComposeError};
pub use plan::{CompositionPlan, EffectParams, Layers, TrackSelection, SAMPLE_RATE};
pub use theory::{degree_to_midi, hz_to_midi, midi_to_hz, Chord, Extension, Key, ScaleKind, Waveform};
