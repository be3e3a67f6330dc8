//! Per-style defaults the generator draws from.

use crate::config::Style;
use crate::theory::{ScaleKind, Waveform};

pub struct StyleProfile {
    /// Used when the style does not take its tempo from `lofiSettings`.
    pub bpm_range: [u32; 2],
    /// Scale per gas bucket, cheapest gas first.
    pub scales: [ScaleKind; 5],
    /// Diatonic degrees, one chord per bar.
    pub progressions: &'static [&'static [u8]],
    pub swing: f32,
    pub humanize: f32,
    pub timbre: &'static [Waveform],
    pub lowpass_scale: f32,
    pub drums: bool,
    /// Always voice chords with sevenths.
    pub extended_chords: bool,
}

const LOFI_PROGRESSIONS: &[&[u8]] = &[&[1, 4, 0, 5], &[0, 5, 3, 4], &[3, 4, 2, 5], &[0, 3, 1, 4], &[5, 3, 0, 4]];
const AMBIENT_PROGRESSIONS: &[&[u8]] = &[&[0, 3], &[0, 5, 3, 3], &[3, 0, 4, 0]];
const ELECTRONIC_PROGRESSIONS: &[&[u8]] = &[&[0, 5, 2, 6], &[0, 0, 5, 3], &[5, 3, 0, 4]];
const CLASSICAL_PROGRESSIONS: &[&[u8]] = &[&[0, 3, 4, 0], &[0, 5, 1, 4], &[0, 4, 5, 2, 3, 0, 3, 4]];
const JAZZ_PROGRESSIONS: &[&[u8]] = &[&[1, 4, 0, 0], &[0, 5, 1, 4], &[2, 5, 1, 4]];
const EXPERIMENTAL_PROGRESSIONS: &[&[u8]] = &[&[0, 6, 3, 1], &[0, 1, 0, 6], &[4, 2, 6, 5, 3]];

static LOFI: StyleProfile = StyleProfile {
    bpm_range: [70, 90],
    scales: [ScaleKind::Major, ScaleKind::Dorian, ScaleKind::Minor, ScaleKind::Dorian, ScaleKind::Phrygian],
    progressions: LOFI_PROGRESSIONS,
    swing: 0.18,
    humanize: 0.25,
    timbre: &[Waveform::Sine, Waveform::Triangle],
    lowpass_scale: 1.0,
    drums: true,
    extended_chords: false,
};

static AMBIENT: StyleProfile = StyleProfile {
    bpm_range: [60, 76],
    scales: [ScaleKind::Lydian, ScaleKind::Major, ScaleKind::Dorian, ScaleKind::Minor, ScaleKind::Minor],
    progressions: AMBIENT_PROGRESSIONS,
    swing: 0.0,
    humanize: 0.1,
    timbre: &[Waveform::Sine, Waveform::Sine, Waveform::Triangle],
    lowpass_scale: 0.8,
    drums: false,
    extended_chords: true,
};

static ELECTRONIC: StyleProfile = StyleProfile {
    bpm_range: [118, 128],
    scales: [ScaleKind::Minor, ScaleKind::Minor, ScaleKind::Dorian, ScaleKind::Phrygian, ScaleKind::Phrygian],
    progressions: ELECTRONIC_PROGRESSIONS,
    swing: 0.0,
    humanize: 0.05,
    timbre: &[Waveform::Saw, Waveform::Square],
    lowpass_scale: 1.6,
    drums: true,
    extended_chords: false,
};

static CLASSICAL: StyleProfile = StyleProfile {
    bpm_range: [80, 110],
    scales: [ScaleKind::Major, ScaleKind::Major, ScaleKind::Minor, ScaleKind::HarmonicMinor, ScaleKind::HarmonicMinor],
    progressions: CLASSICAL_PROGRESSIONS,
    swing: 0.0,
    humanize: 0.2,
    timbre: &[Waveform::Triangle, Waveform::Sine],
    lowpass_scale: 1.2,
    drums: false,
    extended_chords: false,
};

static JAZZ: StyleProfile = StyleProfile {
    bpm_range: [90, 140],
    scales: [ScaleKind::Mixolydian, ScaleKind::Dorian, ScaleKind::Dorian, ScaleKind::Minor, ScaleKind::Phrygian],
    progressions: JAZZ_PROGRESSIONS,
    swing: 0.33,
    humanize: 0.3,
    timbre: &[Waveform::Sine, Waveform::Square],
    lowpass_scale: 1.1,
    drums: true,
    extended_chords: true,
};

static EXPERIMENTAL: StyleProfile = StyleProfile {
    bpm_range: [60, 160],
    scales: [ScaleKind::Lydian, ScaleKind::Mixolydian, ScaleKind::Dorian, ScaleKind::Phrygian, ScaleKind::HarmonicMinor],
    progressions: EXPERIMENTAL_PROGRESSIONS,
    swing: 0.1,
    humanize: 0.35,
    timbre: &[Waveform::Square, Waveform::Saw, Waveform::Sine],
    lowpass_scale: 1.4,
    drums: true,
    extended_chords: false,
};

pub fn profile(style: Style) -> &'static StyleProfile {
    match style {
        Style::LofiHipHop => &LOFI,
        Style::Ambient => &AMBIENT,
        Style::Electronic => &ELECTRONIC,
        Style::Classical => &CLASSICAL,
        Style::Jazz => &JAZZ,
        Style::Experimental => &EXPERIMENTAL,
    }
}
