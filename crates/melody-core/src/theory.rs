use serde::{Deserialize, Serialize};

/// MIDI <-> frequency helpers
pub fn hz_to_midi(hz: f32) -> f32 { 69.0 + 12.0 * (hz / 440.0).log2() }
pub fn midi_to_hz(m: f32) -> f32 { 440.0 * 2f32.powf((m - 69.0) / 12.0) }

/// Oscillator shape used for tonal layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
    Saw,
    Square,
}

/// Scale machinery
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleKind {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    HarmonicMinor,
}

impl ScaleKind {
    /// Semitone steps for diatonic degrees 0..6.
    pub fn steps(self) -> [i32; 7] {
        match self {
            ScaleKind::Major => [0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => [0, 2, 3, 5, 7, 8, 10], // natural minor
            ScaleKind::Dorian => [0, 2, 3, 5, 7, 9, 10],
            ScaleKind::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            ScaleKind::Lydian => [0, 2, 4, 6, 7, 9, 11],
            ScaleKind::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
            ScaleKind::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
        }
    }
}

/// Map (root MIDI, diatonic degree index possibly >6 or <0) to absolute MIDI pitch, across octaves
pub fn degree_to_midi(root: i32, degree: i32, scale: ScaleKind) -> i32 {
    let steps = scale.steps();
    let octave = degree.div_euclid(7);
    let idx = degree.rem_euclid(7) as usize;
    root + steps[idx] + 12 * octave
}

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Tonal center of a composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Pitch class, 0 = C.
    pub root: u8,
    pub scale: ScaleKind,
}

impl Key {
    pub fn name(&self) -> String {
        let scale = serde_json::to_value(self.scale)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!("{} {}", NOTE_NAMES[(self.root % 12) as usize], scale)
    }

    /// MIDI pitch of a scale degree, anchored at the key root in the given octave (4 = middle C).
    pub fn pitch(&self, octave: i32, degree: i32) -> u8 {
        let root = 12 * (octave + 1) + self.root as i32;
        degree_to_midi(root, degree, self.scale).clamp(0, 127) as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Triad,
    Seventh,
    Ninth,
}

impl Extension {
    fn voices(self) -> i32 {
        match self {
            Extension::Triad => 3,
            Extension::Seventh => 4,
            Extension::Ninth => 5,
        }
    }
}

/// Diatonic chord built by stacking thirds on a scale degree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub degree: u8,
    pub extension: Extension,
}

impl Chord {
    /// Chord tones as scale degrees relative to the key root.
    pub fn degrees(&self) -> Vec<i32> {
        (0..self.extension.voices()).map(|k| self.degree as i32 + 2 * k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_hz_roundtrip_anchor() {
        assert!((midi_to_hz(69.0) - 440.0).abs() < 1e-3);
        assert!((hz_to_midi(261.6256) - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_degree_wraps_octaves() {
        assert_eq!(degree_to_midi(60, 7, ScaleKind::Major), 72);
        assert_eq!(degree_to_midi(60, -1, ScaleKind::Major), 59);
        assert_eq!(degree_to_midi(60, 2, ScaleKind::Minor), 63);
        assert_eq!(degree_to_midi(60, 3, ScaleKind::Lydian), 66);
    }

    #[test]
    fn test_key_pitch_and_name() {
        let key = Key { root: 9, scale: ScaleKind::Dorian };
        assert_eq!(key.pitch(4, 0), 69);
        assert_eq!(key.pitch(3, 2), 60);
        assert_eq!(key.name(), "A dorian");
    }

    #[test]
    fn test_chord_degrees_stack_thirds() {
        let c = Chord { degree: 1, extension: Extension::Ninth };
        assert_eq!(c.degrees(), vec![1, 3, 5, 7, 9]);
        let t = Chord { degree: 4, extension: Extension::Triad };
        assert_eq!(t.degrees(), vec![4, 6, 8]);
    }
}
