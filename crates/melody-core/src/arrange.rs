//! Composition plan -> timed score (beats), shared by the synth and MIDI export.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Complexity;
use crate::patterns::{DRUM_LOOPS, BASS_LOOPS, FX_LOOPS, MELODY_MOTIFS, StepNote};
use crate::plan::CompositionPlan;
use crate::rng::component_rng;
use crate::{ArrangeError, MAX_DURATION};

const BEATS_PER_BAR: f64 = 4.0;
const STEP: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Part {
    Pad,
    Bass,
    Melody,
    Bells,
    Kick,
    Snare,
    Hat,
}

impl Part {
    pub fn is_drum(self) -> bool {
        matches!(self, Part::Kick | Part::Snare | Part::Hat)
    }

    pub fn midi_channel(self) -> u8 {
        match self {
            Part::Pad => 0,
            Part::Bass => 1,
            Part::Melody => 2,
            Part::Bells => 3,
            Part::Kick | Part::Snare | Part::Hat => 9,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub part: Part,
    pub pitch: u8,
    /// Beats from the start of the piece.
    pub start: f64,
    /// Beats.
    pub length: f64,
    pub velocity: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub tempo_bpm: u32,
    pub total_beats: f64,
    /// Sorted by start time.
    pub notes: Vec<ScoreNote>,
}

impl Score {
    pub fn beats_to_secs(&self, beats: f64) -> f64 {
        beats * 60.0 / self.tempo_bpm as f64
    }
}

fn check_loop(track: &'static str, index: usize, pool: usize) -> Result<(), ArrangeError> {
    if index >= pool {
        return Err(ArrangeError::LoopOutOfRange { track, index, pool });
    }
    Ok(())
}

/// Reject plans that could not have come out of `compose` (hand-edited or corrupted).
pub fn check_plan(plan: &CompositionPlan) -> Result<(), ArrangeError> {
    if plan.tempo_bpm == 0 || plan.tempo_bpm > 400 {
        return Err(ArrangeError::InvalidTempo(plan.tempo_bpm));
    }
    if plan.duration_secs == 0 || plan.duration_secs > MAX_DURATION {
        return Err(ArrangeError::InvalidDuration(plan.duration_secs));
    }
    if plan.progression.is_empty() {
        return Err(ArrangeError::EmptyProgression);
    }
    if let Some(bad) = plan.progression.iter().find(|c| c.degree > 6) {
        return Err(ArrangeError::InvalidChord(bad.degree));
    }
    check_loop("drums", plan.tracks.drums, DRUM_LOOPS.len())?;
    check_loop("bass", plan.tracks.bass, BASS_LOOPS.len())?;
    check_loop("melody", plan.tracks.melody, MELODY_MOTIFS.len())?;
    check_loop("fx", plan.tracks.fx, FX_LOOPS.len())?;
    Ok(())
}

struct Builder {
    notes: Vec<ScoreNote>,
}

impl Builder {
    fn push(&mut self, part: Part, pitch: u8, start: f64, length: f64, velocity: u8) {
        self.notes.push(ScoreNote { part, pitch, start, length, velocity });
    }

    fn steps(&mut self, part: Part, pattern: &[StepNote], bar_start: f64, velocity: u8, pitch: impl Fn(i32) -> u8) {
        for &(step, degree, len) in pattern {
            self.push(part, pitch(degree as i32), bar_start + step as f64 * STEP, len as f64 * STEP, velocity);
        }
    }
}

/// Lay the plan out bar by bar, then apply swing and humanize.
pub fn arrange(plan: &CompositionPlan) -> Result<Score, ArrangeError> {
    check_plan(plan)?;

    let total_beats = plan.duration_secs as f64 * plan.tempo_bpm as f64 / 60.0;
    let bars = (total_beats / BEATS_PER_BAR).ceil() as usize;
    let key = plan.key;
    let mut phrase_rng = component_rng(plan.seed, "phrase");
    let mut b = Builder { notes: Vec::new() };

    for bar in 0..bars {
        let chord = plan.progression[bar % plan.progression.len()];
        let root = chord.degree as i32;
        let bar_start = bar as f64 * BEATS_PER_BAR;

        for degree in chord.degrees() {
            b.push(Part::Pad, key.pitch(3, degree), bar_start, BEATS_PER_BAR, 56);
        }

        if plan.layers.bass {
            b.steps(Part::Bass, BASS_LOOPS[plan.tracks.bass], bar_start, 92, |d| key.pitch(2, root + d));
        }

        if plan.layers.drums {
            let lp = DRUM_LOOPS[plan.tracks.drums];
            for step in 0..16u16 {
                let at = bar_start + step as f64 * STEP;
                if lp.kick >> step & 1 == 1 {
                    b.push(Part::Kick, 36, at, STEP, 112);
                }
                if lp.snare >> step & 1 == 1 {
                    b.push(Part::Snare, 38, at, STEP, 96);
                }
                if lp.hat >> step & 1 == 1 {
                    b.push(Part::Hat, 42, at, STEP, if step % 4 == 0 { 72 } else { 58 });
                }
            }
        }

        if plan.layers.melody {
            // odd four-bar phrases answer a third higher
            let lift = if (bar / 4) % 2 == 1 { 2 } else { 0 };
            for &(step, degree, len) in MELODY_MOTIFS[plan.tracks.melody] {
                if plan.complexity != Complexity::High && phrase_rng.gen::<f32>() < 0.2 {
                    continue;
                }
                let pitch = key.pitch(4, root + degree as i32 + lift);
                b.push(Part::Melody, pitch, bar_start + step as f64 * STEP, len as f64 * STEP, 84);
            }
        }

        if plan.layers.fx && bar % 2 == 0 {
            b.steps(Part::Bells, FX_LOOPS[plan.tracks.fx], bar_start, 60, |d| key.pitch(5, d));
        }
    }

    let mut notes = b.notes;
    apply_feel(&mut notes, plan.effects.swing, plan.effects.humanize, plan.seed);

    notes.retain(|n| n.start < total_beats);
    for n in &mut notes {
        n.length = n.length.min(total_beats - n.start);
    }
    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));

    Ok(Score { tempo_bpm: plan.tempo_bpm, total_beats, notes })
}

fn apply_feel(notes: &mut [ScoreNote], swing: f32, human: f32, seed: u64) {
    let swing = swing.clamp(0.0, 0.35) as f64;
    let human = human.clamp(0.0, 0.4) as f64;
    let mut rng = component_rng(seed, "humanize");

    for n in notes.iter_mut() {
        let step = (n.start / STEP).round() as i64;
        if step % 2 == 1 && swing > 0.0 {
            n.start += swing * STEP;
        }
        if human > 0.0 {
            // timing jitter ±2% of note length
            let jt = (rng.gen::<f64>() * 2.0 - 1.0) * 0.02 * human * n.length;
            n.start = (n.start + jt).max(0.0);
            // velocity jitter ±12%
            let jv = 1.0 + (rng.gen::<f64>() * 2.0 - 1.0) * 0.12 * human;
            n.velocity = (n.velocity as f64 * jv).clamp(1.0, 127.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::config::{MusicConfig, Style};
    use chain_data::{BigUint, ChainSnapshot};
    use pretty_assertions::assert_eq;

    fn plan(complexity: Complexity) -> CompositionPlan {
        let snap = ChainSnapshot::new(
            33139,
            BigUint::from(12345u32),
            BigUint::from(25_000_000_000u64),
            1_700_000_000,
            &["0x01", "0x02"],
        );
        let cfg = MusicConfig { duration: 20, complexity, ..MusicConfig::default() };
        compose(&snap, &cfg).unwrap()
    }

    #[test]
    fn test_arrange_is_deterministic() {
        let p = plan(Complexity::High);
        assert_eq!(arrange(&p).unwrap(), arrange(&p).unwrap());
    }

    #[test]
    fn test_notes_stay_inside_the_piece() {
        let score = arrange(&plan(Complexity::High)).unwrap();
        assert!(!score.notes.is_empty());
        assert!((score.total_beats - 20.0 * 75.0 / 60.0).abs() < 1e-9);
        for n in &score.notes {
            assert!(n.start >= 0.0 && n.start < score.total_beats);
            assert!(n.start + n.length <= score.total_beats + 1e-9);
            assert!(n.velocity >= 1 && n.velocity <= 127);
        }
        assert!(score.notes.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn test_layers_gate_parts() {
        let low = arrange(&plan(Complexity::Low)).unwrap();
        assert!(low.notes.iter().all(|n| n.part != Part::Melody && n.part != Part::Bells));
        assert!(low.notes.iter().any(|n| n.part == Part::Kick));

        let high = arrange(&plan(Complexity::High)).unwrap();
        assert!(high.notes.iter().any(|n| n.part == Part::Melody));
        assert!(high.notes.iter().any(|n| n.part == Part::Bells));
    }

    #[test]
    fn test_ambient_has_no_drums() {
        let mut p = plan(Complexity::Medium);
        p.style = Style::Ambient;
        p.layers.drums = false;
        let score = arrange(&p).unwrap();
        assert!(score.notes.iter().all(|n| !n.part.is_drum()));
    }

    #[test]
    fn test_out_of_range_loop_is_rejected() {
        let mut p = plan(Complexity::Medium);
        p.tracks.drums = 99;
        assert_eq!(
            arrange(&p).unwrap_err(),
            ArrangeError::LoopOutOfRange { track: "drums", index: 99, pool: DRUM_LOOPS.len() }
        );
    }

    #[test]
    fn test_corrupt_plans_are_rejected() {
        let mut p = plan(Complexity::Medium);
        p.progression.clear();
        assert_eq!(arrange(&p).unwrap_err(), ArrangeError::EmptyProgression);

        let mut p = plan(Complexity::Medium);
        p.tempo_bpm = 0;
        assert_eq!(arrange(&p).unwrap_err(), ArrangeError::InvalidTempo(0));
    }
}
