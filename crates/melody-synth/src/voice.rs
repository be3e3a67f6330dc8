//! Score notes -> sample-addressable voices.
//!
//! Every voice computes its output from the absolute frame index alone, so
//! rendering a range of frames never depends on what was rendered before it.

use melody_core::{midi_to_hz, Part, Score, Waveform};
use std::f32::consts::PI;

#[derive(Clone, Copy, Debug)]
pub(crate) enum VoiceKind {
    Tone { osc: Waveform, attack: f32, hold: f32, release: f32 },
    Bell { decay: f32 },
    Kick { dur: f32, start_hz: f32, end_hz: f32 },
    Snare { dur: f32, tone: f32 },
    Hat { dur: f32 },
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Voice {
    pub start: u64,
    pub end: u64,
    pub freq: f32,
    pub gain: f32,
    /// -1 = left, 1 = right.
    pub pan: f32,
    pub kind: VoiceKind,
}

/* =========================
   Layering (detune & gain)
   ========================= */

#[derive(Clone, Copy)]
struct LayerSpec { osc: Waveform, detune_cents: f32, gain: f32 }

fn layering_specs(list: &[Waveform]) -> Vec<LayerSpec> {
    if list.is_empty() {
        return vec![LayerSpec { osc: Waveform::Sine, detune_cents: 0.0, gain: 1.0 }];
    }
    list.iter()
        .enumerate()
        .map(|(i, &osc)| {
            let (detune_cents, gain) = match (osc, i) {
                (Waveform::Saw, 0) => (0.0, 0.55),
                (Waveform::Saw, 1) => (7.0, 0.20),
                (Waveform::Saw, _) => (-4.0, 0.10),
                (Waveform::Square, 0) => (0.0, 0.50),
                (Waveform::Square, 1) => (5.0, 0.18),
                (Waveform::Square, _) => (-5.0, 0.10),
                (Waveform::Triangle, 0) => (0.0, 0.75),
                (Waveform::Triangle, _) => (-3.0, 0.25),
                (Waveform::Sine, 0) => (0.0, 0.80),
                (Waveform::Sine, 1) => (1200.0, 0.15), // octave up hint
                (Waveform::Sine, _) => (4.0, 0.08),
            };
            LayerSpec { osc, detune_cents, gain }
        })
        .collect()
}

fn cents_to_ratio(cents: f32) -> f32 {
    2f32.powf(cents / 1200.0)
}

/* =========================
   Score -> voices
   ========================= */

fn secs_to_frame(secs: f64, sr: u32) -> u64 {
    (secs.max(0.0) * sr as f64).round() as u64
}

pub(crate) fn build_voices(score: &Score, timbre: &[Waveform], sr: u32) -> Vec<Voice> {
    let layers = layering_specs(timbre);
    let mut voices = Vec::with_capacity(score.notes.len() * 2);

    for n in &score.notes {
        let start = secs_to_frame(score.beats_to_secs(n.start), sr);
        let hold = score.beats_to_secs(n.length) as f32;
        let vel = n.velocity as f32 / 127.0;
        let freq = midi_to_hz(n.pitch as f32);
        let frames = |secs: f32| start + secs_to_frame(secs as f64, sr).max(1);

        match n.part {
            Part::Pad => {
                for (i, spec) in layers.iter().enumerate() {
                    let (attack, release) = (0.12, 0.35);
                    voices.push(Voice {
                        start,
                        end: frames(hold + release),
                        freq: freq * cents_to_ratio(spec.detune_cents),
                        gain: 0.14 * spec.gain * vel,
                        pan: if i % 2 == 0 { -0.3 } else { 0.3 },
                        kind: VoiceKind::Tone { osc: spec.osc, attack, hold, release },
                    });
                }
            }
            Part::Bass => voices.push(Voice {
                start,
                end: frames(hold + 0.06),
                freq,
                gain: 0.42 * vel,
                pan: 0.0,
                kind: VoiceKind::Tone { osc: Waveform::Triangle, attack: 0.008, hold, release: 0.06 },
            }),
            Part::Melody => {
                let primary = layers[0];
                voices.push(Voice {
                    start,
                    end: frames(hold + 0.12),
                    freq,
                    gain: 0.26 * vel,
                    pan: 0.15,
                    kind: VoiceKind::Tone { osc: primary.osc, attack: 0.01, hold, release: 0.12 },
                });
            }
            Part::Bells => voices.push(Voice {
                start,
                end: frames(hold + 1.5),
                freq,
                gain: 0.16 * vel,
                pan: -0.25,
                kind: VoiceKind::Bell { decay: 2.5 },
            }),
            Part::Kick => voices.push(Voice {
                start,
                end: frames(0.18),
                freq: 0.0,
                gain: 0.85 * vel,
                pan: 0.0,
                kind: VoiceKind::Kick { dur: 0.18, start_hz: 75.0, end_hz: 45.0 },
            }),
            Part::Snare => voices.push(Voice {
                start: start + secs_to_frame(0.005, sr),
                end: frames(0.145),
                freq: 220.0,
                gain: 0.5 * vel,
                pan: -0.05,
                kind: VoiceKind::Snare { dur: 0.14, tone: 0.6 },
            }),
            Part::Hat => voices.push(Voice {
                start,
                end: frames(0.05),
                freq: 0.0,
                gain: 0.22 * vel,
                pan: 0.2,
                kind: VoiceKind::Hat { dur: 0.05 },
            }),
        }
    }

    voices.sort_by_key(|v| v.start);
    voices
}

/* =========================
   Oscillators & envelopes
   ========================= */

fn osc_sample(osc: Waveform, phase: f32) -> f32 {
    let p = phase.fract();
    match osc {
        Waveform::Sine => (2.0 * PI * p).sin(),
        Waveform::Saw => 2.0 * p - 1.0,
        Waveform::Square => if p < 0.5 { 1.0 } else { -1.0 },
        Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
    }
}

/// Attack, gentle decay while held, linear release.
fn tone_env(t: f32, attack: f32, hold: f32, release: f32) -> f32 {
    let a = if t < attack { t / attack } else { 1.0 };
    let d = 1.0 - 0.35 * (t / hold.max(1e-3)).min(1.0).powf(1.5);
    let r = if t <= hold { 1.0 } else { (1.0 - (t - hold) / release.max(1e-3)).max(0.0) };
    a * d * r
}

/// Deterministic white-ish noise in [0, 1).
pub(crate) fn hash_noise(mut x: u64) -> f32 {
    // xorshift-ish
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    ((x.wrapping_mul(0x2545F4914F6CDD1D) >> 40) as f32) / (1u64 << 24) as f32
}

impl Voice {
    /// Mono sample at absolute frame `n`; callers guarantee `start <= n < end`.
    pub(crate) fn sample(&self, n: u64, sr: f32) -> f32 {
        let t = (n - self.start) as f32 / sr;
        let s = match self.kind {
            VoiceKind::Tone { osc, attack, hold, release } => {
                osc_sample(osc, self.freq * t) * tone_env(t, attack, hold, release)
            }
            VoiceKind::Bell { decay } => {
                let body = (2.0 * PI * (self.freq * t).fract()).sin();
                let partial = 0.3 * (2.0 * PI * (self.freq * 2.76 * t).fract()).sin();
                let a = (t / 0.004).min(1.0);
                (body + partial) * a * (-t * decay).exp()
            }
            VoiceKind::Kick { dur, start_hz, end_hz } => {
                let rel = (t / dur).min(1.0);
                // phase is the integral of the linear sweep
                let phase = start_hz * t + (end_hz - start_hz) * t * t / (2.0 * dur);
                (2.0 * PI * phase.fract()).sin() * (1.0 - rel).powf(4.0)
            }
            VoiceKind::Snare { dur, tone } => {
                let env = (1.0 - (t / dur).min(1.0)).powf(3.0);
                let body = (2.0 * PI * (self.freq * t).fract()).sin() * tone * 0.4;
                let noise = (hash_noise(n) * 2.0 - 1.0) * 0.6;
                (body + noise) * env
            }
            VoiceKind::Hat { dur } => {
                let env = (1.0 - (t / dur).min(1.0)).powf(4.0);
                let a = hash_noise(n.wrapping_mul(13)) * 2.0 - 1.0;
                // crude "HPF": subtract a second, decorrelated noise
                let b = hash_noise(n.wrapping_mul(11)) * 2.0 - 1.0;
                (a - 0.5 * b) * env
            }
        };
        s * self.gain
    }

    /// Constant-power-ish pan gains.
    pub(crate) fn pan_gains(&self) -> (f32, f32) {
        let p = self.pan.clamp(-1.0, 1.0);
        ((1.0 - p).sqrt() * 0.7071, (1.0 + p).sqrt() * 0.7071)
    }
}
