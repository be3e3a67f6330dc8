//! Master bus: low-pass, echo, vinyl crackle, soft clip.
//!
//! State carries across chunks; it is only ever advanced one frame at a time in
//! order, so output does not depend on the chunk size.

use melody_core::CompositionPlan;
use std::f32::consts::PI;

use crate::voice::hash_noise;

struct OnePole {
    a: f32,
    y: f32,
}

impl OnePole {
    fn new(cutoff_hz: f32, sr: f32) -> Self {
        let fc = cutoff_hz.clamp(20.0, sr * 0.45);
        Self { a: 1.0 - (-2.0 * PI * fc / sr).exp(), y: 0.0 }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.y += self.a * (x - self.y);
        self.y
    }
}

/// Ping-pong delay: left feeds right and vice versa.
struct Echo {
    left: Vec<f32>,
    right: Vec<f32>,
    pos: usize,
    feedback: f32,
    mix: f32,
}

impl Echo {
    fn new(delay_frames: usize, mix: f32) -> Self {
        let len = delay_frames.max(1);
        Self { left: vec![0.0; len], right: vec![0.0; len], pos: 0, feedback: 0.35, mix }
    }

    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let dl = self.left[self.pos];
        let dr = self.right[self.pos];
        self.left[self.pos] = l + dr * self.feedback;
        self.right[self.pos] = r + dl * self.feedback;
        self.pos = (self.pos + 1) % self.left.len();
        (l + dl * self.mix, r + dr * self.mix)
    }
}

pub(crate) struct MasterBus {
    lp_left: OnePole,
    lp_right: OnePole,
    echo: Option<Echo>,
    crackle_density: f32,
    crackle_seed: u64,
    pop: f32,
    gain: f32,
}

impl MasterBus {
    pub(crate) fn new(plan: &CompositionPlan) -> Self {
        let sr = plan.sample_rate as f32;
        let fx = &plan.effects;
        // dotted eighth
        let delay_frames = (plan.seconds_per_beat() * 0.75 * plan.sample_rate as f64).round() as usize;
        Self {
            lp_left: OnePole::new(fx.lowpass_hz, sr),
            lp_right: OnePole::new(fx.lowpass_hz, sr),
            echo: (fx.echo_mix > 0.0).then(|| Echo::new(delay_frames, fx.echo_mix)),
            crackle_density: fx.vinyl_crackle.max(0.0),
            crackle_seed: plan.seed.rotate_left(17),
            pop: 0.0,
            gain: 0.8,
        }
    }

    /// Process one frame at absolute index `n`.
    pub(crate) fn process(&mut self, n: u64, l: f32, r: f32) -> (f32, f32) {
        let mut l = self.lp_left.process(l);
        let mut r = self.lp_right.process(r);

        if let Some(echo) = self.echo.as_mut() {
            (l, r) = echo.process(l, r);
        }

        if self.crackle_density > 0.0 {
            let key = n ^ self.crackle_seed;
            if hash_noise(key) < self.crackle_density * 0.01 {
                self.pop = (hash_noise(key.wrapping_mul(31)) * 2.0 - 1.0) * 0.35;
            }
            let hiss = (hash_noise(key.wrapping_mul(7)) * 2.0 - 1.0) * self.crackle_density * 0.08;
            l += self.pop + hiss;
            r += self.pop * 0.8 + hiss;
            self.pop *= 0.55;
        }

        ((l * self.gain).tanh(), (r * self.gain).tanh())
    }
}
