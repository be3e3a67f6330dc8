//! Raster helpers: colour theme, spectrum bars, waveform trace.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use melody_core::CompositionPlan;
use palette::{FromColor, Hsv, Srgb};

/// Colours derived from the plan's key and gas bucket.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Theme {
    hue: f32,
    saturation: f32,
}

impl Theme {
    pub(crate) fn for_plan(plan: &CompositionPlan) -> Self {
        // 12 pitch classes around the colour wheel
        let hue = plan.key.root as f32 % 12.0 * 30.0;
        let saturation = 0.35 + 0.12 * plan.gas_bucket.min(4) as f32;
        Self { hue, saturation }
    }

    pub(crate) fn background(&self, level: f32) -> Rgb<u8> {
        hsv_to_rgb(self.hue, self.saturation * 0.6, 0.10 + 0.18 * level.clamp(0.0, 1.0))
    }

    pub(crate) fn bar(&self, band: usize, bands: usize) -> Rgb<u8> {
        let shift = 60.0 * band as f32 / bands.max(1) as f32;
        hsv_to_rgb(self.hue + shift, self.saturation, 0.85)
    }

    pub(crate) fn trace(&self) -> Rgb<u8> {
        hsv_to_rgb(self.hue + 180.0, 0.25, 0.95)
    }
}

fn hsv_to_rgb(hue: f32, s: f32, v: f32) -> Rgb<u8> {
    let hsv: Hsv = Hsv::new(hue.rem_euclid(360.0), s.clamp(0.0, 1.0), v.clamp(0.0, 1.0));
    let rgb: Srgb = Srgb::from_color(hsv);
    let rgb: Srgb<u8> = rgb.into_format();
    Rgb([rgb.red, rgb.green, rgb.blue])
}

pub(crate) fn fill(img: &mut RgbImage, color: Rgb<u8>) {
    for p in img.pixels_mut() {
        *p = color;
    }
}

/// Bars rise from the bottom edge; `levels` in [0, 1].
pub(crate) fn spectrum_bars(img: &mut RgbImage, levels: &[f32], theme: &Theme) {
    let (w, h) = img.dimensions();
    if levels.is_empty() || w == 0 || h == 0 {
        return;
    }
    let slot = w as f32 / levels.len() as f32;
    let bar_w = ((slot * 0.75) as u32).max(1);
    for (i, &level) in levels.iter().enumerate() {
        let bar_h = (level.clamp(0.0, 1.0) * h as f32 * 0.7) as u32;
        if bar_h == 0 {
            continue;
        }
        let x = (i as f32 * slot) as i32;
        let y = (h - bar_h) as i32;
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(bar_w, bar_h), theme.bar(i, levels.len()));
    }
}

/// Polyline of `samples` across the full width, centred vertically.
pub(crate) fn waveform(img: &mut RgbImage, samples: &[f32], theme: &Theme) {
    let (w, h) = img.dimensions();
    if samples.len() < 2 || w < 2 {
        return;
    }
    let mid = h as f32 / 2.0;
    let amp = h as f32 * 0.3;
    let color = theme.trace();
    let step = samples.len() as f32 / w as f32;
    let point = |x: u32| {
        let idx = ((x as f32 * step) as usize).min(samples.len() - 1);
        (x as f32, mid - samples[idx].clamp(-1.0, 1.0) * amp)
    };
    let mut prev = point(0);
    for x in 1..w {
        let next = point(x);
        draw_line_segment_mut(img, prev, next, color);
        prev = next;
    }
}

/// Mirrored envelope: one column per value, symmetric about the centre line.
pub(crate) fn envelope(img: &mut RgbImage, levels: &[f32], theme: &Theme) {
    let (w, h) = img.dimensions();
    let mid = h / 2;
    for (x, &level) in levels.iter().enumerate().take(w as usize) {
        let half = (level.clamp(0.0, 1.0) * mid as f32) as u32;
        if half == 0 {
            continue;
        }
        let color = theme.bar(x, levels.len());
        let top = (mid - half) as i32;
        draw_filled_rect_mut(img, Rect::at(x as i32, top).of_size(1, half * 2), color);
    }
}
