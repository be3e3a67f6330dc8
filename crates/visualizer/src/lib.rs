//! Video visualizer: turns rendered audio plus its plan into a sequence of PNG
//! frames and a single preview image (used as the NFT artwork).

mod draw;

use audio_features::{pcm16_to_mono, peak, rms_envelope, spectral_flux, SpectrumAnalyzer};
use image::{ImageFormat, RgbImage};
use melody_core::CompositionPlan;
use melody_synth::{AudioArtifact, CHANNELS, CHUNK_FRAMES};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info};

use draw::Theme;

const FFT_WINDOW: usize = 2048;
const SPECTRUM_BANDS: usize = 24;

#[derive(Debug, Error)]
pub enum VisualError {
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("invalid visual config: {0}")]
    InvalidConfig(String),
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self { width: 320, height: 180, fps: 4 }
    }
}

impl VisualConfig {
    pub fn validate(&self) -> Result<(), VisualError> {
        if self.width < 2 || self.height < 2 {
            return Err(VisualError::InvalidConfig(format!("frame size {}x{} too small", self.width, self.height)));
        }
        if self.fps == 0 || self.fps > 60 {
            return Err(VisualError::InvalidConfig(format!("fps {} outside 1..=60", self.fps)));
        }
        Ok(())
    }
}

/// Encoded frames plus a still preview; every image is a PNG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisualArtifact {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: Vec<Vec<u8>>,
    pub preview_png: Vec<u8>,
}

impl VisualArtifact {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Render the visual track for `audio`, which must be the render of `plan`.
pub fn render(plan: &CompositionPlan, audio: &AudioArtifact, cfg: &VisualConfig) -> Result<VisualArtifact, VisualError> {
    cfg.validate()?;
    check_audio(plan, audio)?;

    let mono = pcm16_to_mono(&audio.samples, audio.channels as usize);
    let theme = Theme::for_plan(plan);
    let frame_count = plan.duration_secs as usize * cfg.fps as usize;
    let sr = audio.sample_rate as usize;
    let global_peak = peak(&mono).max(1e-6);
    // one onset value per frame; flashes the background on hits
    let onsets = spectral_flux(&mono, FFT_WINDOW, sr / cfg.fps as usize);

    let mut analyzer = SpectrumAnalyzer::new(FFT_WINDOW);
    let mut frames = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let start = (i * sr / cfg.fps as usize).min(mono.len());
        let end = (start + FFT_WINDOW).min(mono.len());
        let window = &mono[start..end];

        let level = rms_envelope(window, window.len().max(1)).first().copied().unwrap_or(0.0) / global_peak;
        let bands = analyzer.bands(window, SPECTRUM_BANDS);

        let mut img = RgbImage::new(cfg.width, cfg.height);
        let onset = onsets.get(i).copied().unwrap_or(0.0);
        draw::fill(&mut img, theme.background(level.max(0.6 * onset)));
        draw::spectrum_bars(&mut img, &bands, &theme);
        draw::waveform(&mut img, window, &theme);
        frames.push(encode_png(&img)?);
    }
    debug!(frames = frames.len(), width = cfg.width, height = cfg.height, "rendered frames");

    let preview_png = encode_png(&preview(&mono, &theme, cfg.width, cfg.height))?;
    info!(frames = frames.len(), fps = cfg.fps, preview_bytes = preview_png.len(), "visuals ready");

    Ok(VisualArtifact { width: cfg.width, height: cfg.height, fps: cfg.fps, frames, preview_png })
}

/// Whole-track RMS envelope, one column per pixel.
fn preview(mono: &[f32], theme: &Theme, width: u32, height: u32) -> RgbImage {
    let block = mono.len().div_ceil(width as usize).max(1);
    let env = rms_envelope(mono, block);
    let loudest = env.iter().cloned().fold(0.0f32, f32::max).max(1e-6);
    let levels: Vec<f32> = env.iter().map(|v| v / loudest).collect();

    let mut img = RgbImage::new(width, height);
    draw::fill(&mut img, theme.background(0.2));
    draw::envelope(&mut img, &levels, theme);
    img
}

fn check_audio(plan: &CompositionPlan, audio: &AudioArtifact) -> Result<(), VisualError> {
    if audio.samples.is_empty() {
        return Err(VisualError::InvalidAudio("no samples".into()));
    }
    if audio.sample_rate != plan.sample_rate {
        return Err(VisualError::InvalidAudio(format!(
            "sample rate {} does not match plan ({})",
            audio.sample_rate, plan.sample_rate
        )));
    }
    if audio.channels != CHANNELS {
        return Err(VisualError::InvalidAudio(format!("expected {CHANNELS} channels, got {}", audio.channels)));
    }
    let drift = audio.frames().abs_diff(plan.total_frames());
    if drift > CHUNK_FRAMES as u64 {
        return Err(VisualError::InvalidAudio(format!(
            "audio has {} frames, plan expects {} (drift {drift})",
            audio.frames(),
            plan.total_frames()
        )));
    }
    Ok(())
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, VisualError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}
