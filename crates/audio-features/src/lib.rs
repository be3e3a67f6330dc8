//! Lightweight analysis of rendered audio: windowed spectra, RMS envelopes and
//! spectral flux. Feeds the visualizer and lets tests inspect encoded output.

mod decode;

pub use decode::{decode_wav, downmix, pcm16_to_mono, DecodedWav};

use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

/// Compute frame indices (start) for a signal given window and hop sizes.
fn frames_indices(len: usize, win: usize, hop: usize) -> impl Iterator<Item = usize> {
    (0..).map(move |i| i * hop).take_while(move |&s| s + win <= len)
}

/// Hann window
fn hann(n: usize) -> Vec<f32> {
    let c = std::f32::consts::PI * 2.0 / (n as f32);
    (0..n).map(|i| 0.5 - 0.5 * (c * (i as f32)).cos()).collect()
}

/// Reusable forward FFT of a fixed window size.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(win: usize) -> Self {
        let win = win.max(2);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(win),
            window: hann(win),
            buf: vec![Complex32::new(0.0, 0.0); win],
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Magnitude spectrum (`win / 2` bins) of `samples`, zero-padded or truncated to the window.
    pub fn magnitudes(&mut self, samples: &[f32]) -> Vec<f32> {
        let win = self.window.len();
        for i in 0..win {
            let s = samples.get(i).copied().unwrap_or(0.0) * self.window[i];
            self.buf[i] = Complex32::new(s, 0.0);
        }
        self.fft.process(&mut self.buf);
        self.buf[..win / 2].iter().map(|c| c.norm() / win as f32).collect()
    }

    /// Spectrum folded into `bands` log-spaced bands, each normalized to [0, 1].
    pub fn bands(&mut self, samples: &[f32], bands: usize) -> Vec<f32> {
        let mags = self.magnitudes(samples);
        log_bands(&mags, bands)
    }
}

/// Group magnitude bins into `bands` log-spaced bands (mean magnitude, dB-scaled into [0, 1]).
pub fn log_bands(mags: &[f32], bands: usize) -> Vec<f32> {
    if bands == 0 || mags.len() < 2 {
        return vec![0.0; bands];
    }
    let n = mags.len() as f32;
    (0..bands)
        .map(|b| {
            let lo = n.powf(b as f32 / bands as f32) as usize;
            let hi = (n.powf((b + 1) as f32 / bands as f32) as usize).max(lo + 1).min(mags.len());
            let lo = lo.min(hi - 1);
            let mean = mags[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
            let db = 20.0 * mean.max(1e-6).log10();
            ((db + 80.0) / 80.0).clamp(0.0, 1.0)
        })
        .collect()
}

/// RMS per non-overlapping block of `block` samples (last partial block included).
pub fn rms_envelope(samples: &[f32], block: usize) -> Vec<f32> {
    let block = block.max(1);
    samples
        .chunks(block)
        .map(|c| (c.iter().map(|s| s * s).sum::<f32>() / c.len() as f32).sqrt())
        .collect()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Spectral flux (onset strength), normalized to [0, 1].
pub fn spectral_flux(samples: &[f32], win: usize, hop: usize) -> Vec<f32> {
    let mut analyzer = SpectrumAnalyzer::new(win);
    let win = analyzer.window_len();
    let mut prev_mag: Vec<f32> = vec![0.0; win / 2];
    let mut flux: Vec<f32> = Vec::new();

    for start in frames_indices(samples.len(), win, hop.max(1)) {
        let mags = analyzer.magnitudes(&samples[start..start + win]);
        let mut sum_pos = 0.0f32;
        for (m, prev) in mags.iter().zip(prev_mag.iter_mut()) {
            sum_pos += (m - *prev).max(0.0);
            *prev = *m;
        }
        flux.push(sum_pos);
    }
    // normalize
    let maxv = flux.iter().cloned().fold(0.0f32, f32::max).max(1e-9);
    for v in &mut flux { *v /= maxv; }
    flux
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n).map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin()).collect()
    }

    #[test]
    fn test_spectrum_peaks_at_tone() {
        let sr = 8_000.0;
        let mut a = SpectrumAnalyzer::new(1024);
        let mags = a.magnitudes(&sine(1_000.0, sr, 1024));
        let (bin, _) = mags
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        // 1 kHz at 8 kHz / 1024 -> bin 128
        assert!((bin as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_bands_are_normalized() {
        let mut a = SpectrumAnalyzer::new(512);
        let bands = a.bands(&sine(440.0, 44_100.0, 512), 16);
        assert_eq!(bands.len(), 16);
        assert!(bands.iter().all(|b| (0.0..=1.0).contains(b)));
        assert!(a.bands(&[], 8).iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_rms_and_peak() {
        let env = rms_envelope(&[1.0, -1.0, 0.0, 0.0, 0.5], 2);
        assert_eq!(env, vec![1.0, 0.0, 0.5]);
        assert_eq!(peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn test_flux_flags_onset() {
        let mut signal = vec![0.0f32; 4096];
        signal.extend(sine(600.0, 8_000.0, 4096));
        let flux = spectral_flux(&signal, 512, 256);
        let onset = flux.iter().position(|&f| f == 1.0).unwrap();
        let onset_sample = onset * 256;
        assert!(onset_sample + 512 > 4096 && onset_sample <= 4096);
    }
}
