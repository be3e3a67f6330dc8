//! Melody Synth: composition plan -> stereo 16-bit PCM at 44.1 kHz.
//!
//! Two entry points over the same engine:
//! - [`render`] produces the whole [`AudioArtifact`] at once (snapshot export);
//! - [`StreamRenderer`] yields [`AudioChunk`]s for live playback.
//!
//! Concatenating the chunks of a stream is bit-identical to `render`, and the
//! output has exactly `plan.duration_secs * sample_rate` frames.

mod fx;
mod voice;

use hound::{SampleFormat, WavSpec, WavWriter};
use melody_core::{arrange, ArrangeError, CompositionPlan, SAMPLE_RATE};
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info};

use fx::MasterBus;
use voice::{build_voices, Voice};

/// Buffer quantum: frames per streamed chunk.
pub const CHUNK_FRAMES: usize = 4096;
pub const CHANNELS: u16 = 2;
pub const BITS_PER_SAMPLE: u16 = 16;

/* =========================
   Public types & API
   ========================= */

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid composition plan: {0}")]
    InvalidPlan(#[from] ArrangeError),
    #[error("unsupported sample rate {0} (expected 44100)")]
    InvalidSampleRate(u32),
    #[error("chunk size must be at least one frame")]
    InvalidChunkSize,
    #[error("wav encoding failed: {0}")]
    Encode(#[from] hound::Error),
}

/// Rendered PCM: interleaved stereo `i16`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    #[serde(skip)]
    pub samples: Vec<i16>,
}

impl AudioArtifact {
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64 / self.channels.max(1) as u64
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    /// BLAKE3 of the little-endian PCM payload, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for s in &self.samples {
            hasher.update(&s.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Encode to WAV 16-bit PCM in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, RenderError> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: SampleFormat::Int,
        };

        let capacity = self.samples.len() * 2 + 64;
        let mut cursor = Cursor::new(Vec::with_capacity(capacity));
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for &s in &self.samples {
                writer.write_sample(s)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

/// A slice of the stream starting at `start_frame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunk {
    pub start_frame: u64,
    /// Interleaved stereo.
    pub samples: Vec<i16>,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }
}

/// One-shot render of the full piece.
pub fn render(plan: &CompositionPlan) -> Result<AudioArtifact, RenderError> {
    let stream = StreamRenderer::new(plan, CHUNK_FRAMES)?;
    let mut samples = Vec::with_capacity(plan.total_frames() as usize * CHANNELS as usize);
    for chunk in stream {
        samples.extend_from_slice(&chunk.samples);
    }
    let audio = AudioArtifact {
        sample_rate: plan.sample_rate,
        channels: CHANNELS,
        bits_per_sample: BITS_PER_SAMPLE,
        samples,
    };
    info!(frames = audio.frames(), secs = audio.duration_secs(), "rendered audio");
    Ok(audio)
}

/* =========================
   Streaming renderer
   ========================= */

/// Chunked renderer; an `Iterator` over [`AudioChunk`]s.
pub struct StreamRenderer {
    voices: Vec<Voice>,
    next_voice: usize,
    active: Vec<Voice>,
    bus: MasterBus,
    cursor: u64,
    total_frames: u64,
    chunk_frames: usize,
    sr: f32,
}

impl StreamRenderer {
    pub fn new(plan: &CompositionPlan, chunk_frames: usize) -> Result<Self, RenderError> {
        if plan.sample_rate != SAMPLE_RATE {
            return Err(RenderError::InvalidSampleRate(plan.sample_rate));
        }
        if chunk_frames == 0 {
            return Err(RenderError::InvalidChunkSize);
        }
        let score = arrange(plan)?;
        let voices = build_voices(&score, &plan.timbre, plan.sample_rate);
        debug!(notes = score.notes.len(), voices = voices.len(), tempo = plan.tempo_bpm, "prepared voices");

        Ok(Self {
            voices,
            next_voice: 0,
            active: Vec::new(),
            bus: MasterBus::new(plan),
            cursor: 0,
            total_frames: plan.total_frames(),
            chunk_frames,
            sr: plan.sample_rate as f32,
        })
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }

    fn render_chunk(&mut self) -> AudioChunk {
        let start = self.cursor;
        let len = (self.total_frames - start).min(self.chunk_frames as u64) as usize;
        let end = start + len as u64;
        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];

        while self.next_voice < self.voices.len() && self.voices[self.next_voice].start < end {
            self.active.push(self.voices[self.next_voice]);
            self.next_voice += 1;
        }

        for v in &self.active {
            let (gl, gr) = v.pan_gains();
            for n in v.start.max(start)..v.end.min(end) {
                let s = v.sample(n, self.sr);
                let i = (n - start) as usize;
                left[i] += s * gl;
                right[i] += s * gr;
            }
        }
        self.active.retain(|v| v.end > end);

        let mut samples = Vec::with_capacity(len * 2);
        for i in 0..len {
            let (l, r) = self.bus.process(start + i as u64, left[i], right[i]);
            samples.push(to_i16(l));
            samples.push(to_i16(r));
        }

        self.cursor = end;
        AudioChunk { start_frame: start, samples }
    }
}

impl Iterator for StreamRenderer {
    type Item = AudioChunk;

    fn next(&mut self) -> Option<AudioChunk> {
        if self.cursor >= self.total_frames {
            return None;
        }
        Some(self.render_chunk())
    }
}

fn to_i16(s: f32) -> i16 {
    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
