use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use melody_core::ArrangeError;
use melody_synth::RenderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::RunOutput;
use crate::state::EngineState;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("midi export failed: {0}")]
    Midi(#[from] ArrangeError),
    #[error("wav export failed: {0}")]
    Wav(#[from] RenderError),
    #[error("json export failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("artifact payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One file-like output of a run. Binary payloads travel as base64.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum OutputArtifact {
    MidiBase64 { name: String, data_b64: String },
    WavBase64 { name: String, data_b64: String },
    Json { name: String, data: serde_json::Value },
    PngBase64 { name: String, data_b64: String },
}

impl OutputArtifact {
    pub fn name(&self) -> &str {
        match self {
            OutputArtifact::MidiBase64 { name, .. }
            | OutputArtifact::WavBase64 { name, .. }
            | OutputArtifact::Json { name, .. }
            | OutputArtifact::PngBase64 { name, .. } => name,
        }
    }

    /// Decoded file contents, ready to be written out.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        match self {
            OutputArtifact::MidiBase64 { data_b64, .. }
            | OutputArtifact::WavBase64 { data_b64, .. }
            | OutputArtifact::PngBase64 { data_b64, .. } => Ok(B64.decode(data_b64)?),
            OutputArtifact::Json { data, .. } => Ok(serde_json::to_vec_pretty(data)?),
        }
    }
}

#[derive(Clone, Serialize, Debug)]
pub struct GenerateResponse {
    pub state: EngineState,
    pub artifacts: Vec<OutputArtifact>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExportOptions {
    /// Include every video frame, not just the preview.
    pub frames: bool,
}

/// Turn a finished run into named artifacts: `track.wav`, `track.mid`,
/// `plan.json`, `snapshot.json`, `preview.png`, then optional
/// `frame_NNNNN.png` and `nft.json`.
pub fn export(out: &RunOutput, opts: ExportOptions) -> Result<Vec<OutputArtifact>, ExportError> {
    let mut artifacts = vec![
        OutputArtifact::WavBase64 { name: "track.wav".into(), data_b64: B64.encode(out.audio.to_wav_bytes()?) },
        OutputArtifact::MidiBase64 { name: "track.mid".into(), data_b64: B64.encode(out.plan.to_midi_bytes()?) },
        OutputArtifact::Json { name: "plan.json".into(), data: serde_json::to_value(&out.plan)? },
        OutputArtifact::Json { name: "snapshot.json".into(), data: serde_json::to_value(&out.snapshot)? },
        OutputArtifact::PngBase64 { name: "preview.png".into(), data_b64: B64.encode(&out.visual.preview_png) },
    ];
    if opts.frames {
        artifacts.extend(out.visual.frames.iter().enumerate().map(|(i, png)| OutputArtifact::PngBase64 {
            name: format!("frame_{i:05}.png"),
            data_b64: B64.encode(png),
        }));
    }
    if let Some(record) = &out.record {
        artifacts.push(OutputArtifact::Json { name: "nft.json".into(), data: serde_json::to_value(record)? });
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{GenerateRequest, MusicEngine};
    use chain_data::{BigUint, ChainSnapshot, FixedSource};
    use melody_core::MusicConfig;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;
    use visualizer::VisualConfig;

    async fn run_output() -> RunOutput {
        let config = EngineConfig {
            snapshot_max_age: None,
            visual: VisualConfig { width: 16, height: 9, fps: 2 },
            ..EngineConfig::default()
        };
        let music = MusicConfig { duration: 1, ..MusicConfig::default() };
        let snapshot = ChainSnapshot::new(33139, BigUint::from(12345u32), BigUint::from(3_000_000_000u64), 1_700_000_000, &["0x01"]);
        let source = std::sync::Arc::new(FixedSource::new(snapshot.clone()));
        let engine = MusicEngine::builder(config, music).chain_source(source).build().unwrap();
        engine.run(GenerateRequest::from_snapshot(snapshot), CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_export_names_and_payloads() {
        let out = run_output().await;
        let artifacts = export(&out, ExportOptions::default()).unwrap();
        let names: Vec<_> = artifacts.iter().map(OutputArtifact::name).collect();
        assert_eq!(names, vec!["track.wav", "track.mid", "plan.json", "snapshot.json", "preview.png"]);

        let wav = artifacts[0].to_bytes().unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        let midi = artifacts[1].to_bytes().unwrap();
        assert_eq!(&midi[..4], b"MThd");
        let png = artifacts[4].to_bytes().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_export_with_frames() {
        let out = run_output().await;
        let artifacts = export(&out, ExportOptions { frames: true }).unwrap();
        assert_eq!(artifacts.len(), 5 + out.visual.frame_count());
        assert_eq!(artifacts.last().map(OutputArtifact::name), Some("frame_00001.png"));
    }
}
