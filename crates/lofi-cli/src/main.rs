use anyhow::{bail, Context, Result};
use chain_data::{BigUint, BlockSelector, ChainSnapshot, FixedSource};
use clap::{Args, Parser, Subcommand};
use melody_core::{compose, Complexity, LofiSettings, MusicConfig, Style};
use melody_synth::{StreamRenderer, CHUNK_FRAMES};
use music_engine::{
    export, CancellationToken, EngineConfig, ExportOptions, GenerateRequest, MusicEngine, OutputArtifact, RunOutput,
};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// lofi – music generated from live chain state.
/// Commands:
///   - generate                   (fetch a block over JSON-RPC, render, optionally persist)
///   - offline --block N ...      (same pipeline from a hand-written snapshot, no network)
///   - plan --block N ...         (print the composition plan as JSON)
///   - stream --block N ...       (raw s16le stereo PCM on stdout, e.g. `| aplay -f cd`)
///   - analyze track.wav          (loudness/onset summary of a rendered WAV as JSON)
#[derive(Parser, Debug)]
#[command(name = "lofi", version, about = "Chain-driven generative lofi music")]
struct Cli {
    /// Directory for rendered files (wav/mid/png/json)
    #[arg(long, global = true, default_value = "outputs")]
    out_dir: PathBuf,

    /// TOML engine config; CHAIN_MUSIC_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured chain
    #[arg(long, global = true)]
    chain_id: Option<u64>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a block from the configured RPC endpoint and render it
    Generate {
        /// Block number; latest when omitted
        #[arg(long)]
        block: Option<u64>,
        /// Upload the artifacts (and mint when configured)
        #[arg(long)]
        persist: bool,
        /// Also write every video frame
        #[arg(long)]
        frames: bool,
        #[command(flatten)]
        music: MusicArgs,
    },

    /// Render from a snapshot given on the command line
    Offline {
        #[command(flatten)]
        snapshot: SnapshotArgs,
        #[arg(long)]
        frames: bool,
        #[command(flatten)]
        music: MusicArgs,
    },

    /// Print the composition plan for a snapshot
    Plan {
        #[command(flatten)]
        snapshot: SnapshotArgs,
        #[command(flatten)]
        music: MusicArgs,
    },

    /// Stream PCM for a snapshot to stdout
    Stream {
        #[command(flatten)]
        snapshot: SnapshotArgs,
        #[command(flatten)]
        music: MusicArgs,
    },

    // ----- DEBUG ROUTES -----
    /// Summarize a WAV file (e.g. a previously written track.wav)
    Analyze {
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MusicArgs {
    #[arg(long, default_value = "lofi-hiphop")]
    style: Style,
    /// Seconds
    #[arg(long, default_value_t = 60)]
    duration: u32,
    #[arg(long, default_value = "medium")]
    complexity: Complexity,
    #[arg(long, default_value_t = 70)]
    bpm_min: u32,
    #[arg(long, default_value_t = 90)]
    bpm_max: u32,
    #[arg(long)]
    no_crackle: bool,
    #[arg(long)]
    no_jazz_chords: bool,
}

impl MusicArgs {
    fn to_config(&self, chain_id: u64) -> MusicConfig {
        MusicConfig {
            chain_id,
            style: self.style,
            duration: self.duration,
            lofi_settings: LofiSettings {
                bpm_range: [self.bpm_min, self.bpm_max],
                vinyl_crackle: !self.no_crackle,
                jazz_chords: !self.no_jazz_chords,
            },
            complexity: self.complexity,
        }
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    #[arg(long)]
    block: u64,
    /// Gas price in gwei
    #[arg(long, default_value_t = 3)]
    gas_gwei: u64,
    /// Exact gas price in wei; wins over --gas-gwei
    #[arg(long)]
    gas_wei: Option<String>,
    /// Unix seconds; now when omitted
    #[arg(long)]
    timestamp: Option<u64>,
    #[arg(long, default_value_t = 24)]
    tx_count: u32,
}

impl SnapshotArgs {
    fn to_snapshot(&self, chain_id: u64) -> Result<ChainSnapshot> {
        let gas_price = match &self.gas_wei {
            Some(wei) => wei.parse::<BigUint>().with_context(|| format!("invalid --gas-wei '{wei}'"))?,
            None => BigUint::from(self.gas_gwei) * BigUint::from(1_000_000_000u64),
        };
        let timestamp = match self.timestamp {
            Some(ts) => ts,
            None => SystemTime::now().duration_since(UNIX_EPOCH).context("system clock before 1970")?.as_secs(),
        };
        // stand-in transaction hashes, stable per (block, index)
        let txs: Vec<String> = (0..self.tx_count).map(|i| format!("0x{:048x}{:016x}", self.block, i)).collect();
        Ok(ChainSnapshot::new(chain_id, BigUint::from(self.block), gas_price, timestamp, &txs))
    }
}

/// Onset frames are counted at this normalized spectral-flux level.
const ONSET_THRESHOLD: f32 = 0.5;

fn analyze_wav(bytes: &[u8]) -> Result<serde_json::Value> {
    let wav = audio_features::decode_wav(bytes)?;
    let mono = wav.to_mono();
    let hop = (wav.sample_rate / 10).max(1) as usize;
    let rms = audio_features::rms_envelope(&mono, hop);
    let flux = audio_features::spectral_flux(&mono, 1024, hop);
    Ok(serde_json::json!({
        "sampleRate": wav.sample_rate,
        "channels": wav.channels,
        "frames": wav.frames(),
        "durationSecs": wav.frames() as f64 / wav.sample_rate.max(1) as f64,
        "peak": audio_features::peak(&wav.samples),
        "meanRms": rms.iter().sum::<f32>() / rms.len().max(1) as f32,
        "onsets": flux.iter().filter(|&&f| f >= ONSET_THRESHOLD).count(),
    }))
}

fn write_artifacts(out_dir: &Path, artifacts: &[OutputArtifact]) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("failed creating {}", out_dir.display()))?;
    for art in artifacts {
        let p = out_dir.join(art.name());
        fs::write(&p, art.to_bytes()?).with_context(|| format!("failed writing {}", p.display()))?;
        eprintln!("✓ wrote {}", p.display());
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(chain_id) = cli.chain_id {
        config.chain_id = chain_id;
    }
    Ok(config)
}

/// Cancel the run on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            trigger.cancel();
        }
    });
    token
}

fn report(out: &RunOutput) {
    eprintln!(
        "♪ block {} · {} bpm · {} · {:.1}s · {} frames",
        out.snapshot.block_number(),
        out.plan.tempo_bpm,
        out.plan.key.name(),
        out.audio.duration_secs(),
        out.visual.frame_count()
    );
    if let Some(record) = &out.record {
        eprintln!("  metadata {}", record.metadata_uri);
        if let Some(tx) = &record.tx_hash {
            eprintln!("  minted in {tx}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let chain_id = config.chain_id;

    match &cli.cmd {
        Commands::Generate { block, persist, frames, music } => {
            let engine = MusicEngine::builder(config, music.to_config(chain_id)).build()?;
            let request = GenerateRequest {
                block: block.map_or(BlockSelector::Latest, BlockSelector::Number),
                persist: *persist,
                ..GenerateRequest::latest()
            };
            let out = engine.run(request, cancel_on_ctrl_c()).await?;
            write_artifacts(&cli.out_dir, &export(&out, ExportOptions { frames: *frames })?)?;
            report(&out);
        }

        Commands::Offline { snapshot, frames, music } => {
            let snapshot = snapshot.to_snapshot(chain_id)?;
            // hand-written snapshots carry arbitrary timestamps
            let config = EngineConfig { snapshot_max_age: None, ..config };
            let engine = MusicEngine::builder(config, music.to_config(chain_id))
                .chain_source(Arc::new(FixedSource::new(snapshot.clone())))
                .build()?;
            let out = engine.run(GenerateRequest::from_snapshot(snapshot), cancel_on_ctrl_c()).await?;
            write_artifacts(&cli.out_dir, &export(&out, ExportOptions { frames: *frames })?)?;
            report(&out);
        }

        Commands::Plan { snapshot, music } => {
            let music = music.to_config(chain_id);
            music.validate()?;
            let plan = compose(&snapshot.to_snapshot(chain_id)?, &music)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }

        Commands::Stream { snapshot, music } => {
            let music = music.to_config(chain_id);
            music.validate()?;
            let plan = compose(&snapshot.to_snapshot(chain_id)?, &music)?;
            let stream = StreamRenderer::new(&plan, CHUNK_FRAMES)?;
            let mut stdout = BufWriter::new(io::stdout().lock());
            for chunk in stream {
                let bytes: Vec<u8> = chunk.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = stdout.write_all(&bytes) {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        return Ok(());
                    }
                    bail!("failed writing PCM: {e}");
                }
            }
            stdout.flush().context("failed flushing PCM")?;
        }

        Commands::Analyze { input } => {
            let bytes = fs::read(input).with_context(|| format!("failed reading audio: {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&analyze_wav(&bytes)?)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_args_build_snapshot() {
        let cli = Cli::try_parse_from([
            "lofi", "offline", "--block", "12345", "--gas-gwei", "12", "--timestamp", "1700000000", "--tx-count", "3",
        ])
        .unwrap();
        let Commands::Offline { snapshot, music, .. } = cli.cmd else { panic!("expected offline") };
        let snap = snapshot.to_snapshot(33139).unwrap();
        assert_eq!(snap.block_number(), &BigUint::from(12345u32));
        assert_eq!(snap.gas_price(), &BigUint::from(12_000_000_000u64));
        assert_eq!(snap.transaction_count(), 3);

        let music = music.to_config(33139);
        assert_eq!(music.style, Style::LofiHipHop);
        assert_eq!(music.lofi_settings.bpm_range, [70, 90]);
        assert_eq!(compose(&snap, &music).unwrap().tempo_bpm, 75);
    }

    #[test]
    fn test_gas_wei_overrides_gwei() {
        let cli = Cli::try_parse_from(["lofi", "plan", "--block", "1", "--gas-wei", "999", "--timestamp", "1"]).unwrap();
        let Commands::Plan { snapshot, .. } = cli.cmd else { panic!("expected plan") };
        assert_eq!(snapshot.to_snapshot(1).unwrap().gas_price(), &BigUint::from(999u32));
    }

    #[test]
    fn test_analyze_rendered_track() {
        let snap = ChainSnapshot::new(33139, BigUint::from(12345u32), BigUint::from(3_000_000_000u64), 1, &["0x01"]);
        let music = MusicConfig { chain_id: 33139, duration: 2, ..MusicConfig::default() };
        let plan = compose(&snap, &music).unwrap();
        let wav = melody_synth::render(&plan).unwrap().to_wav_bytes().unwrap();

        let summary = analyze_wav(&wav).unwrap();
        assert_eq!(summary["sampleRate"], 44_100);
        assert_eq!(summary["channels"], 2);
        assert_eq!(summary["frames"], 88_200);
        assert_eq!(summary["durationSecs"], 2.0);
        assert!(summary["peak"].as_f64().unwrap() > 0.0);

        assert!(analyze_wav(b"not a wav").is_err());
    }

    #[test]
    fn test_rejects_unknown_style() {
        assert!(Cli::try_parse_from(["lofi", "plan", "--block", "1", "--style", "polka"]).is_err());
    }
}
