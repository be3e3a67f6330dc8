mod app;

use anyhow::{Context, Result};
use melody_core::MusicConfig;
use music_engine::{EngineConfig, FrameExtractor, HttpThumbnailExtractor, MusicEngine, PreviewCache};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app::{make_app, AppState};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const PREVIEW_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::var("CHAIN_MUSIC_CONFIG") {
        Ok(path) => EngineConfig::from_toml_file(Path::new(&path)).with_context(|| format!("failed loading {path}"))?,
        Err(_) => EngineConfig::from_env().context("invalid engine configuration")?,
    };
    let music = MusicConfig { chain_id: config.chain_id, ..MusicConfig::default() };
    let engine = MusicEngine::builder(config, music).build().context("failed to build engine")?;

    let extractor: Arc<dyn FrameExtractor> = Arc::new(HttpThumbnailExtractor::new(320, 180));
    let app = make_app(AppState {
        engine: Arc::new(engine),
        previews: Arc::new(PreviewCache::new(extractor, PREVIEW_TIMEOUT)),
    });

    let addr = std::env::var("CHAIN_MUSIC_API_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
