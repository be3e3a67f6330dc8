//! Music Engine: the orchestrator around the chain-to-music pipeline.
//!
//! [`MusicEngine`] runs one generation at a time through
//! collect → compose → synthesize → visualize → (optional) snapshot, with
//! bounded retries for I/O stages, timeouts, cooperative cancellation and an
//! observable [`EngineState`]. [`PreviewCache`] serves thumbnails for media
//! URLs with single-flight extraction and an SVG fallback.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod retry;
pub mod snapshot;
pub mod state;

pub use cache::{placeholder_data_url, ExtractError, FrameExtractor, HttpThumbnailExtractor, PreviewCache};
pub use config::{ConfigError, EngineConfig, FileConfig, StorageProvider};
pub use engine::{EngineBuilder, GenerateRequest, MusicEngine, RunOutput};
pub use error::{EngineError, ErrorKind};
pub use export::{export, ExportError, ExportOptions, GenerateResponse, OutputArtifact};
pub use retry::RetryPolicy;
pub use snapshot::{
    AccountProvider, ArweaveStorage, IpfsStorage, MemoryStorage, Minter, MirroredStorage, NFTSnapshotRecord,
    SnapshotError, SnapshotManager, SnapshotMetadata, StaticAccount, StorageBackend, StorageError, TransactionError,
};
pub use state::{EngineState, EngineStatus, Stage, StageFailure};

pub use tokio_util::sync::CancellationToken;
pub use visualizer::VisualConfig;
