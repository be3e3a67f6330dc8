//! Orchestrator: drives collect → compose → synthesize → visualize →
//! [snapshot] for one run at a time and publishes progress.

use chain_data::{BlockSelector, ChainSnapshot, ChainSource, CollectError, RpcCollector, RpcConfig};
use melody_core::{compose, CompositionPlan, MusicConfig};
use melody_synth::AudioArtifact;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use visualizer::VisualArtifact;

use crate::config::{ConfigError, EngineConfig, StorageProvider};
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::snapshot::{
    AccountProvider, ArweaveStorage, IpfsStorage, Minter, MirroredStorage, NFTSnapshotRecord, SnapshotManager,
    SnapshotMetadata, StorageBackend,
};
use crate::state::{EngineState, EngineStatus, Stage, StageFailure, StateHandle};

/// What to generate.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    pub block: BlockSelector,
    /// Use this observation instead of fetching one; it is checked for staleness.
    pub snapshot: Option<ChainSnapshot>,
    /// Upload (and possibly mint) once the visuals are done.
    pub persist: bool,
    /// Per-run override of the engine's music settings.
    pub music: Option<MusicConfig>,
}

impl GenerateRequest {
    pub fn latest() -> Self {
        Self { block: BlockSelector::Latest, snapshot: None, persist: false, music: None }
    }

    pub fn at_block(number: u64) -> Self {
        Self { block: BlockSelector::Number(number), ..Self::latest() }
    }

    pub fn from_snapshot(snapshot: ChainSnapshot) -> Self {
        Self { snapshot: Some(snapshot), ..Self::latest() }
    }

    pub fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn with_music(mut self, music: MusicConfig) -> Self {
        self.music = Some(music);
        self
    }
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self::latest()
    }
}

#[derive(Clone, Debug)]
pub struct RunOutput {
    pub snapshot: ChainSnapshot,
    pub plan: CompositionPlan,
    pub audio: Arc<AudioArtifact>,
    pub visual: Arc<VisualArtifact>,
    pub record: Option<NFTSnapshotRecord>,
}

/// Artifacts of the current (or last) run; resume starts at the first empty slot.
#[derive(Default)]
struct Pipeline {
    epoch: u64,
    request: Option<GenerateRequest>,
    snapshot: Option<ChainSnapshot>,
    plan: Option<CompositionPlan>,
    audio: Option<Arc<AudioArtifact>>,
    visual: Option<Arc<VisualArtifact>>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    music: MusicConfig,
    source: Option<Arc<dyn ChainSource>>,
    storage: Option<Arc<dyn StorageBackend>>,
    minter: Option<Arc<dyn Minter>>,
    account: Option<Arc<dyn AccountProvider>>,
}

impl EngineBuilder {
    /// Replace the JSON-RPC collector; no RPC key is needed then.
    pub fn chain_source(mut self, source: Arc<dyn ChainSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the storage backend selected by `EngineConfig::storage`.
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn minter(mut self, minter: Arc<dyn Minter>) -> Self {
        self.minter = Some(minter);
        self
    }

    pub fn account(mut self, account: Arc<dyn AccountProvider>) -> Self {
        self.account = Some(account);
        self
    }

    /// Validate everything up front; no network traffic happens here.
    pub fn build(self) -> Result<MusicEngine, EngineError> {
        let config = self.config;
        config.validate()?;
        check_music(&config, &self.music)?;

        let source: Arc<dyn ChainSource> = match self.source {
            Some(source) => source,
            None => Arc::new(RpcCollector::new(RpcConfig {
                endpoint: config.rpc_url.clone(),
                api_key: config.rpc_api_key.clone(),
                chain_id: config.chain_id,
                timeout: config.fetch_timeout,
            })?),
        };

        let storage = match self.storage {
            Some(storage) => Some(storage),
            None => config.storage.map(|provider| storage_for(&config, provider)).transpose()?,
        };
        let snapshots = storage.map(|storage| {
            SnapshotManager::new(storage)
                .with_minting(self.minter, self.account, config.auto_mint, config.nft_contract.clone())
                .with_retry(RetryPolicy::new(config.storage_retries, config.initial_backoff))
                .with_timeout(config.storage_timeout)
        });

        info!(
            chain_id = config.chain_id,
            style = self.music.style.as_str(),
            duration = self.music.duration,
            storage = snapshots.as_ref().map(SnapshotManager::storage_name),
            "engine ready"
        );
        Ok(MusicEngine {
            config,
            music: self.music,
            source,
            snapshots,
            state: StateHandle::new(),
            pipeline: tokio::sync::Mutex::new(Pipeline::default()),
            active: Mutex::new(None),
        })
    }
}

fn check_music(config: &EngineConfig, music: &MusicConfig) -> Result<(), EngineError> {
    music.validate()?;
    if music.chain_id != config.chain_id {
        return Err(ConfigError::Invalid {
            field: "chain_id",
            message: format!("music config targets chain {}, engine is configured for {}", music.chain_id, config.chain_id),
        }
        .into());
    }
    Ok(())
}

fn storage_for(config: &EngineConfig, provider: StorageProvider) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    let invalid = |e: crate::snapshot::StorageError| ConfigError::Invalid { field: "storage", message: e.to_string() };
    let ipfs = || IpfsStorage::new(&config.ipfs_url, config.ipfs_token.clone(), config.storage_timeout).map_err(invalid);
    let arweave =
        || ArweaveStorage::new(&config.arweave_url, config.arweave_token.clone(), config.storage_timeout).map_err(invalid);
    Ok(match provider {
        StorageProvider::Ipfs => Arc::new(ipfs()?),
        StorageProvider::Arweave => Arc::new(arweave()?),
        StorageProvider::Both => Arc::new(MirroredStorage::new(Arc::new(ipfs()?), Arc::new(arweave()?))),
    })
}

pub struct MusicEngine {
    config: EngineConfig,
    music: MusicConfig,
    source: Arc<dyn ChainSource>,
    snapshots: Option<SnapshotManager>,
    state: StateHandle,
    pipeline: tokio::sync::Mutex<Pipeline>,
    /// Token of the run in flight, cancelled by `reset()`.
    active: Mutex<Option<CancellationToken>>,
}

impl MusicEngine {
    pub fn builder(config: EngineConfig, music: MusicConfig) -> EngineBuilder {
        EngineBuilder { config, music, source: None, storage: None, minter: None, account: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn music_config(&self) -> &MusicConfig {
        &self.music
    }

    pub fn can_persist(&self) -> bool {
        self.snapshots.is_some()
    }

    pub fn state(&self) -> EngineState {
        self.state.snapshot()
    }

    /// Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Start a fresh run. Fails with [`EngineError::Busy`] while another run is in flight.
    pub async fn run(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<RunOutput, EngineError> {
        let mut pipeline = self.pipeline.try_lock().map_err(|_| EngineError::Busy)?;
        if request.persist && self.snapshots.is_none() {
            return Err(EngineError::PersistUnavailable);
        }
        if let Some(music) = &request.music {
            check_music(&self.config, music)?;
        }
        // registered before the epoch moves, so a concurrent reset always reaches this run
        let token = self.arm(&cancel);
        let epoch = self.state.begin();
        info!(block = %request.block, supplied = request.snapshot.is_some(), persist = request.persist, "run started");
        *pipeline = Pipeline { epoch, request: Some(request), ..Pipeline::default() };
        self.drive(&mut pipeline, token).await
    }

    /// Continue a failed run from the stage that failed, reusing earlier artifacts.
    pub async fn resume(&self, cancel: CancellationToken) -> Result<RunOutput, EngineError> {
        let mut pipeline = self.pipeline.try_lock().map_err(|_| EngineError::Busy)?;
        let failed = self.state.snapshot().status == EngineStatus::Error;
        if !failed || pipeline.request.is_none() || pipeline.epoch != self.state.epoch() {
            return Err(EngineError::NothingToResume);
        }
        info!(
            have_snapshot = pipeline.snapshot.is_some(),
            have_plan = pipeline.plan.is_some(),
            have_audio = pipeline.audio.is_some(),
            have_visual = pipeline.visual.is_some(),
            "resuming run"
        );
        let token = self.arm(&cancel);
        self.drive(&mut pipeline, token).await
    }

    /// Back to `idle / 0 / "Ready"` from any state. Cancels a run in flight and
    /// drops cached artifacts.
    pub fn reset(&self) {
        if let Some(token) = self.active.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        self.state.reset();
        // a run in flight clears its own pipeline once it notices the reset
        if let Ok(mut pipeline) = self.pipeline.try_lock() {
            *pipeline = Pipeline::default();
        }
        info!("engine reset");
    }

    /// Child token of `cancel`, published as the run in flight.
    fn arm(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    async fn drive(&self, pipeline: &mut Pipeline, token: CancellationToken) -> Result<RunOutput, EngineError> {
        let result = self.stages(pipeline, &token).await;

        self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.state.epoch() != pipeline.epoch {
            *pipeline = Pipeline::default();
        }
        result
    }

    async fn stages(&self, p: &mut Pipeline, token: &CancellationToken) -> Result<RunOutput, EngineError> {
        let epoch = p.epoch;
        let request = p.request.clone().ok_or(EngineError::NothingToResume)?;
        let music = request.music.as_ref().unwrap_or(&self.music);

        let snapshot = match &p.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                let snapshot = self.stage(epoch, Stage::Collecting, token, self.collect(&request, token)).await?;
                p.snapshot = Some(snapshot.clone());
                snapshot
            }
        };

        let plan = match &p.plan {
            Some(plan) => plan.clone(),
            None => {
                let plan = self
                    .stage(epoch, Stage::Composing, token, async { compose(&snapshot, music).map_err(EngineError::from) })
                    .await?;
                debug!(
                    tempo = plan.tempo_bpm,
                    key = %plan.key.name(),
                    gas_bucket = plan.gas_bucket,
                    drums = plan.tracks.drums,
                    bass = plan.tracks.bass,
                    melody = plan.tracks.melody,
                    fx = plan.tracks.fx,
                    "plan composed"
                );
                p.plan = Some(plan.clone());
                plan
            }
        };

        let audio = match &p.audio {
            Some(audio) => audio.clone(),
            None => {
                let owned = plan.clone();
                let work = self.blocking(Stage::Synthesizing, token, move || {
                    melody_synth::render(&owned).map_err(EngineError::from)
                });
                let audio = Arc::new(self.stage(epoch, Stage::Synthesizing, token, work).await?);
                p.audio = Some(audio.clone());
                audio
            }
        };

        let visual = match &p.visual {
            Some(visual) => visual.clone(),
            None => {
                let (owned, rendered, cfg) = (plan.clone(), audio.clone(), self.config.visual);
                let work = self.blocking(Stage::Visualizing, token, move || {
                    visualizer::render(&owned, &rendered, &cfg).map_err(EngineError::from)
                });
                let visual = Arc::new(self.stage(epoch, Stage::Visualizing, token, work).await?);
                p.visual = Some(visual.clone());
                visual
            }
        };

        let record = match (&self.snapshots, request.persist) {
            (Some(manager), true) => {
                let metadata = SnapshotMetadata::for_plan(&plan);
                let persist = async { manager.persist(&audio, &visual, metadata).await.map_err(EngineError::from) };
                Some(self.stage(epoch, Stage::Snapshotting, token, persist).await?)
            }
            (None, true) => return Err(self.failed(epoch, Stage::Snapshotting, EngineError::PersistUnavailable)),
            (_, false) => None,
        };

        self.state.complete(epoch);
        info!(
            block = %snapshot.block_number(),
            tempo = plan.tempo_bpm,
            frames = audio.frames(),
            visual_frames = visual.frame_count(),
            persisted = record.is_some(),
            "run complete"
        );
        Ok(RunOutput { snapshot, plan, audio, visual, record })
    }

    /// Boundary check, state transitions and failure recording around one stage.
    async fn stage<T, F>(&self, epoch: u64, stage: Stage, token: &CancellationToken, work: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        if token.is_cancelled() {
            return Err(self.failed(epoch, stage, EngineError::Cancelled(stage)));
        }
        self.state.enter(epoch, stage);
        info!(%stage, "stage started");
        match work.await {
            Ok(value) => {
                self.state.finish(epoch, stage);
                Ok(value)
            }
            Err(e) => Err(self.failed(epoch, stage, e)),
        }
    }

    fn failed(&self, epoch: u64, stage: Stage, err: EngineError) -> EngineError {
        let kind = err.kind();
        error!(%stage, %kind, error = %err, "stage failed");
        self.state.fail(epoch, StageFailure { stage, kind, message: err.to_string() });
        err
    }

    async fn collect(&self, request: &GenerateRequest, token: &CancellationToken) -> Result<ChainSnapshot, EngineError> {
        if let Some(snapshot) = &request.snapshot {
            self.ensure_fresh(snapshot)?;
            return Ok(snapshot.clone());
        }

        let policy = RetryPolicy::new(self.config.fetch_retries, self.config.initial_backoff);
        let (source, chain_id, block, limit) = (&self.source, self.config.chain_id, request.block, self.config.fetch_timeout);
        let fetch = policy.run("chain fetch", CollectError::is_retryable, move || async move {
            match tokio::time::timeout(limit, source.fetch(chain_id, block)).await {
                Ok(result) => result,
                Err(_) => Err(CollectError::Network(format!("fetch timed out after {limit:?}"))),
            }
        });

        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled(Stage::Collecting)),
            fetched = fetch => {
                let snapshot = fetched?;
                debug!(
                    block = %snapshot.block_number(),
                    gas_wei = %snapshot.gas_price(),
                    txs = snapshot.transaction_count(),
                    "snapshot fetched"
                );
                Ok(snapshot)
            }
        }
    }

    fn ensure_fresh(&self, snapshot: &ChainSnapshot) -> Result<(), EngineError> {
        let Some(max_age) = self.config.snapshot_max_age else {
            return Ok(());
        };
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        if snapshot.is_stale(now, max_age.as_secs()) {
            return Err(EngineError::StaleSnapshot { age_secs: snapshot.age_secs(now), max_age_secs: max_age.as_secs() });
        }
        Ok(())
    }

    /// CPU-bound work off the async workers, bounded by `render_timeout`.
    async fn blocking<T, F>(&self, stage: Stage, token: &CancellationToken, work: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.config.render_timeout;
        let task = tokio::task::spawn_blocking(work);
        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled(stage)),
            joined = tokio::time::timeout(limit, task) => match joined {
                Err(_) => Err(EngineError::Timeout { stage, after: limit }),
                Ok(Err(join)) => Err(EngineError::Worker { stage, message: join.to_string() }),
                Ok(Ok(result)) => result,
            },
        }
    }
}
