//! NFT snapshot persistence: storage uploads and the optional mint call.
//!
//! Uploads are content addressed and retried with backoff. The mint call is
//! made at most once per `persist`; its failure goes back to the caller.

use async_trait::async_trait;
use melody_core::CompositionPlan;
use melody_synth::AudioArtifact;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use visualizer::VisualArtifact;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Transport failure or timeout; worth retrying.
    #[error("storage network error: {0}")]
    Network(String),
    #[error("storage rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected storage response: {0}")]
    Malformed(String),
    #[error("storage misconfigured: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network(_) => true,
            StorageError::Rejected { status, .. } => *status == 429 || *status >= 500,
            StorageError::Malformed(_) | StorageError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StorageError::Malformed(e.to_string())
        } else {
            StorageError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    #[error("mint rejected: {0}")]
    Rejected(String),
    /// Outcome unknown; the transaction may or may not have been submitted.
    #[error("mint timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("failed to encode snapshot payload: {0}")]
    Encode(String),
}

/// `upload(bytes, content_type) -> URI`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError>;
}

/// On-chain mint call; returns the transaction hash.
#[async_trait]
pub trait Minter: Send + Sync {
    async fn mint(&self, owner: &str, metadata_uri: &str) -> Result<String, TransactionError>;
}

/// Read-only view of the connected wallet.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn current_address(&self) -> Option<String>;
}

/// A fixed address, e.g. from a CLI flag.
pub struct StaticAccount(pub String);

#[async_trait]
impl AccountProvider for StaticAccount {
    async fn current_address(&self) -> Option<String> {
        Some(self.0.clone()).filter(|a| !a.trim().is_empty())
    }
}

/* =========================
   HTTP upload gateways
   ========================= */

/// Shared shape of the pinning/bundler gateways: raw body POST with a bearer
/// token, JSON response carrying the content identifier.
struct HttpUploader {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpUploader {
    fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StorageError> {
        if url.trim().is_empty() {
            return Err(StorageError::Config("upload URL is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url: url.to_string(), token })
    }

    async fn post(&self, bytes: Vec<u8>, content_type: &str) -> Result<Value, StorageError> {
        let mut request = self.client.post(&self.url).header(reqwest::header::CONTENT_TYPE, content_type).body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }
}

/// Pull the first string found under any of `keys`, also looking inside `data`.
fn id_field(body: &Value, keys: &[&str]) -> Option<String> {
    let scopes = [Some(body), body.get("data")];
    scopes
        .into_iter()
        .flatten()
        .flat_map(|scope| keys.iter().filter_map(move |k| scope.get(*k)))
        .find_map(|v| v.as_str().map(str::to_string))
}

pub struct IpfsStorage {
    http: HttpUploader,
}

impl IpfsStorage {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StorageError> {
        Ok(Self { http: HttpUploader::new(url, token, timeout)? })
    }
}

#[async_trait]
impl StorageBackend for IpfsStorage {
    fn name(&self) -> &'static str {
        "ipfs"
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let body = self.http.post(bytes, content_type).await?;
        let cid = id_field(&body, &["cid", "IpfsHash", "Hash"])
            .ok_or_else(|| StorageError::Malformed(format!("no CID in response: {body}")))?;
        Ok(format!("ipfs://{cid}"))
    }
}

pub struct ArweaveStorage {
    http: HttpUploader,
}

impl ArweaveStorage {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StorageError> {
        Ok(Self { http: HttpUploader::new(url, token, timeout)? })
    }
}

#[async_trait]
impl StorageBackend for ArweaveStorage {
    fn name(&self) -> &'static str {
        "arweave"
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let body = self.http.post(bytes, content_type).await?;
        let id = id_field(&body, &["id", "txId"])
            .ok_or_else(|| StorageError::Malformed(format!("no transaction id in response: {body}")))?;
        Ok(format!("ar://{id}"))
    }
}

/// Writes every object to both backends; the primary's URI is returned.
pub struct MirroredStorage {
    primary: Arc<dyn StorageBackend>,
    mirror: Arc<dyn StorageBackend>,
}

impl MirroredStorage {
    pub fn new(primary: Arc<dyn StorageBackend>, mirror: Arc<dyn StorageBackend>) -> Self {
        Self { primary, mirror }
    }
}

#[async_trait]
impl StorageBackend for MirroredStorage {
    fn name(&self) -> &'static str {
        "mirrored"
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let (primary, mirror) =
            tokio::join!(self.primary.upload(bytes.clone(), content_type), self.mirror.upload(bytes, content_type));
        let mirror_uri = mirror?;
        debug!(mirror = self.mirror.name(), uri = %mirror_uri, "mirrored upload");
        primary
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub uri: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// In-process, content-addressed storage. Re-uploading identical bytes is a no-op.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<Vec<StoredObject>>,
    uploads: AtomicU32,
    fail_next: AtomicU32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` uploads fail with a retryable network error.
    pub fn failing(n: u32) -> Self {
        let storage = Self::default();
        storage.fail_next.store(n, Ordering::SeqCst);
        storage
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, uri: &str) -> Option<StoredObject> {
        self.objects().into_iter().find(|o| o.uri == uri)
    }

    /// Upload attempts, including failed ones.
    pub fn upload_attempts(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let failing = self.fail_next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if failing {
            return Err(StorageError::Network("injected failure".into()));
        }

        let uri = format!("mem://{}", blake3::hash(&bytes).to_hex());
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if !objects.iter().any(|o| o.uri == uri) {
            objects.push(StoredObject { uri: uri.clone(), content_type: content_type.to_string(), bytes });
        }
        Ok(uri)
    }
}

/* =========================
   Snapshot manager
   ========================= */

/// Caller-facing description of the piece.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub name: String,
    pub description: String,
    pub attributes: Value,
}

impl SnapshotMetadata {
    pub fn for_plan(plan: &CompositionPlan) -> Self {
        Self {
            name: format!("Block #{} ({})", plan.source_block, plan.style.as_str()),
            description: format!(
                "{} at {} BPM in {}, generated from chain {} block {}.",
                plan.style.as_str(),
                plan.tempo_bpm,
                plan.key.name(),
                plan.chain_id,
                plan.source_block
            ),
            attributes: plan.attributes(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NFTSnapshotRecord {
    #[serde(rename = "audioURI")]
    pub audio_uri: String,
    #[serde(rename = "visualURI")]
    pub visual_uri: String,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    #[serde(rename = "txHash", skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub metadata: Value,
}

pub struct SnapshotManager {
    storage: Arc<dyn StorageBackend>,
    minter: Option<Arc<dyn Minter>>,
    account: Option<Arc<dyn AccountProvider>>,
    auto_mint: bool,
    contract: Option<String>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl SnapshotManager {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            minter: None,
            account: None,
            auto_mint: false,
            contract: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_minting(
        mut self,
        minter: Option<Arc<dyn Minter>>,
        account: Option<Arc<dyn AccountProvider>>,
        auto_mint: bool,
        contract: Option<String>,
    ) -> Self {
        self.minter = minter;
        self.account = account;
        self.auto_mint = auto_mint;
        self.contract = contract;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per upload attempt, and for the mint call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn storage_name(&self) -> &'static str {
        self.storage.name()
    }

    /// Upload audio, preview and metadata; mint if enabled and possible.
    pub async fn persist(
        &self,
        audio: &AudioArtifact,
        visual: &VisualArtifact,
        metadata: SnapshotMetadata,
    ) -> Result<NFTSnapshotRecord, SnapshotError> {
        let wav = audio.to_wav_bytes().map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let audio_uri = self.upload(wav, "audio/wav").await?;
        let visual_uri = self.upload(visual.preview_png.clone(), "image/png").await?;

        let document = json!({
            "name": metadata.name,
            "description": metadata.description,
            "image": visual_uri,
            "animation_url": audio_uri,
            "attributes": metadata.attributes,
            "properties": {
                "audio_digest": audio.digest(),
                "duration_secs": audio.duration_secs(),
                "sample_rate": audio.sample_rate,
                "frames": visual.frame_count(),
                "fps": visual.fps,
                "contract": self.contract,
            },
        });
        let bytes = serde_json::to_vec(&document).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let metadata_uri = self.upload(bytes, "application/json").await?;

        let tx_hash = self.mint(&metadata_uri).await?;
        info!(
            storage = self.storage.name(),
            audio = %audio_uri,
            metadata = %metadata_uri,
            minted = tx_hash.is_some(),
            "snapshot persisted"
        );
        Ok(NFTSnapshotRecord { audio_uri, visual_uri, metadata_uri, tx_hash, metadata: document })
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let size = bytes.len();
        let uri = self
            .retry
            .run("storage upload", StorageError::is_retryable, || {
                let bytes = bytes.clone();
                async move {
                    match tokio::time::timeout(self.timeout, self.storage.upload(bytes, content_type)).await {
                        Ok(result) => result,
                        Err(_) => Err(StorageError::Network(format!("upload timed out after {:?}", self.timeout))),
                    }
                }
            })
            .await?;
        debug!(content_type, size, uri = %uri, "uploaded");
        Ok(uri)
    }

    /// Single attempt. `None` when minting is off or no wallet is available.
    async fn mint(&self, metadata_uri: &str) -> Result<Option<String>, TransactionError> {
        if !self.auto_mint {
            return Ok(None);
        }
        let (Some(minter), Some(account)) = (&self.minter, &self.account) else {
            warn!("auto-mint enabled but no minter or account provider is configured; skipping mint");
            return Ok(None);
        };
        let Some(owner) = account.current_address().await else {
            warn!("auto-mint enabled but no wallet address is available; skipping mint");
            return Ok(None);
        };

        match tokio::time::timeout(self.timeout, minter.mint(&owner, metadata_uri)).await {
            Ok(Ok(tx)) => {
                info!(owner = %owner, tx = %tx, "minted");
                Ok(Some(tx))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransactionError::Timeout(self.timeout)),
        }
    }
}
