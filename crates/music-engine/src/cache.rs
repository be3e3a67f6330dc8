//! Preview cache keyed by source URL.
//!
//! Each key owns a `OnceCell`: concurrent callers for the same URL await a
//! single extraction. Failed or timed-out extractions settle to a
//! deterministic SVG placeholder, so callers always get a displayable data
//! URL; a placeholder is only kept for `failure_ttl`, after which the next
//! caller extracts again. The map holds at most `capacity` URLs and evicts
//! the least recently used one.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use image::ImageFormat;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 256;
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to load {url}: {message}")]
    Load { url: String, message: String },
    #[error("unsupported media type '{0}'")]
    Unsupported(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Produces a preview image for a media URL, as a data URL.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String, ExtractError>;
}

#[async_trait]
impl<T: FrameExtractor + ?Sized> FrameExtractor for Arc<T> {
    async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        (**self).extract(url).await
    }
}

#[derive(Debug)]
struct Settled {
    data_url: String,
    /// Set when `data_url` is the placeholder.
    failed_at: Option<Instant>,
}

struct Entry {
    cell: Arc<OnceCell<Settled>>,
    last_used: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    tick: u64,
}

pub struct PreviewCache<E> {
    extractor: E,
    timeout: Duration,
    capacity: usize,
    failure_ttl: Duration,
    entries: Mutex<Entries>,
}

impl<E: FrameExtractor> PreviewCache<E> {
    pub fn new(extractor: E, timeout: Duration) -> Self {
        Self {
            extractor,
            timeout,
            capacity: DEFAULT_CAPACITY,
            failure_ttl: DEFAULT_FAILURE_TTL,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Maximum number of URLs kept; at least one.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// How long a placeholder stands in before extraction is tried again.
    pub fn with_failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }

    /// Cached preview for `url`, extracting it on first use. Never fails.
    pub async fn get(&self, url: &str) -> String {
        let cell = self.cell_for(url);
        cell.get_or_init(|| self.load(url)).await.data_url.clone()
    }

    fn cell_for(&self, url: &str) -> Arc<OnceCell<Settled>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.tick += 1;
        let tick = entries.tick;

        if let Some(entry) = entries.map.get_mut(url) {
            let expired = entry
                .cell
                .get()
                .and_then(|settled| settled.failed_at)
                .is_some_and(|at| at.elapsed() >= self.failure_ttl);
            if expired {
                debug!(url, "placeholder expired, extracting again");
                entry.cell = Arc::default();
            }
            entry.last_used = tick;
            return entry.cell.clone();
        }

        while entries.map.len() >= self.capacity {
            let oldest = entries.map.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!(url = %key, "evicting preview");
                    entries.map.remove(&key);
                }
                None => break,
            }
        }
        let cell: Arc<OnceCell<Settled>> = Arc::default();
        entries.map.insert(url.to_string(), Entry { cell: cell.clone(), last_used: tick });
        cell
    }

    async fn load(&self, url: &str) -> Settled {
        let placeholder = || Settled { data_url: placeholder_data_url(url), failed_at: Some(Instant::now()) };
        match tokio::time::timeout(self.timeout, self.extractor.extract(url)).await {
            Ok(Ok(data_url)) => {
                debug!(url, bytes = data_url.len(), "preview extracted");
                Settled { data_url, failed_at: None }
            }
            Ok(Err(e)) => {
                warn!(url, error = %e, "preview extraction failed, using placeholder");
                placeholder()
            }
            Err(_) => {
                warn!(url, timeout_ms = self.timeout.as_millis() as u64, "preview extraction timed out, using placeholder");
                placeholder()
            }
        }
    }

    /// Settled value, if any, without triggering extraction.
    pub fn peek(&self, url: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.map.get(url).and_then(|e| e.cell.get()).map(|settled| settled.data_url.clone())
    }

    pub fn invalidate(&self, url: &str) -> bool {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).map.remove(url).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).map.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic SVG placeholder for `url`; the tint is derived from the URL hash.
pub fn placeholder_data_url(url: &str) -> String {
    let hash = blake3::hash(url.as_bytes());
    let hue = u16::from_le_bytes([hash.as_bytes()[0], hash.as_bytes()[1]]) % 360;
    let hex = hash.to_hex();
    let tag = &hex[..16];
    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180">"#,
            "<desc>preview unavailable {tag}</desc>",
            r#"<rect width="320" height="180" fill="hsl({hue},35%,18%)"/>"#,
            r#"<circle cx="160" cy="90" r="34" fill="hsl({hue},45%,32%)"/>"#,
            r#"<polygon points="150,72 150,108 180,90" fill="hsl({hue},30%,85%)"/>"#,
            "</svg>"
        ),
        hue = hue,
        tag = tag
    );
    format!("data:image/svg+xml;base64,{}", B64.encode(svg))
}

/// Fetches the URL and, when it is a still image (a poster frame or
/// thumbnail), downsizes it to a PNG data URL. Anything else is
/// [`ExtractError::Unsupported`] and ends up as a placeholder.
///
/// Video URLs are not decoded: extracting a frame from a video stream is out
/// of scope for this extractor, so videos always get the placeholder unless
/// the server answers with an image (a poster) for the same URL.
pub struct HttpThumbnailExtractor {
    client: reqwest::Client,
    width: u32,
    height: u32,
}

impl HttpThumbnailExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { client: reqwest::Client::new(), width: width.max(1), height: height.max(1) }
    }

    fn thumbnail(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let img = image::load_from_memory(bytes).map_err(|e| ExtractError::Decode(e.to_string()))?;
        let thumb = img.thumbnail(self.width, self.height);
        let mut out = Cursor::new(Vec::new());
        thumb.write_to(&mut out, ImageFormat::Png).map_err(|e| ExtractError::Decode(e.to_string()))?;
        Ok(format!("data:image/png;base64,{}", B64.encode(out.into_inner())))
    }
}

#[async_trait]
impl FrameExtractor for HttpThumbnailExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let load = |message: String| ExtractError::Load { url: url.to_string(), message };
        let response = self.client.get(url).send().await.map_err(|e| load(e.to_string()))?;
        if !response.status().is_success() {
            return Err(load(format!("status {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && !content_type.starts_with("image/") {
            return Err(ExtractError::Unsupported(content_type));
        }
        let bytes = response.bytes().await.map_err(|e| load(e.to_string()))?;
        self.thumbnail(&bytes)
    }
}
