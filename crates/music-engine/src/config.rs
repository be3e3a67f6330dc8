//! Engine configuration.
//!
//! Values come from an optional TOML file and `CHAIN_MUSIC_*` environment
//! variables (environment wins), are merged as a [`FileConfig`] layer and then
//! resolved into an [`EngineConfig`] with defaults applied.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use visualizer::VisualConfig;

pub const DEFAULT_RPC_URL: &str = "https://apechain-mainnet.g.alchemy.com/v2";
pub const DEFAULT_CHAIN_ID: u64 = 33139;
pub const DEFAULT_IPFS_URL: &str = "https://uploads.pinata.cloud/v3/files";
pub const DEFAULT_ARWEAVE_URL: &str = "https://upload.ardrive.io/v1/tx";

const ENV_PREFIX: &str = "CHAIN_MUSIC_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("failed to read config file {path}: {message}")]
    File { path: String, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Where snapshot artifacts are uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Ipfs,
    Arweave,
    Both,
}

impl FromStr for StorageProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ipfs" => Ok(Self::Ipfs),
            "arweave" => Ok(Self::Arweave),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::invalid("storage", format!("'{other}' (expected ipfs, arweave or both)"))),
        }
    }
}

/// One partial configuration layer; every field optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub rpc_url: Option<String>,
    pub rpc_api_key: Option<String>,
    pub chain_id: Option<u64>,
    pub nft_contract: Option<String>,
    pub storage: Option<String>,
    pub ipfs_url: Option<String>,
    pub ipfs_token: Option<String>,
    pub arweave_url: Option<String>,
    pub arweave_token: Option<String>,
    pub auto_mint: Option<bool>,
    pub fetch_timeout_secs: Option<u64>,
    pub render_timeout_secs: Option<u64>,
    pub storage_timeout_secs: Option<u64>,
    pub fetch_retries: Option<u32>,
    pub storage_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub snapshot_max_age_secs: Option<u64>,
    pub visual: Option<VisualFileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct VisualFileConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File { path: path.display().to_string(), message };
        let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| file_error(e.to_string()))
    }

    /// Build a layer from `CHAIN_MUSIC_*` variables looked up through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let num = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            var(name)
                .map(|v| v.trim().parse::<u64>().map_err(|e| ConfigError::invalid(name, format!("'{v}': {e}"))))
                .transpose()
        };
        let small = |name: &'static str| -> Result<Option<u32>, ConfigError> {
            num(name)?
                .map(|v| u32::try_from(v).map_err(|_| ConfigError::invalid(name, format!("{v} is too large"))))
                .transpose()
        };

        let auto_mint = var("AUTO_MINT")
            .map(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid("AUTO_MINT", format!("'{v}' is not a boolean"))),
            })
            .transpose()?;

        let visual = VisualFileConfig {
            width: small("VISUAL_WIDTH")?,
            height: small("VISUAL_HEIGHT")?,
            fps: small("VISUAL_FPS")?,
        };
        let has_visual = visual.width.is_some() || visual.height.is_some() || visual.fps.is_some();

        Ok(Self {
            rpc_url: var("RPC_URL"),
            rpc_api_key: var("RPC_API_KEY"),
            chain_id: num("CHAIN_ID")?,
            nft_contract: var("NFT_CONTRACT"),
            storage: var("STORAGE"),
            ipfs_url: var("IPFS_URL"),
            ipfs_token: var("IPFS_TOKEN"),
            arweave_url: var("ARWEAVE_URL"),
            arweave_token: var("ARWEAVE_TOKEN"),
            auto_mint,
            fetch_timeout_secs: num("FETCH_TIMEOUT_SECS")?,
            render_timeout_secs: num("RENDER_TIMEOUT_SECS")?,
            storage_timeout_secs: num("STORAGE_TIMEOUT_SECS")?,
            fetch_retries: small("FETCH_RETRIES")?,
            storage_retries: small("STORAGE_RETRIES")?,
            initial_backoff_ms: num("INITIAL_BACKOFF_MS")?,
            snapshot_max_age_secs: num("SNAPSHOT_MAX_AGE_SECS")?,
            visual: has_visual.then_some(visual),
        })
    }

    /// Fields set in `over` replace ours.
    pub fn merge(self, over: FileConfig) -> FileConfig {
        let visual = match (self.visual, over.visual) {
            (Some(base), Some(top)) => Some(VisualFileConfig {
                width: top.width.or(base.width),
                height: top.height.or(base.height),
                fps: top.fps.or(base.fps),
            }),
            (base, top) => top.or(base),
        };
        FileConfig {
            rpc_url: over.rpc_url.or(self.rpc_url),
            rpc_api_key: over.rpc_api_key.or(self.rpc_api_key),
            chain_id: over.chain_id.or(self.chain_id),
            nft_contract: over.nft_contract.or(self.nft_contract),
            storage: over.storage.or(self.storage),
            ipfs_url: over.ipfs_url.or(self.ipfs_url),
            ipfs_token: over.ipfs_token.or(self.ipfs_token),
            arweave_url: over.arweave_url.or(self.arweave_url),
            arweave_token: over.arweave_token.or(self.arweave_token),
            auto_mint: over.auto_mint.or(self.auto_mint),
            fetch_timeout_secs: over.fetch_timeout_secs.or(self.fetch_timeout_secs),
            render_timeout_secs: over.render_timeout_secs.or(self.render_timeout_secs),
            storage_timeout_secs: over.storage_timeout_secs.or(self.storage_timeout_secs),
            fetch_retries: over.fetch_retries.or(self.fetch_retries),
            storage_retries: over.storage_retries.or(self.storage_retries),
            initial_backoff_ms: over.initial_backoff_ms.or(self.initial_backoff_ms),
            snapshot_max_age_secs: over.snapshot_max_age_secs.or(self.snapshot_max_age_secs),
            visual,
        }
    }
}

/// Validated engine settings. Read-only once the engine is built.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rpc_url: String,
    /// Required when the engine talks to a real RPC endpoint.
    pub rpc_api_key: Option<String>,
    pub chain_id: u64,
    pub nft_contract: Option<String>,
    /// `None` disables persistence unless a backend is injected.
    pub storage: Option<StorageProvider>,
    pub ipfs_url: String,
    pub ipfs_token: Option<String>,
    pub arweave_url: String,
    pub arweave_token: Option<String>,
    pub auto_mint: bool,
    /// Per RPC attempt.
    pub fetch_timeout: Duration,
    /// Per CPU stage (synthesis, visuals).
    pub render_timeout: Duration,
    /// Per upload attempt, and for the mint call.
    pub storage_timeout: Duration,
    pub fetch_retries: u32,
    pub storage_retries: u32,
    pub initial_backoff: Duration,
    /// Caller-supplied snapshots older than this are rejected; `None` trusts the caller.
    pub snapshot_max_age: Option<Duration>,
    pub visual: VisualConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_api_key: None,
            chain_id: DEFAULT_CHAIN_ID,
            nft_contract: None,
            storage: None,
            ipfs_url: DEFAULT_IPFS_URL.to_string(),
            ipfs_token: None,
            arweave_url: DEFAULT_ARWEAVE_URL.to_string(),
            arweave_token: None,
            auto_mint: false,
            fetch_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(120),
            storage_timeout: Duration::from_secs(60),
            fetch_retries: 3,
            storage_retries: 3,
            initial_backoff: Duration::from_millis(500),
            snapshot_max_age: Some(Duration::from_secs(600)),
            visual: VisualConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(FileConfig::from_lookup(|k| std::env::var(k).ok())?)
    }

    /// TOML file with environment overrides.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let file = FileConfig::load(path)?;
        let env = FileConfig::from_lookup(|k| std::env::var(k).ok())?;
        Self::resolve(file.merge(env))
    }

    /// Apply defaults to a merged layer and validate the result.
    pub fn resolve(layer: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let storage = layer.storage.as_deref().map(StorageProvider::from_str).transpose()?;
        let visual_layer = layer.visual.unwrap_or_default();

        let config = Self {
            rpc_url: layer.rpc_url.unwrap_or(defaults.rpc_url),
            rpc_api_key: layer.rpc_api_key,
            chain_id: layer.chain_id.unwrap_or(defaults.chain_id),
            nft_contract: layer.nft_contract,
            storage,
            ipfs_url: layer.ipfs_url.unwrap_or(defaults.ipfs_url),
            ipfs_token: layer.ipfs_token,
            arweave_url: layer.arweave_url.unwrap_or(defaults.arweave_url),
            arweave_token: layer.arweave_token,
            auto_mint: layer.auto_mint.unwrap_or(defaults.auto_mint),
            fetch_timeout: layer.fetch_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.fetch_timeout),
            render_timeout: layer.render_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.render_timeout),
            storage_timeout: layer.storage_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.storage_timeout),
            fetch_retries: layer.fetch_retries.unwrap_or(defaults.fetch_retries),
            storage_retries: layer.storage_retries.unwrap_or(defaults.storage_retries),
            initial_backoff: layer.initial_backoff_ms.map(Duration::from_millis).unwrap_or(defaults.initial_backoff),
            // 0 disables the staleness check
            snapshot_max_age: match layer.snapshot_max_age_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.snapshot_max_age,
            },
            visual: VisualConfig {
                width: visual_layer.width.unwrap_or(defaults.visual.width),
                height: visual_layer.height.unwrap_or(defaults.visual.height),
                fps: visual_layer.fps.unwrap_or(defaults.visual.fps),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. The RPC key is checked when the collector is built,
    /// so engines running on an injected chain source do not need one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(ConfigError::invalid("rpc_url", format!("'{}' is not an http(s) URL", self.rpc_url)));
        }
        if self.chain_id == 0 {
            return Err(ConfigError::invalid("chain_id", "must be non-zero"));
        }
        for (field, value) in [
            ("fetch_timeout", self.fetch_timeout),
            ("render_timeout", self.render_timeout),
            ("storage_timeout", self.storage_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if matches!(self.storage, Some(StorageProvider::Ipfs | StorageProvider::Both)) && self.ipfs_url.trim().is_empty() {
            return Err(ConfigError::Missing("ipfs_url"));
        }
        if matches!(self.storage, Some(StorageProvider::Arweave | StorageProvider::Both))
            && self.arweave_url.trim().is_empty()
        {
            return Err(ConfigError::Missing("arweave_url"));
        }
        if self.auto_mint && self.nft_contract.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(ConfigError::Missing("nft_contract (required for auto_mint)"));
        }
        self.visual
            .validate()
            .map_err(|e| ConfigError::invalid("visual", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_resolve() {
        let cfg = EngineConfig::resolve(FileConfig::default()).unwrap();
        assert_eq!(cfg.chain_id, 33139);
        assert_eq!(cfg.storage, None);
        assert_eq!(cfg.fetch_retries, 3);
        assert_eq!(cfg.visual, VisualConfig::default());
        assert!(cfg.rpc_api_key.is_none());
    }

    #[test]
    fn test_env_layer() {
        let layer = FileConfig::from_lookup(lookup(&[
            ("CHAIN_MUSIC_RPC_API_KEY", "abc"),
            ("CHAIN_MUSIC_CHAIN_ID", "2741"),
            ("CHAIN_MUSIC_STORAGE", "Both"),
            ("CHAIN_MUSIC_AUTO_MINT", "yes"),
            ("CHAIN_MUSIC_NFT_CONTRACT", "0xfeed"),
            ("CHAIN_MUSIC_VISUAL_FPS", "8"),
            ("CHAIN_MUSIC_SNAPSHOT_MAX_AGE_SECS", "0"),
        ]))
        .unwrap();
        let cfg = EngineConfig::resolve(layer).unwrap();
        assert_eq!(cfg.rpc_api_key.as_deref(), Some("abc"));
        assert_eq!(cfg.chain_id, 2741);
        assert_eq!(cfg.storage, Some(StorageProvider::Both));
        assert!(cfg.auto_mint);
        assert_eq!(cfg.visual.fps, 8);
        assert_eq!(cfg.visual.width, 320);
        assert_eq!(cfg.snapshot_max_age, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            chain_id = 1
            rpc_api_key = "from-file"
            storage = "ipfs"

            [visual]
            width = 64
            height = 36
            "#,
        )
        .unwrap();
        let env = FileConfig::from_lookup(lookup(&[("CHAIN_MUSIC_CHAIN_ID", "33139"), ("CHAIN_MUSIC_VISUAL_WIDTH", "128")]))
            .unwrap();
        let cfg = EngineConfig::resolve(file.merge(env)).unwrap();
        assert_eq!(cfg.chain_id, 33139);
        assert_eq!(cfg.rpc_api_key.as_deref(), Some("from-file"));
        assert_eq!(cfg.storage, Some(StorageProvider::Ipfs));
        assert_eq!((cfg.visual.width, cfg.visual.height), (128, 36));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let bad_num = FileConfig::from_lookup(lookup(&[("CHAIN_MUSIC_CHAIN_ID", "ape")]));
        assert!(matches!(bad_num, Err(ConfigError::Invalid { field: "CHAIN_ID", .. })));

        let bad_storage = FileConfig { storage: Some("s3".into()), ..FileConfig::default() };
        assert!(matches!(EngineConfig::resolve(bad_storage), Err(ConfigError::Invalid { field: "storage", .. })));

        let mint_without_contract = FileConfig { auto_mint: Some(true), ..FileConfig::default() };
        assert!(matches!(EngineConfig::resolve(mint_without_contract), Err(ConfigError::Missing(_))));

        let zero_fps = FileConfig {
            visual: Some(VisualFileConfig { fps: Some(0), ..VisualFileConfig::default() }),
            ..FileConfig::default()
        };
        assert!(matches!(EngineConfig::resolve(zero_fps), Err(ConfigError::Invalid { field: "visual", .. })));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = FileConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}
