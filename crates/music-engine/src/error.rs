use chain_data::CollectError;
use melody_core::ComposeError;
use melody_synth::RenderError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use visualizer::VisualError;

use crate::config::ConfigError;
use crate::snapshot::{SnapshotError, StorageError, TransactionError};
use crate::state::Stage;

/// Coarse classification surfaced in `EngineState::last_error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Validation,
    Network,
    Render,
    Storage,
    Transaction,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Render => "render",
            ErrorKind::Storage => "storage",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Visual(#[from] VisualError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("snapshot is {age_secs}s old, limit is {max_age_secs}s")]
    StaleSnapshot { age_secs: u64, max_age_secs: u64 },
    #[error("persistence requested but no storage backend is configured")]
    PersistUnavailable,
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("run cancelled while {0}")]
    Cancelled(Stage),
    #[error("{stage} worker failed: {message}")]
    Worker { stage: Stage, message: String },
    #[error("a run is already in progress")]
    Busy,
    #[error("nothing to resume: the last run did not fail")]
    NothingToResume,
}

impl EngineError {
    /// Classify without reinterpreting the underlying error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config(_) | EngineError::PersistUnavailable => ErrorKind::Config,
            EngineError::Collect(e) => match e {
                CollectError::Config(_) => ErrorKind::Config,
                CollectError::BlockNotFound(_) => ErrorKind::Validation,
                CollectError::Network(_) | CollectError::Rpc { .. } | CollectError::Malformed(_) => {
                    ErrorKind::Network
                }
            },
            EngineError::Compose(_) | EngineError::StaleSnapshot { .. } => ErrorKind::Validation,
            EngineError::Render(_) | EngineError::Visual(_) | EngineError::Worker { .. } => ErrorKind::Render,
            EngineError::Snapshot(e) => match e {
                SnapshotError::Storage(_) | SnapshotError::Encode(_) => ErrorKind::Storage,
                SnapshotError::Transaction(_) => ErrorKind::Transaction,
            },
            EngineError::Timeout { stage, .. } => match stage {
                Stage::Collecting => ErrorKind::Network,
                Stage::Snapshotting => ErrorKind::Storage,
                _ => ErrorKind::Render,
            },
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::Busy | EngineError::NothingToResume => ErrorKind::Validation,
        }
    }

    /// Transient failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Collect(e) => e.is_retryable(),
            EngineError::Snapshot(SnapshotError::Storage(e)) => e.is_retryable(),
            EngineError::Timeout { stage, .. } => matches!(stage, Stage::Collecting | Stage::Snapshotting),
            _ => false,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        EngineError::Snapshot(SnapshotError::Storage(e))
    }
}

impl From<TransactionError> for EngineError {
    fn from(e: TransactionError) -> Self {
        EngineError::Snapshot(SnapshotError::Transaction(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_the_stage_error() {
        assert_eq!(EngineError::from(CollectError::Config("no key".into())).kind(), ErrorKind::Config);
        assert_eq!(EngineError::from(CollectError::Network("reset".into())).kind(), ErrorKind::Network);
        assert_eq!(
            EngineError::from(ComposeError::UnsupportedStyle("polka".into())).kind(),
            ErrorKind::Validation
        );
        assert_eq!(EngineError::from(RenderError::InvalidChunkSize).kind(), ErrorKind::Render);
        assert_eq!(EngineError::from(TransactionError::Rejected("nonce".into())).kind(), ErrorKind::Transaction);
        assert_eq!(EngineError::from(StorageError::Network("503".into())).kind(), ErrorKind::Storage);
        assert_eq!(EngineError::Cancelled(Stage::Visualizing).kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_transactions_are_never_retryable() {
        assert!(!EngineError::from(TransactionError::Rejected("reverted".into())).is_retryable());
        assert!(EngineError::from(StorageError::Network("timeout".into())).is_retryable());
        assert!(EngineError::from(CollectError::Rpc { code: 429, message: "slow down".into() }).is_retryable());
        assert!(!EngineError::from(RenderError::InvalidSampleRate(8000)).is_retryable());
    }
}
