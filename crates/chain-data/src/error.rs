use thiserror::Error;

/// Errors produced while fetching or normalizing chain state.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Missing API credential, unknown chain, unusable endpoint.
    #[error("collector misconfigured: {0}")]
    Config(String),

    /// Transport failure, non-success HTTP status or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("block {0} not found")]
    BlockNotFound(String),

    /// The response did not have the expected shape.
    #[error("malformed rpc payload: {0}")]
    Malformed(String),
}

impl CollectError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollectError::Network(_) | CollectError::Rpc { .. })
    }
}

impl From<reqwest::Error> for CollectError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollectError::Network(format!("request timed out: {e}"))
        } else if e.is_decode() {
            CollectError::Malformed(e.to_string())
        } else {
            CollectError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(CollectError::Network("reset".into()).is_retryable());
        assert!(CollectError::Rpc { code: -32005, message: "limit".into() }.is_retryable());
        assert!(!CollectError::Config("no key".into()).is_retryable());
        assert!(!CollectError::malformed("bad").is_retryable());
        assert!(!CollectError::BlockNotFound("0x1".into()).is_retryable());
    }
}
