//! JSON-RPC collector (Alchemy/Infura style: the API key is the last path segment).

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::{BlockSelector, ChainSnapshot, ChainSource, CollectError};

#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Base URL, e.g. `https://abstract-mainnet.g.alchemy.com/v2`.
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Chain the endpoint serves; requests for any other chain are rejected.
    pub chain_id: u64,
    pub timeout: Duration,
}

/// Collector backed by an Ethereum-compatible JSON-RPC endpoint.
pub struct RpcCollector {
    client: reqwest::Client,
    url: String,
    chain_id: u64,
}

impl RpcCollector {
    /// Fails with [`CollectError::Config`] before any network activity when the
    /// API key or endpoint is missing.
    pub fn new(config: RpcConfig) -> Result<Self, CollectError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CollectError::Config("RPC API key is not configured".into()))?;
        if config.endpoint.trim().is_empty() {
            return Err(CollectError::Config("RPC endpoint is not configured".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CollectError::Config(format!("failed to build HTTP client: {e}")))?;

        let url = format!("{}/{}", config.endpoint.trim_end_matches('/'), api_key);
        Ok(Self { client, url, chain_id: config.chain_id })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CollectError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(CollectError::Network(format!(
                "{method} failed with status {}",
                response.status()
            )));
        }

        let envelope: RpcEnvelope = response.json().await?;
        envelope.into_result()
    }
}

#[async_trait]
impl ChainSource for RpcCollector {
    async fn fetch(&self, chain_id: u64, block: BlockSelector) -> Result<ChainSnapshot, CollectError> {
        if chain_id != self.chain_id {
            return Err(CollectError::Config(format!(
                "collector serves chain {}, not {chain_id}",
                self.chain_id
            )));
        }

        let raw_block = self
            .call("eth_getBlockByNumber", json!([block.as_rpc_param(), false]))
            .await?;
        if raw_block.is_null() {
            return Err(CollectError::BlockNotFound(block.to_string()));
        }
        let gas = self.call("eth_gasPrice", json!([])).await?;
        let gas_price = parse_quantity(&gas)?;

        let snapshot = normalize_block(chain_id, &raw_block, gas_price)?;
        info!(
            chain_id,
            block = %snapshot.block_number(),
            txs = snapshot.transaction_count(),
            "collected chain snapshot"
        );
        Ok(snapshot)
    }
}

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcEnvelope {
    fn into_result(self) -> Result<Value, CollectError> {
        if let Some(err) = self.error {
            return Err(CollectError::Rpc { code: err.code, message: err.message });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Parse an Ethereum quantity: `0x` hex string, decimal string or JSON integer.
pub fn parse_quantity(value: &Value) -> Result<BigUint, CollectError> {
    match value {
        Value::String(s) => parse_quantity_str(s),
        Value::Number(n) => n
            .as_u64()
            .map(BigUint::from)
            .ok_or_else(|| CollectError::malformed(format!("quantity {n} is not a non-negative integer"))),
        other => Err(CollectError::malformed(format!("expected quantity, got {other}"))),
    }
}

fn parse_quantity_str(s: &str) -> Result<BigUint, CollectError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(BigUint::from(0u8)),
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    };
    parsed.ok_or_else(|| CollectError::malformed(format!("invalid quantity '{s}'")))
}

fn quantity_u64(block: &Value, field: &str) -> Result<u64, CollectError> {
    let raw = block
        .get(field)
        .ok_or_else(|| CollectError::malformed(format!("block is missing '{field}'")))?;
    let value = parse_quantity(raw)?;
    u64::try_from(&value).map_err(|_| CollectError::malformed(format!("'{field}' does not fit in u64")))
}

/// Normalize an `eth_getBlockByNumber` result into a [`ChainSnapshot`].
///
/// Accepts both hash-only and full transaction lists, and tolerates a block
/// nested one level deep under `block` (indexer responses).
pub fn normalize_block(chain_id: u64, raw: &Value, gas_price: BigUint) -> Result<ChainSnapshot, CollectError> {
    let block = raw.get("block").filter(|b| b.is_object()).unwrap_or(raw);
    if !block.is_object() {
        return Err(CollectError::malformed("block result is not an object"));
    }

    let number = block
        .get("number")
        .ok_or_else(|| CollectError::malformed("block is missing 'number'"))
        .and_then(parse_quantity)?;
    let timestamp = quantity_u64(block, "timestamp")?;

    let txs = match block.get("transactions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|tx| match tx {
                Value::String(hash) => Ok(hash.to_ascii_lowercase()),
                Value::Object(obj) => obj
                    .get("hash")
                    .and_then(Value::as_str)
                    .map(str::to_ascii_lowercase)
                    .ok_or_else(|| CollectError::malformed("transaction object without hash")),
                other => Err(CollectError::malformed(format!("unexpected transaction entry {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(CollectError::malformed(format!("transactions is not a list: {other}")))
        }
    };

    debug!(chain_id, block = %number, txs = txs.len(), "normalized block");
    let snapshot = ChainSnapshot::new(chain_id, number, gas_price, timestamp, &txs);
    Ok(match block.get("hash").and_then(Value::as_str) {
        Some(hash) => snapshot.with_block_hash(hash),
        None => snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rpc_config(api_key: Option<&str>) -> RpcConfig {
        RpcConfig {
            endpoint: "https://rpc.invalid/v2".into(),
            api_key: api_key.map(str::to_string),
            chain_id: 33139,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_parse_quantity_forms() {
        assert_eq!(parse_quantity(&json!("0x3039")).unwrap(), BigUint::from(12345u32));
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), BigUint::from(0u8));
        assert_eq!(parse_quantity(&json!("12345")).unwrap(), BigUint::from(12345u32));
        assert_eq!(parse_quantity(&json!(42)).unwrap(), BigUint::from(42u8));
    }

    #[test]
    fn test_parse_quantity_beyond_u64() {
        let v = parse_quantity(&json!("0x1ffffffffffffffffffff")).unwrap();
        assert!(u64::try_from(&v).is_err());
        assert_eq!(v.bits(), 81);
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        assert!(matches!(parse_quantity(&json!("0xzz")), Err(CollectError::Malformed(_))));
        assert!(matches!(parse_quantity(&json!(-1)), Err(CollectError::Malformed(_))));
        assert!(matches!(parse_quantity(&json!(null)), Err(CollectError::Malformed(_))));
    }

    #[test]
    fn test_normalize_hash_only_block() {
        let raw = json!({
            "number": "0x3039",
            "timestamp": "0x6553f100",
            "hash": "0xabc",
            "transactions": ["0xAA", "0xbb"],
        });
        let snap = normalize_block(33139, &raw, BigUint::from(7u8)).unwrap();
        assert_eq!(snap.block_number(), &BigUint::from(12345u32));
        assert_eq!(snap.timestamp(), 0x6553f100);
        assert_eq!(snap.transaction_count(), 2);
        assert_eq!(snap.block_hash(), Some("0xabc"));
    }

    #[test]
    fn test_normalize_full_and_nested_blocks_agree() {
        let flat = json!({
            "number": "0x10",
            "timestamp": "0x20",
            "transactions": ["0xaa"],
        });
        let nested = json!({
            "block": {
                "number": 16,
                "timestamp": "32",
                "transactions": [{ "hash": "0xAA", "value": "0x0" }],
            }
        });
        let a = normalize_block(1, &flat, BigUint::from(1u8)).unwrap();
        let b = normalize_block(1, &nested, BigUint::from(1u8)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_rejects_missing_fields() {
        let raw = json!({ "timestamp": "0x1" });
        assert!(matches!(
            normalize_block(1, &raw, BigUint::from(1u8)),
            Err(CollectError::Malformed(_))
        ));
        assert!(normalize_block(1, &json!("0x1"), BigUint::from(1u8)).is_err());
    }

    #[test]
    fn test_envelope_error_becomes_rpc_error() {
        let env: RpcEnvelope =
            serde_json::from_value(json!({ "error": { "code": -32000, "message": "header not found" } }))
                .unwrap();
        match env.into_result() {
            Err(CollectError::Rpc { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "header not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        assert!(matches!(RpcCollector::new(rpc_config(None)), Err(CollectError::Config(_))));
        assert!(matches!(RpcCollector::new(rpc_config(Some("  "))), Err(CollectError::Config(_))));
    }

    #[tokio::test]
    async fn test_wrong_chain_fails_before_network() {
        let collector = RpcCollector::new(rpc_config(Some("key"))).unwrap();
        let err = collector.fetch(1, BlockSelector::Latest).await.unwrap_err();
        assert!(matches!(err, CollectError::Config(_)));
    }
}
