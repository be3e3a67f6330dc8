use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CollectError;

/// Which block to observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSelector {
    Latest,
    Number(u64),
}

impl BlockSelector {
    /// JSON-RPC block tag: `"latest"` or a `0x` quantity.
    pub fn as_rpc_param(&self) -> String {
        match self {
            BlockSelector::Latest => "latest".to_string(),
            BlockSelector::Number(n) => format!("0x{n:x}"),
        }
    }
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSelector::Latest => f.write_str("latest"),
            BlockSelector::Number(n) => write!(f, "#{n}"),
        }
    }
}

/// One normalized, point-in-time observation of a chain.
///
/// Fields are private: a snapshot is built once by a collector (or by
/// [`ChainSnapshot::new`]) and only read afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    chain_id: u64,
    #[serde(with = "decimal")]
    block_number: BigUint,
    /// Wei.
    #[serde(with = "decimal")]
    gas_price: BigUint,
    /// Unix seconds.
    timestamp: u64,
    transaction_count: u64,
    #[serde(with = "hex32")]
    transaction_digest: [u8; 32],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block_hash: Option<String>,
}

impl ChainSnapshot {
    /// Build a snapshot from raw fields; the transaction digest is a BLAKE3 hash
    /// over the transaction hashes in block order.
    pub fn new<T: AsRef<[u8]>>(
        chain_id: u64,
        block_number: BigUint,
        gas_price: BigUint,
        timestamp: u64,
        transactions: &[T],
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(tx.as_ref());
        }
        Self {
            chain_id,
            block_number,
            gas_price,
            timestamp,
            transaction_count: transactions.len() as u64,
            transaction_digest: *hasher.finalize().as_bytes(),
            block_hash: None,
        }
    }

    pub fn with_block_hash(mut self, hash: impl Into<String>) -> Self {
        self.block_hash = Some(hash.into());
        self
    }

    pub fn chain_id(&self) -> u64 { self.chain_id }
    pub fn block_number(&self) -> &BigUint { &self.block_number }
    pub fn gas_price(&self) -> &BigUint { &self.gas_price }
    pub fn timestamp(&self) -> u64 { self.timestamp }
    pub fn transaction_count(&self) -> u64 { self.transaction_count }
    pub fn transaction_digest(&self) -> &[u8; 32] { &self.transaction_digest }
    pub fn block_hash(&self) -> Option<&str> { self.block_hash.as_deref() }

    /// Canonical byte encoding of the chain fields (block hash excluded).
    fn canonical_bytes(&self) -> Vec<u8> {
        let number = self.block_number.to_bytes_be();
        let gas = self.gas_price.to_bytes_be();
        let mut out = Vec::with_capacity(8 + 4 + number.len() + 4 + gas.len() + 16 + 32);
        out.extend_from_slice(&self.chain_id.to_le_bytes());
        out.extend_from_slice(&(number.len() as u32).to_le_bytes());
        out.extend_from_slice(&number);
        out.extend_from_slice(&(gas.len() as u32).to_le_bytes());
        out.extend_from_slice(&gas);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.transaction_count.to_le_bytes());
        out.extend_from_slice(&self.transaction_digest);
        out
    }

    /// Generation seed: first 8 bytes (LE) of the BLAKE3 hash of the canonical encoding.
    pub fn seed(&self) -> u64 {
        let hash = blake3::hash(&self.canonical_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[0..8]);
        u64::from_le_bytes(bytes)
    }

    /// Seconds elapsed between the block timestamp and `now` (0 for blocks "from the future").
    pub fn age_secs(&self, now_unix: u64) -> u64 {
        now_unix.saturating_sub(self.timestamp)
    }

    pub fn is_stale(&self, now_unix: u64, max_age_secs: u64) -> bool {
        self.age_secs(now_unix) > max_age_secs
    }
}

/// `BigUint` as a decimal string; also accepts `0x` quantities on input.
mod decimal {
    use num_bigint::BigUint;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let v = serde_json::Value::deserialize(d)?;
        crate::rpc::parse_quantity(&v).map_err(D::Error::custom)
    }
}

mod hex32 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let s = s.trim_start_matches("0x").as_bytes();
        if s.len() != 64 || !s.iter().all(u8::is_ascii_hexdigit) {
            return Err(D::Error::custom("transaction digest must be 32 bytes of hex"));
        }
        let mut out = [0u8; 32];
        for (byte, pair) in out.iter_mut().zip(s.chunks_exact(2)) {
            *byte = (nibble(pair[0]) << 4) | nibble(pair[1]);
        }
        Ok(out)
    }

    fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => c - b'A' + 10,
        }
    }
}

impl TryFrom<serde_json::Value> for ChainSnapshot {
    type Error = CollectError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value).map_err(|e| CollectError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ChainSnapshot {
        ChainSnapshot::new(
            33139,
            BigUint::from(12345u32),
            BigUint::from(25_000_000_000u64),
            1_700_000_000,
            &["0xaa", "0xbb", "0xcc"],
        )
    }

    #[test]
    fn test_selector_rpc_param() {
        assert_eq!(BlockSelector::Latest.as_rpc_param(), "latest");
        assert_eq!(BlockSelector::Number(255).as_rpc_param(), "0xff");
    }

    #[test]
    fn test_seed_is_stable() {
        assert_eq!(sample().seed(), sample().seed());
    }

    #[test]
    fn test_seed_tracks_chain_fields() {
        let other = ChainSnapshot::new(
            33139,
            BigUint::from(12346u32),
            BigUint::from(25_000_000_000u64),
            1_700_000_000,
            &["0xaa", "0xbb", "0xcc"],
        );
        assert_ne!(sample().seed(), other.seed());
    }

    #[test]
    fn test_block_hash_does_not_change_seed() {
        let hashed = sample().with_block_hash("0xdeadbeef");
        assert_eq!(hashed.seed(), sample().seed());
        assert_eq!(hashed.block_hash(), Some("0xdeadbeef"));
    }

    #[test]
    fn test_transaction_count_and_digest() {
        let snap = sample();
        assert_eq!(snap.transaction_count(), 3);
        let empty = ChainSnapshot::new::<&str>(1, BigUint::from(1u8), BigUint::from(1u8), 0, &[]);
        assert_eq!(empty.transaction_count(), 0);
        assert_ne!(snap.transaction_digest(), empty.transaction_digest());
    }

    #[test]
    fn test_staleness_window() {
        let snap = sample();
        assert_eq!(snap.age_secs(1_700_000_030), 30);
        assert!(!snap.is_stale(1_700_000_030, 60));
        assert!(snap.is_stale(1_700_000_090, 60));
        assert_eq!(snap.age_secs(1_600_000_000), 0);
    }

    #[test]
    fn test_json_shape_keeps_big_numbers_exact() {
        let big = BigUint::parse_bytes(b"123456789012345678901234567890", 10).unwrap();
        let snap = ChainSnapshot::new(1, big.clone(), big.clone(), 5, &["0x01"]);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["blockNumber"], "123456789012345678901234567890");
        let back: ChainSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_deserialize_accepts_hex_quantities() {
        let digest = "00".repeat(32);
        let json = serde_json::json!({
            "chainId": 1,
            "blockNumber": "0x3039",
            "gasPrice": 1000,
            "timestamp": 10,
            "transactionCount": 0,
            "transactionDigest": digest,
        });
        let snap = ChainSnapshot::try_from(json).unwrap();
        assert_eq!(snap.block_number(), &BigUint::from(12345u32));
        assert_eq!(snap.gas_price(), &BigUint::from(1000u32));
    }

    #[test]
    fn test_deserialize_rejects_non_hex_digest() {
        let payload = |digest: String| {
            serde_json::json!({
                "chainId": 1,
                "blockNumber": 1,
                "gasPrice": 1,
                "timestamp": 0,
                "transactionCount": 0,
                "transactionDigest": digest,
            })
        };
        // 64 bytes, but the first character is three of them
        let multibyte = format!("€{}", "a".repeat(61));
        assert_eq!(multibyte.len(), 64);
        for digest in [multibyte, "zz".repeat(32), "ab".repeat(31)] {
            let err = ChainSnapshot::try_from(payload(digest)).unwrap_err();
            assert!(matches!(err, CollectError::Malformed(_)), "unexpected error: {err:?}");
        }

        let upper = ChainSnapshot::try_from(payload(format!("0x{}", "AB".repeat(32)))).unwrap();
        assert_eq!(upper.transaction_digest(), &[0xab; 32]);
    }
}
