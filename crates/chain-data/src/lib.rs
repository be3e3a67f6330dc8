//! Chain data collection: the only I/O boundary in front of the music pipeline.
//!
//! A [`ChainSource`] turns `(chain id, block selector)` into an immutable
//! [`ChainSnapshot`]. Numeric chain fields are kept as [`BigUint`] since block
//! numbers and gas prices do not fit safely in floating point.

mod error;
mod rpc;
mod snapshot;

pub use error::CollectError;
pub use num_bigint::BigUint;
pub use rpc::{normalize_block, parse_quantity, RpcCollector, RpcConfig};
pub use snapshot::{BlockSelector, ChainSnapshot};

use async_trait::async_trait;

/// Something that can observe a chain and hand back a normalized snapshot.
///
/// Implementations make a single attempt per call; retry policy belongs to the caller.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn fetch(&self, chain_id: u64, block: BlockSelector) -> Result<ChainSnapshot, CollectError>;
}

/// Serves one pre-recorded snapshot; used for offline generation and replays.
#[derive(Clone, Debug)]
pub struct FixedSource {
    snapshot: ChainSnapshot,
}

impl FixedSource {
    pub fn new(snapshot: ChainSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ChainSource for FixedSource {
    async fn fetch(&self, chain_id: u64, block: BlockSelector) -> Result<ChainSnapshot, CollectError> {
        if chain_id != self.snapshot.chain_id() {
            return Err(CollectError::Config(format!(
                "snapshot is for chain {}, requested {chain_id}",
                self.snapshot.chain_id()
            )));
        }
        match block {
            BlockSelector::Number(n) if BigUint::from(n) != *self.snapshot.block_number() => {
                Err(CollectError::BlockNotFound(n.to_string()))
            }
            _ => Ok(self.snapshot.clone()),
        }
    }
}
