//! Downstream document-store contract.
//!
//! The sink is idempotent on `block_num`; the pipeline guarantees monotonic
//! `last + 1` emission but only at-least-once delivery (a reconnect may
//! re-send the last unconfirmed blocks).

mod elastic;
mod memory;

pub use elastic::ElasticSink;
pub use memory::MemorySink;

use async_trait::async_trait;
use serde_json::{json, Value};
use tevm_indexer_types::{IndexerCheckpoint, LastIndexed, ProcessedBlock};

#[async_trait]
pub trait BlockSink: Send + Sync {
    /// One-time setup (index templates, connectivity probe).
    async fn init(&self) -> anyhow::Result<()>;

    /// Most recent block present downstream, used as the resume point.
    async fn get_last_indexed_block(&self) -> anyhow::Result<Option<LastIndexed>>;

    async fn index_block(&self, block: &ProcessedBlock) -> anyhow::Result<()>;

    async fn index_state(&self, checkpoint: &IndexerCheckpoint) -> anyhow::Result<()>;

    async fn get_indexer_state(&self) -> anyhow::Result<Option<IndexerCheckpoint>>;
}

/// Metadata attached to every block document.
pub fn block_meta(block: &ProcessedBlock) -> Value {
    json!({
        "@timestamp": block.block_timestamp,
        "@global": {"block_num": block.evm_block_number},
        "@evmBlockHash": block.evm_block_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn meta_shape() {
        let block = ProcessedBlock {
            native_block_hash: "cd".repeat(32),
            native_block_number: 10,
            evm_block_number: 4,
            block_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            evm_block_hash: None,
            transactions: vec![],
            errors: vec![],
        };
        let meta = block_meta(&block);
        assert_eq!(meta["@global"]["block_num"], 4);
        assert!(meta["@evmBlockHash"].is_null());
        assert!(meta["@timestamp"].is_string());
    }
}
