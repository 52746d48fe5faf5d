use super::{BlockSink, LastIndexed};
use async_trait::async_trait;
use tevm_indexer_types::{IndexerCheckpoint, ProcessedBlock};
use tokio::sync::RwLock;

/// In-memory sink used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    blocks: RwLock<Vec<ProcessedBlock>>,
    checkpoint: RwLock<Option<IndexerCheckpoint>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn blocks(&self) -> Vec<ProcessedBlock> {
        self.blocks.read().await.clone()
    }

    pub async fn checkpoint(&self) -> Option<IndexerCheckpoint> {
        self.checkpoint.read().await.clone()
    }

    /// Seeds the sink with a resume point, as if a previous run had written
    /// up to `block`.
    pub async fn seed(&self, block: ProcessedBlock) {
        self.blocks.write().await.push(block);
    }
}

#[async_trait]
impl BlockSink for MemorySink {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_last_indexed_block(&self) -> anyhow::Result<Option<LastIndexed>> {
        Ok(self.blocks.read().await.last().map(|block| LastIndexed {
            block_num: block.native_block_number,
            evm_block_hash: block.evm_block_hash.map(|hash| format!("{hash:#x}")),
            timestamp: Some(block.block_timestamp),
        }))
    }

    async fn index_block(&self, block: &ProcessedBlock) -> anyhow::Result<()> {
        let mut blocks = self.blocks.write().await;
        // Idempotence on block_num: a re-sent block replaces the previous
        // version instead of duplicating it.
        if let Some(existing) = blocks
            .iter_mut()
            .find(|existing| existing.native_block_number == block.native_block_number)
        {
            *existing = block.clone();
        } else {
            blocks.push(block.clone());
        }
        Ok(())
    }

    async fn index_state(&self, checkpoint: &IndexerCheckpoint) -> anyhow::Result<()> {
        *self.checkpoint.write().await = Some(checkpoint.clone());
        Ok(())
    }

    async fn get_indexer_state(&self) -> anyhow::Result<Option<IndexerCheckpoint>> {
        Ok(self.checkpoint.read().await.clone())
    }
}
