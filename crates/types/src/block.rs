use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `(block_num, block_id)` pair as reported by the State-History socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: String,
}

/// Which native action a reconstructed EVM transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvmTxKind {
    Raw,
    Deposit,
    Withdraw,
}

/// An EVM transaction reconstructed from a native action.
///
/// The payload is handler-specific and opaque to the pipeline; the only field
/// the pipeline itself reads is the running per-block gas counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTx {
    pub kind: EvmTxKind,
    /// Document emitted to the sink for this transaction.
    pub doc: serde_json::Value,
    /// Cumulative gas used in the block up to and including this transaction.
    #[serde(rename = "gasusedblock")]
    pub gas_used_block: U256,
}

/// An EVM-relevant action selected from a block's traces, bound to the
/// signatures of its enclosing native transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub trx_id: String,
    pub action_ordinal: u32,
    pub signatures: Vec<String>,
    pub tx: EvmTx,
}

/// The assembled output for one native block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedBlock {
    pub native_block_hash: String,
    pub native_block_number: u32,
    pub evm_block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    /// Hash of the corresponding EVM block, when the hash collaborator
    /// supplied one.
    pub evm_block_hash: Option<B256>,
    pub transactions: Vec<ActionRecord>,
    /// Per-action deserialization failures collected in debug mode.
    pub errors: Vec<String>,
}

impl ProcessedBlock {
    /// Total gas used by the block: the cumulative counter of the last
    /// transaction, zero for empty blocks.
    pub fn gas_used(&self) -> U256 {
        self.transactions
            .last()
            .map(|record| record.tx.gas_used_block)
            .unwrap_or(U256::ZERO)
    }
}

/// Pipeline phase. Transitions `Sync -> Head` once and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    #[default]
    Sync,
    Head,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerState::Sync => f.write_str("sync"),
            IndexerState::Head => f.write_str("head"),
        }
    }
}

/// Resume point read back from the sink on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastIndexed {
    pub block_num: u32,
    #[serde(rename = "@evmBlockHash")]
    pub evm_block_hash: Option<String>,
    #[serde(rename = "@timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Run state persisted to the sink on shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerCheckpoint {
    pub state: IndexerState,
    pub last_indexed_block: u32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_used_is_last_cumulative() {
        let mut block = ProcessedBlock {
            native_block_hash: "00".repeat(32),
            native_block_number: 5,
            evm_block_number: 3,
            block_timestamp: Utc::now(),
            evm_block_hash: None,
            transactions: vec![],
            errors: vec![],
        };
        assert_eq!(block.gas_used(), U256::ZERO);

        for gas in [21_000u64, 63_000, 84_500] {
            block.transactions.push(ActionRecord {
                trx_id: "ab".repeat(32),
                action_ordinal: 1,
                signatures: vec![],
                tx: EvmTx {
                    kind: EvmTxKind::Raw,
                    doc: serde_json::Value::Null,
                    gas_used_block: U256::from(gas),
                },
            });
        }
        assert_eq!(block.gas_used(), U256::from(84_500u64));
    }

    #[test]
    fn state_display() {
        assert_eq!(IndexerState::Sync.to_string(), "sync");
        assert_eq!(IndexerState::Head.to_string(), "head");
        assert_eq!(
            serde_json::to_string(&IndexerState::Head).unwrap(),
            "\"head\""
        );
    }
}
