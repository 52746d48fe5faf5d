//! Per-block assembly: correlates the decoded block body, traces and deltas,
//! binds actions to their transaction signatures, resolves limbo blocks, and
//! emits ordered [`ProcessedBlock`]s to the sink.

use crate::abi::Codec;
use crate::error::IndexerError;
use crate::evm::{EvmActionHandler, TxDeserializationError};
use crate::extract::{self, ExtractedTrace};
use crate::hasher::{fingerprint, HashMode};
use crate::monitor::PipelineMonitor;
use crate::rpc::ChainRpc;
use crate::sink::BlockSink;
use alloy::primitives::{B256, U256};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tevm_indexer_broadcast::HeadPublisher;
use tevm_indexer_types::{Action, ActionRecord, BlockPosition, IndexerState, ProcessedBlock};
use tokio::sync::mpsc;

pub const SYSTEM_ACCOUNT: &str = "eosio";
pub const EVM_ACCOUNT: &str = "eosio.evm";
pub const TOKEN_ACCOUNT: &str = "eosio.token";
pub const MSIG_ACCOUNT: &str = "eosio.msig";

const EVM_ACCOUNTS: [&str; 3] = [EVM_ACCOUNT, TOKEN_ACCOUNT, MSIG_ACCOUNT];
const EVM_ACTIONS: [&str; 4] = ["raw", "withdraw", "transfer", "exec"];

/// Transfers from these system accounts are internal bookkeeping, never
/// deposits.
const DEPOSIT_FROM_BLACKLIST: [&str; 3] = ["eosio", "eosio.stake", "eosio.ram"];

/// Head distance at which the pipeline flips from SYNC to HEAD.
const HEAD_DISTANCE_BLOCKS: u32 = 100;

/// One block's worth of decoded payloads, delivered to the assembler in
/// source order by the reader.
#[derive(Debug)]
pub struct DecodedBlock {
    pub this_block: BlockPosition,
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub block: Option<Value>,
    pub traces: Option<Value>,
    pub deltas: Option<Value>,
    /// Fingerprint -> signatures mined from the block body transactions.
    pub signatures: HashMap<String, Vec<String>>,
}

/// Contract schemas used to decode action payloads and the global row.
#[derive(Default)]
pub struct ContractAbis {
    map: HashMap<String, Arc<Codec>>,
}

impl ContractAbis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: impl Into<String>, codec: Codec) {
        self.map.insert(account.into(), Arc::new(codec));
    }

    pub fn get(&self, account: &str) -> Option<&Arc<Codec>> {
        self.map.get(account)
    }

    /// Fetches the schemas the assembler needs over RPC.
    pub async fn load(rpc: &ChainRpc) -> anyhow::Result<Self> {
        let mut abis = Self::new();
        for account in [SYSTEM_ACCOUNT, EVM_ACCOUNT, TOKEN_ACCOUNT] {
            abis.insert(account, rpc.get_abi(account).await?);
        }
        Ok(abis)
    }
}

/// Records extracted from blocks whose EVM block number is not yet known.
/// At most one buffer exists; it is reset when the next global-row block
/// consumes it.
#[derive(Debug, Default)]
struct LimboBuffer {
    records: Vec<ActionRecord>,
    errors: Vec<String>,
    gas: U256,
}

impl LimboBuffer {
    fn reset(&mut self) -> (Vec<ActionRecord>, Vec<String>) {
        self.gas = U256::ZERO;
        (
            std::mem::take(&mut self.records),
            std::mem::take(&mut self.errors),
        )
    }
}

enum Dispatch {
    Raw(Value),
    Withdraw(Value),
    Deposit(Value),
}

pub struct BlockAssembler {
    receiver: mpsc::Receiver<DecodedBlock>,
    sink: Arc<dyn BlockSink>,
    handler: Arc<dyn EvmActionHandler>,
    abis: ContractAbis,
    monitor: PipelineMonitor,
    publisher: Option<HeadPublisher>,
    hash_mode: HashMode,
    debug: bool,
    last_accepted: Option<u32>,
    last_evm_block: Option<u64>,
    limbo: LimboBuffer,
    parent_evm_hash: B256,
}

impl BlockAssembler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::Receiver<DecodedBlock>,
        sink: Arc<dyn BlockSink>,
        handler: Arc<dyn EvmActionHandler>,
        abis: ContractAbis,
        monitor: PipelineMonitor,
        publisher: Option<HeadPublisher>,
        hash_mode: HashMode,
        debug: bool,
    ) -> Self {
        Self {
            receiver,
            sink,
            handler,
            abis,
            monitor,
            publisher,
            hash_mode,
            debug,
            last_accepted: None,
            last_evm_block: None,
            limbo: LimboBuffer::default(),
            parent_evm_hash: B256::ZERO,
        }
    }

    /// Seeds the gap check with the sink's resume point so the first streamed
    /// block must be `resume + 1`.
    pub fn with_resume_point(mut self, last_indexed: u32) -> Self {
        self.last_accepted = Some(last_indexed);
        self.monitor.publish_block(last_indexed);
        self
    }

    pub async fn run(mut self) -> Result<(), IndexerError> {
        while let Some(decoded) = self.receiver.recv().await {
            match self.process_block(decoded).await {
                Ok(()) => {}
                Err(err) if err.is_session_recoverable() => {
                    // Poison the session, not the pipeline: the reader
                    // observes the abort epoch, drops the socket, and
                    // resumes from `last_accepted + 1`.
                    tracing::error!("block rejected, requesting session abort: {err}");
                    self.monitor.flag_session_abort();
                }
                Err(fatal) => return Err(fatal),
            }
        }
        tracing::debug!("assembler channel closed, stopping");
        Ok(())
    }

    async fn process_block(&mut self, decoded: DecodedBlock) -> Result<(), IndexerError> {
        let block_num = decoded.this_block.block_num;
        if let Some(last_accepted) = self.last_accepted {
            if block_num > last_accepted + 1 {
                return Err(IndexerError::Gap {
                    expected: last_accepted + 1,
                    got: block_num,
                });
            }
            if block_num <= last_accepted {
                // Micro-fork inside the reversible horizon. Rollback is not
                // implemented; reject the session instead of silently
                // rewinding.
                tracing::error!(
                    block_num,
                    last_accepted,
                    "block re-observed inside the reversible horizon"
                );
                return Err(IndexerError::Fork {
                    got: block_num,
                    last_accepted,
                });
            }
        }

        let eosio_abi = self
            .abis
            .get(SYSTEM_ACCOUNT)
            .ok_or_else(|| IndexerError::Decode("missing eosio schema".to_string()))?
            .clone();
        let global = match &decoded.deltas {
            Some(deltas) => extract::extract_global_row(deltas, &eosio_abi)
                .map_err(|err| IndexerError::Decode(err.to_string()))?,
            None => None,
        };
        let traces = match &decoded.traces {
            Some(traces) => extract::extract_traces(traces)
                .map_err(|err| IndexerError::Decode(err.to_string()))?,
            None => Vec::new(),
        };

        for trace in traces {
            let dispatch = match self.classify(&trace.act) {
                Ok(Some(dispatch)) => dispatch,
                Ok(None) => continue,
                Err(err) => {
                    self.deserialization_failure(&trace, err)?;
                    continue;
                }
            };
            let signatures = self.find_signatures(&trace, &decoded.signatures);
            let gas = self.limbo.gas;
            let handled = match dispatch {
                Dispatch::Raw(data) => self.handler.handle_raw(&trace.act, &data, gas),
                Dispatch::Withdraw(data) => self.handler.handle_withdraw(&trace.act, &data, gas),
                Dispatch::Deposit(data) => self.handler.handle_deposit(&trace.act, &data, gas),
            };
            match handled {
                Ok(tx) => {
                    self.limbo.gas = tx.gas_used_block;
                    self.limbo.records.push(ActionRecord {
                        trx_id: trace.trx_id.clone(),
                        action_ordinal: trace.action_ordinal,
                        signatures,
                        tx,
                    });
                }
                Err(err) => self.deserialization_failure(&trace, err)?,
            }
        }

        self.last_accepted = Some(block_num);

        match global {
            Some(row) => {
                if self.last_evm_block.is_some_and(|last| row.block_num <= last) {
                    tracing::warn!(
                        block_num,
                        evm_block_num = row.block_num,
                        last_evm_block = self.last_evm_block,
                        "global row's EVM block number did not advance"
                    );
                }
                self.last_evm_block = Some(row.block_num);
                let (records, errors) = self.limbo.reset();
                let processed = ProcessedBlock {
                    native_block_hash: decoded.this_block.block_id.clone(),
                    native_block_number: block_num,
                    evm_block_number: row.block_num,
                    block_timestamp: block_timestamp(decoded.block.as_ref()),
                    evm_block_hash: None,
                    transactions: records,
                    errors,
                };
                self.sink
                    .index_block(&processed)
                    .await
                    .map_err(IndexerError::Sink)?;
                if let Some(publisher) = &self.publisher {
                    publisher.publish(&processed, self.parent_evm_hash);
                }
                self.parent_evm_hash = processed.evm_block_hash.unwrap_or(B256::ZERO);
                tracing::debug!(
                    block_num,
                    evm_block_num = processed.evm_block_number,
                    txs = processed.transactions.len(),
                    "block indexed"
                );
            }
            None => {
                tracing::debug!(
                    block_num,
                    pending = self.limbo.records.len(),
                    "no global row, records held in limbo"
                );
            }
        }

        self.monitor.publish_block(block_num);
        let head_distance = decoded.head.block_num.saturating_sub(block_num);
        if self.monitor.state() == IndexerState::Sync && head_distance <= HEAD_DISTANCE_BLOCKS {
            tracing::info!(
                block_num,
                head = decoded.head.block_num,
                "caught up with the chain, switching to head mode"
            );
            self.monitor.set_head();
        }
        Ok(())
    }

    fn deserialization_failure(
        &mut self,
        trace: &ExtractedTrace,
        err: TxDeserializationError,
    ) -> Result<(), IndexerError> {
        if self.debug {
            tracing::warn!(trx = %trace.trx_id, "action dropped: {err}");
            self.limbo.errors.push(format!("{}: {err}", trace.trx_id));
            Ok(())
        } else {
            Err(IndexerError::TxDeserialization(err.to_string()))
        }
    }

    /// Applies the EVM relevance filter and decodes the action payload for
    /// the actions that have a handler.
    fn classify(&self, act: &Action) -> Result<Option<Dispatch>, TxDeserializationError> {
        if !EVM_ACCOUNTS.contains(&act.account.as_str())
            || !EVM_ACTIONS.contains(&act.name.as_str())
        {
            return Ok(None);
        }
        match (act.account.as_str(), act.name.as_str()) {
            (EVM_ACCOUNT, "raw") => Ok(Some(Dispatch::Raw(self.decode_action_data(act)?))),
            (EVM_ACCOUNT, "withdraw") => {
                Ok(Some(Dispatch::Withdraw(self.decode_action_data(act)?)))
            }
            (TOKEN_ACCOUNT, "transfer") => {
                let data = self.decode_action_data(act)?;
                let to = data.get("to").and_then(Value::as_str).unwrap_or_default();
                let from = data.get("from").and_then(Value::as_str).unwrap_or_default();
                if to != EVM_ACCOUNT || DEPOSIT_FROM_BLACKLIST.contains(&from) {
                    return Ok(None);
                }
                Ok(Some(Dispatch::Deposit(data)))
            }
            (account, name) => {
                tracing::debug!(account, name, "EVM-relevant action without a handler, skipped");
                Ok(None)
            }
        }
    }

    fn decode_action_data(&self, act: &Action) -> Result<Value, TxDeserializationError> {
        let codec = self.abis.get(&act.account).ok_or_else(|| {
            TxDeserializationError(format!("no schema loaded for `{}`", act.account))
        })?;
        let payload_type = codec.action_payload_type(&act.name).ok_or_else(|| {
            TxDeserializationError(format!(
                "schema of `{}` has no action `{}`",
                act.account, act.name
            ))
        })?;
        let raw = hex::decode(&act.data)
            .map_err(|err| TxDeserializationError(format!("action data is not hex: {err}")))?;
        codec
            .decode_checked(payload_type, &raw)
            .map_err(|err| TxDeserializationError(err.to_string()))
    }

    /// Looks the trace's transaction up in the block's signature map by
    /// fingerprinting its actions in order. A miss is non-fatal and yields an
    /// empty signature list.
    fn find_signatures(
        &self,
        trace: &ExtractedTrace,
        signatures: &HashMap<String, Vec<String>>,
    ) -> Vec<String> {
        for act in trace.tx_actions.iter() {
            if let Some(found) = signatures.get(&fingerprint(act, self.hash_mode)) {
                return found.clone();
            }
        }
        tracing::debug!(trx = %trace.trx_id, "no fingerprint match, emitting empty signature list");
        Vec::new()
    }
}

fn block_timestamp(block: Option<&Value>) -> DateTime<Utc> {
    block
        .and_then(|block| block.get("timestamp"))
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|| {
            tracing::debug!("block body carries no timestamp, stamping with wall clock");
            Utc::now()
        })
}
