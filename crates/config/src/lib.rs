//! Configuration for the tevm-indexer pipeline.
//!
//! Loaded from a JSON file; individual fields can be overridden by CLI flags
//! (see the `tevm-indexer` binary). Field names match the file format used in
//! deployments, hence the camelCase rename rules.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tuning knobs for the decode/order pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerfConfig {
    /// Size of the binary decode worker pool. `0` decodes inline on the
    /// reader task.
    pub worker_amount: usize,
    /// ACK window advertised to the node (`max_messages_in_flight`).
    pub max_msgs_in_flight: u32,
    /// Number of assembled blocks to accumulate before sending an ACK.
    pub min_block_confirmation: u32,
    /// Number of decode pipelines the ordered queue may run concurrently.
    pub concurrency_amount: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            worker_amount: 4,
            max_msgs_in_flight: 1000,
            min_block_confirmation: 200,
            concurrency_amount: 16,
        }
    }
}

/// Connection settings for the Elasticsearch sink. Opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElasticConfig {
    pub node: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Documents per rolling block index before the suffix advances.
    pub docs_per_index: u64,
    /// Index name suffix width, e.g. `8` yields `chain-block-00000007`.
    pub suffix_width: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            node: "http://127.0.0.1:9200".to_string(),
            user: None,
            pass: None,
            docs_per_index: 10_000_000,
            suffix_width: 8,
        }
    }
}

/// Bind address for the live head broadcast websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastConfig {
    pub ws_host: String,
    pub ws_port: u16,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            ws_host: "127.0.0.1".to_string(),
            ws_port: 7300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerConfig {
    /// Chain HTTP API endpoint, used for `get_info`/`get_abi` lookups.
    pub endpoint: String,
    /// State-History websocket endpoint.
    pub ws_endpoint: String,
    /// Short chain moniker used in sink index names, e.g. `telos-mainnet`.
    pub chain_name: String,
    /// Expected chain id (hex). Checked against `get_info` at startup.
    pub chain_id: String,
    /// First block to request (inclusive).
    pub start_block: u32,
    /// Block to stop before (exclusive). Defaults to `u32::MAX`.
    #[serde(default = "default_stop_block")]
    pub stop_block: u32,
    /// Only stream irreversible blocks.
    #[serde(default)]
    pub irreversible_only: bool,
    /// Debug mode: human-readable action fingerprints and per-action decode
    /// errors collected instead of aborting.
    #[serde(default)]
    pub debug: bool,
    /// Tolerate responses missing the block payload despite it being
    /// requested.
    #[serde(default)]
    pub allow_empty_block: bool,
    #[serde(default)]
    pub allow_empty_traces: bool,
    #[serde(default)]
    pub allow_empty_deltas: bool,
    #[serde(default)]
    pub perf: PerfConfig,
    #[serde(default)]
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

fn default_stop_block() -> u32 {
    u32::MAX
}

impl IndexerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_block >= self.stop_block {
            return Err(ConfigError::Invalid(format!(
                "startBlock {} must precede stopBlock {}",
                self.start_block, self.stop_block
            )));
        }
        if self.perf.min_block_confirmation > self.perf.max_msgs_in_flight {
            return Err(ConfigError::Invalid(format!(
                "minBlockConfirmation {} exceeds maxMsgsInFlight {}",
                self.perf.min_block_confirmation, self.perf.max_msgs_in_flight
            )));
        }
        if self.perf.concurrency_amount == 0 {
            return Err(ConfigError::Invalid(
                "concurrencyAmount must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
