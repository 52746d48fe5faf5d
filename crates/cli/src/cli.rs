use clap::Parser;
use std::path::PathBuf;
use tevm_indexer_config::IndexerConfig;

#[derive(Debug, Parser)]
#[command(name = "tevm-indexer", version, about = "EVM state-history indexer for Antelope chains")]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the first block to index (inclusive).
    #[arg(long)]
    pub start_block: Option<u32>,

    /// Override the block to stop before (exclusive).
    #[arg(long)]
    pub stop_block: Option<u32>,

    /// Override the State-History websocket endpoint.
    #[arg(long)]
    pub ws_endpoint: Option<String>,

    /// Override the chain HTTP API endpoint.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Stream irreversible blocks only.
    #[arg(long)]
    pub irreversible_only: bool,

    /// Debug mode: readable fingerprints, per-action errors collected.
    #[arg(long)]
    pub debug: bool,

    /// Log filter, e.g. `info,tevm_indexer_core=debug`.
    #[arg(long, env = "TEVM_INDEXER_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    /// Loads the config file and applies flag overrides on top.
    pub fn into_config(self) -> anyhow::Result<IndexerConfig> {
        let mut config = IndexerConfig::from_file(&self.config)?;
        if let Some(start_block) = self.start_block {
            config.start_block = start_block;
        }
        if let Some(stop_block) = self.stop_block {
            config.stop_block = stop_block;
        }
        if let Some(ws_endpoint) = self.ws_endpoint {
            config.ws_endpoint = ws_endpoint;
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if self.irreversible_only {
            config.irreversible_only = true;
        }
        if self.debug {
            config.debug = true;
        }
        config.validate()?;
        Ok(config)
    }
}
