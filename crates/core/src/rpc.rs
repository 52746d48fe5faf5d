//! Minimal client for the chain's HTTP API.
//!
//! Used only at startup: `get_info` validates the configured chain id and
//! `get_abi` fetches the contract schemas needed to decode action payloads
//! and the `eosio/eosio/global` row.

use crate::abi::{Codec, ShipAbi};
use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: u32,
    pub last_irreversible_block_num: u32,
    #[serde(default)]
    pub server_version_string: String,
}

#[derive(Debug, Deserialize)]
struct AbiResponse {
    account_name: String,
    abi: Option<ShipAbi>,
}

pub struct ChainRpc {
    client: reqwest::Client,
    endpoint: String,
}

impl ChainRpc {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/chain/{path}", self.endpoint.trim_end_matches('/'))
    }

    pub async fn get_info(&self) -> anyhow::Result<ChainInfo> {
        let response = self
            .client
            .post(self.url("get_info"))
            .send()
            .await
            .context("get_info request failed")?
            .error_for_status()
            .context("get_info returned an error status")?;
        response.json().await.context("get_info: malformed response")
    }

    pub async fn get_abi(&self, account: &str) -> anyhow::Result<Codec> {
        let response = self
            .client
            .post(self.url("get_abi"))
            .json(&serde_json::json!({"account_name": account}))
            .send()
            .await
            .with_context(|| format!("get_abi({account}) request failed"))?
            .error_for_status()
            .with_context(|| format!("get_abi({account}) returned an error status"))?;
        let parsed: AbiResponse = response
            .json()
            .await
            .with_context(|| format!("get_abi({account}): malformed response"))?;
        let abi = parsed
            .abi
            .with_context(|| format!("account `{}` has no ABI", parsed.account_name))?;
        Ok(Codec::new(abi))
    }

    /// Fails unless the node reports the expected chain id.
    pub async fn assert_chain_id(&self, expected: &str) -> anyhow::Result<ChainInfo> {
        let info = self.get_info().await?;
        if !info.chain_id.eq_ignore_ascii_case(expected) {
            anyhow::bail!(
                "chain id mismatch: node reports {}, config expects {expected}",
                info.chain_id
            );
        }
        tracing::info!(
            chain_id = %info.chain_id,
            head = info.head_block_num,
            lib = info.last_irreversible_block_num,
            version = %info.server_version_string,
            "connected to chain api"
        );
        Ok(info)
    }
}
