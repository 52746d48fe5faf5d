use super::{block_meta, BlockSink, LastIndexed};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tevm_indexer_config::ElasticConfig;
use tevm_indexer_types::{IndexerCheckpoint, ProcessedBlock};

/// Elasticsearch-backed sink.
///
/// Block documents go to rolling indices `{chain}-block-{suffix}` keyed by
/// native block number, so re-delivery after a reconnect overwrites rather
/// than duplicates. The run state lives in a single `{chain}-state` document.
pub struct ElasticSink {
    client: reqwest::Client,
    config: ElasticConfig,
    chain_name: String,
}

impl ElasticSink {
    pub fn new(config: ElasticConfig, chain_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            chain_name: chain_name.into(),
        }
    }

    fn block_index(&self, block_num: u32) -> String {
        let suffix = u64::from(block_num) / self.config.docs_per_index;
        format!(
            "{}-block-{:0width$}",
            self.chain_name,
            suffix,
            width = self.config.suffix_width
        )
    }

    fn state_index(&self) -> String {
        format!("{}-state", self.chain_name)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.config.node.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if let Some(user) = &self.config.user {
            builder = builder.basic_auth(user, self.config.pass.as_deref());
        }
        builder
    }

    async fn check(response: reqwest::Response, what: &str) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{what}: malformed response"))?;
        if !status.is_success() {
            anyhow::bail!("{what}: {status}: {body}");
        }
        if body.get("errors").and_then(Value::as_bool) == Some(true) {
            anyhow::bail!("{what}: bulk request reported item failures: {body}");
        }
        Ok(body)
    }

    fn block_doc(block: &ProcessedBlock) -> Value {
        let mut doc = block_meta(block);
        doc["block_num"] = json!(block.native_block_number);
        doc["block_hash"] = json!(block.native_block_hash);
        doc["gasUsed"] = json!(block.gas_used().to_string());
        doc["transactions"] = json!(block.transactions);
        doc["errors"] = json!(block.errors);
        doc
    }
}

#[async_trait]
impl BlockSink for ElasticSink {
    async fn init(&self) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .context("elasticsearch is unreachable")?;
        let body = Self::check(response, "cluster probe").await?;
        tracing::info!(
            cluster = body["cluster_name"].as_str().unwrap_or("unknown"),
            version = body["version"]["number"].as_str().unwrap_or("unknown"),
            "connected to elasticsearch"
        );
        Ok(())
    }

    async fn get_last_indexed_block(&self) -> anyhow::Result<Option<LastIndexed>> {
        let query = json!({
            "size": 1,
            "sort": [{"block_num": {"order": "desc"}}]
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{}-block-*/_search", self.chain_name),
            )
            .json(&query)
            .send()
            .await
            .context("last-block lookup failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(response, "last-block lookup").await?;
        let Some(source) = body["hits"]["hits"]
            .as_array()
            .and_then(|hits| hits.first())
            .map(|hit| &hit["_source"])
        else {
            return Ok(None);
        };
        Ok(Some(LastIndexed {
            block_num: source["block_num"]
                .as_u64()
                .context("last block document lacks block_num")? as u32,
            evm_block_hash: source["@evmBlockHash"].as_str().map(str::to_string),
            timestamp: source["@timestamp"]
                .as_str()
                .and_then(|raw| raw.parse().ok()),
        }))
    }

    async fn index_block(&self, block: &ProcessedBlock) -> anyhow::Result<()> {
        let index = self.block_index(block.native_block_number);
        let header = json!({"index": {"_index": index, "_id": block.native_block_number}});
        let body = format!("{header}\n{}\n", Self::block_doc(block));
        let response = self
            .request(reqwest::Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .with_context(|| format!("bulk write of block {} failed", block.native_block_number))?;
        Self::check(response, "bulk write").await?;
        Ok(())
    }

    async fn index_state(&self, checkpoint: &IndexerCheckpoint) -> anyhow::Result<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("{}/_doc/indexer", self.state_index()),
            )
            .json(checkpoint)
            .send()
            .await
            .context("state write failed")?;
        Self::check(response, "state write").await?;
        Ok(())
    }

    async fn get_indexer_state(&self) -> anyhow::Result<Option<IndexerCheckpoint>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("{}/_doc/indexer", self.state_index()),
            )
            .send()
            .await
            .context("state lookup failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(response, "state lookup").await?;
        Ok(serde_json::from_value(body["_source"].clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(docs_per_index: u64) -> ElasticSink {
        ElasticSink::new(
            ElasticConfig {
                docs_per_index,
                ..ElasticConfig::default()
            },
            "telos-testnet",
        )
    }

    #[test]
    fn rolling_index_names() {
        let sink = sink(10_000_000);
        assert_eq!(sink.block_index(0), "telos-testnet-block-00000000");
        assert_eq!(sink.block_index(9_999_999), "telos-testnet-block-00000000");
        assert_eq!(sink.block_index(10_000_000), "telos-testnet-block-00000001");
        assert_eq!(sink.state_index(), "telos-testnet-state");
    }
}
