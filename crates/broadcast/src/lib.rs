//! Live head broadcast.
//!
//! A plain websocket server fanning out one message per emitted block on the
//! `broadcast` topic: `{"type": "head", "data": <head JSON>}`. Subscribers
//! that fall behind are skipped, never buffered unboundedly.

use alloy::primitives::{b256, B256, Bloom, U256};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tevm_indexer_config::BroadcastConfig;
use tevm_indexer_types::ProcessedBlock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// Keccak-256 of the empty RLP list, used for the receipts/transactions roots
/// until the EVM hash collaborator supplies real ones.
const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

const CHANNEL_CAPACITY: usize = 256;

fn quantity_hex(value: U256) -> String {
    format!("{value:#x}")
}

/// Head JSON published for one emitted block. Hex values are `0x`-prefixed
/// lowercase; `number` and `timestamp` are minimal hex.
pub fn head_json(block: &ProcessedBlock, parent_hash: B256) -> Value {
    json!({
        "parentHash": format!("0x{}", hex::encode(parent_hash)),
        "extraData": format!("0x{}", block.native_block_hash),
        "receiptsRoot": format!("0x{}", hex::encode(EMPTY_ROOT_HASH)),
        "transactionsRoot": format!("0x{}", hex::encode(EMPTY_ROOT_HASH)),
        "gasUsed": quantity_hex(block.gas_used()),
        "logsBloom": format!("0x{}", hex::encode(Bloom::ZERO)),
        "number": format!("{:#x}", block.evm_block_number),
        "timestamp": format!("{:#x}", block.block_timestamp.timestamp()),
    })
}

/// Handle the assembler uses to publish new heads.
#[derive(Debug, Clone)]
pub struct HeadPublisher {
    sender: broadcast::Sender<String>,
}

impl HeadPublisher {
    pub fn publish(&self, block: &ProcessedBlock, parent_hash: B256) {
        let message = json!({
            "type": "head",
            "data": head_json(block, parent_hash),
        });
        // No subscribers is not an error; the message is simply dropped.
        let _ = self.sender.send(message.to_string());
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct BroadcastServer {
    config: BroadcastConfig,
    sender: broadcast::Sender<String>,
}

impl BroadcastServer {
    pub fn new(config: BroadcastConfig) -> (Self, HeadPublisher) {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let publisher = HeadPublisher {
            sender: sender.clone(),
        };
        (Self { config, sender }, publisher)
    }

    /// Accepts subscribers until the task is dropped.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener =
            TcpListener::bind((self.config.ws_host.as_str(), self.config.ws_port)).await?;
        tracing::info!(
            host = %self.config.ws_host,
            port = self.config.ws_port,
            "head broadcast listening"
        );
        loop {
            let (stream, peer) = listener.accept().await?;
            let receiver = self.sender.subscribe();
            tokio::spawn(async move {
                if let Err(err) = serve_subscriber(stream, receiver).await {
                    tracing::debug!(%peer, "subscriber dropped: {err:#}");
                }
            });
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    mut receiver: broadcast::Receiver<String>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut reader) = ws.split();
    loop {
        tokio::select! {
            head = receiver.recv() => match head {
                Ok(text) => sink.send(Message::text(text)).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagging, heads skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = reader.next() => match incoming {
                // Subscription frames carry no information we act on; the
                // only topic is `broadcast`.
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use chrono::TimeZone;
    use chrono::Utc;
    use tevm_indexer_types::{ActionRecord, EvmTx, EvmTxKind};

    fn block(evm_number: u64, gas: u64) -> ProcessedBlock {
        ProcessedBlock {
            native_block_hash: "ab".repeat(32),
            native_block_number: 900,
            evm_block_number: evm_number,
            block_timestamp: Utc.timestamp_opt(0x65f1_0000, 0).unwrap(),
            evm_block_hash: None,
            transactions: if gas == 0 {
                vec![]
            } else {
                vec![ActionRecord {
                    trx_id: "cd".repeat(32),
                    action_ordinal: 1,
                    signatures: vec![],
                    tx: EvmTx {
                        kind: EvmTxKind::Raw,
                        doc: Value::Null,
                        gas_used_block: U256::from(gas),
                    },
                }]
            },
            errors: vec![],
        }
    }

    #[test]
    fn head_json_is_minimal_lowercase_hex() {
        let head = head_json(&block(42, 21_000), B256::ZERO);
        assert_eq!(head["number"], "0x2a");
        assert_eq!(head["timestamp"], "0x65f10000");
        assert_eq!(head["gasUsed"], "0x5208");
        assert_eq!(head["extraData"], format!("0x{}", "ab".repeat(32)));
        assert_eq!(head["parentHash"], format!("0x{}", "00".repeat(32)));
        assert_eq!(
            head["receiptsRoot"],
            "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
        );
        assert_eq!(head["logsBloom"].as_str().unwrap().len(), 2 + 512);
    }

    #[test]
    fn zero_values_render_as_0x0() {
        let head = head_json(&block(0, 0), B256::ZERO);
        assert_eq!(head["number"], "0x0");
        assert_eq!(head["gasUsed"], "0x0");
    }

    #[test]
    fn publisher_without_subscribers_does_not_fail() {
        let (_server, publisher) = BroadcastServer::new(BroadcastConfig::default());
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(&block(1, 0), B256::ZERO);
    }

    #[tokio::test]
    async fn fans_out_heads_to_subscribers() -> anyhow::Result<()> {
        use backon::{ExponentialBuilder, Retryable};
        use std::time::Duration;

        let config = BroadcastConfig {
            ws_host: "127.0.0.1".to_string(),
            ws_port: 19317,
        };
        let (server, publisher) = BroadcastServer::new(config);
        let _server = tokio::spawn(server.run());

        // The listener may not be bound yet when the first connect fires.
        let (mut subscriber, _) = (|| tokio_tungstenite::connect_async("ws://127.0.0.1:19317"))
            .retry(ExponentialBuilder::default())
            .await?;
        subscriber
            .send(Message::text(r#"{"topic": "broadcast"}"#))
            .await?;
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(&block(7, 21_000), B256::ZERO);
        let frame = tokio::time::timeout(Duration::from_secs(5), subscriber.next())
            .await?
            .expect("stream open")?;
        let message: Value = serde_json::from_str(frame.to_text()?)?;
        assert_eq!(message["type"], "head");
        assert_eq!(message["data"]["number"], "0x7");
        assert_eq!(message["data"]["gasUsed"], "0x5208");
        Ok(())
    }
}
