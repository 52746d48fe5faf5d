//! State-History websocket client.
//!
//! Session lifecycle: connect, receive the node's schema as the first frame,
//! request a block range, then stream `get_blocks_result_v*` frames. Each
//! frame schedules three parallel decodes (block body, traces, deltas) whose
//! joined result flows through the ordered queue (SYNC) or is dispatched
//! immediately (HEAD) before being handed to the assembler. ACKs follow the
//! assembler's published progress, so the node's send rate is coupled to the
//! pipeline's drain rate.

mod mining;

pub use mining::mine_signatures;

use crate::abi::{Codec, CodecError};
use crate::assembler::DecodedBlock;
use crate::decode_pool::DecodePool;
use crate::error::IndexerError;
use crate::extract;
use crate::hasher::HashMode;
use crate::monitor::PipelineMonitor;
use crate::queue::{OrderedQueue, QueueTask};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tevm_indexer_config::{IndexerConfig, PerfConfig};
use tevm_indexer_types::{BlockPosition, IndexerState};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

/// The node ships whole blocks in single frames; deep history blocks can be
/// enormous.
const MAX_MESSAGE_BYTES: usize = 512 << 20;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// `get_blocks_request_v0` payload. Mutated only between ACK boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRequest {
    pub start_block_num: u32,
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

impl BlockRequest {
    pub fn to_request_value(&self) -> Value {
        json!([
            "get_blocks_request_v0",
            serde_json::to_value(self).expect("request serializes")
        ])
    }
}

fn ack_value(num_messages: u32) -> Value {
    json!(["get_blocks_ack_request_v0", {"num_messages": num_messages}])
}

/// Block-body type requested for each result version. Anything but the three
/// known result variants is fatal.
fn block_body_type(result_tag: &str) -> Result<&'static str, CodecError> {
    match result_tag {
        "get_blocks_result_v0" => Ok("signed_block"),
        "get_blocks_result_v1" => Ok("signed_block_v1"),
        "get_blocks_result_v2" => Ok("signed_block_variant"),
        other => Err(CodecError::UnsupportedVariant {
            ty: "result".to_string(),
            tag: other.to_string(),
        }),
    }
}

/// v2 bodies arrive variant-wrapped and must resolve to `signed_block_v1`.
fn unwrap_block_body(body_type: &str, value: Value) -> Result<Value, CodecError> {
    if body_type != "signed_block_variant" {
        return Ok(value);
    }
    let mut parts = match value {
        Value::Array(parts) if parts.len() == 2 => parts,
        _ => {
            return Err(CodecError::Invalid {
                ty: "signed_block_variant".to_string(),
                offset: 0,
                reason: "expected a [tag, value] pair".to_string(),
            })
        }
    };
    let tag = parts[0].as_str().unwrap_or_default().to_string();
    if tag != "signed_block_v1" {
        return Err(CodecError::UnsupportedVariant {
            ty: "signed_block_variant".to_string(),
            tag,
        });
    }
    Ok(parts.remove(1))
}

/// Applies the missing-data policy for one requested payload.
fn take_payload(
    result: &Value,
    key: &'static str,
    allow_empty: bool,
    block_num: u32,
) -> Result<Option<Vec<u8>>, IndexerError> {
    match result.get(key) {
        Some(Value::String(hexed)) => Ok(Some(hex::decode(hexed).map_err(|err| {
            IndexerError::Decode(format!("{key} payload is not hex: {err}"))
        })?)),
        _ => {
            if allow_empty {
                tracing::warn!(block_num, payload = key, "requested payload missing, continuing");
                Ok(None)
            } else {
                tracing::error!(block_num, payload = key, "requested payload missing");
                Err(IndexerError::MissingPayload {
                    payload: key,
                    block_num,
                })
            }
        }
    }
}

struct PreparedBlock {
    block_num: u32,
    task: QueueTask<DecodedBlock>,
}

enum SessionEnd {
    RangeComplete,
    Disconnected,
    /// The assembler rejected a block (gap/fork/decode failure) and bumped
    /// the abort epoch; reconnect and resume from its last ordered block.
    Aborted,
}

pub struct ShipClient {
    ws_endpoint: String,
    start_block: u32,
    stop_block: u32,
    irreversible_only: bool,
    allow_empty_block: bool,
    allow_empty_traces: bool,
    allow_empty_deltas: bool,
    perf: PerfConfig,
    hash_mode: HashMode,
    monitor: PipelineMonitor,
    out: mpsc::Sender<DecodedBlock>,
    must_reconnect: bool,
}

impl ShipClient {
    /// `start_block` is the resume point already adjusted against the sink.
    pub fn new(
        config: &IndexerConfig,
        start_block: u32,
        monitor: PipelineMonitor,
        out: mpsc::Sender<DecodedBlock>,
    ) -> Self {
        Self {
            ws_endpoint: config.ws_endpoint.clone(),
            start_block,
            stop_block: config.stop_block,
            irreversible_only: config.irreversible_only,
            allow_empty_block: config.allow_empty_block,
            allow_empty_traces: config.allow_empty_traces,
            allow_empty_deltas: config.allow_empty_deltas,
            perf: config.perf.clone(),
            hash_mode: HashMode::from_debug_flag(config.debug),
            monitor,
            out,
            must_reconnect: true,
        }
    }

    /// First block the next session should request: one past the assembler's
    /// ordered progress, never before the configured start.
    fn next_start_block(&self) -> u32 {
        let ordered = self.monitor.last_ordered_block();
        if ordered == 0 {
            self.start_block
        } else {
            (ordered + 1).max(self.start_block)
        }
    }

    pub async fn run(mut self) -> Result<(), IndexerError> {
        loop {
            match self.session().await {
                Ok(SessionEnd::RangeComplete) => {
                    tracing::info!(stop_block = self.stop_block, "requested range fully delivered");
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected) => {
                    tracing::warn!("state-history socket closed");
                }
                Ok(SessionEnd::Aborted) => {
                    tracing::warn!("session aborted by the assembler");
                }
                Err(err) if err.is_session_recoverable() => {
                    tracing::warn!("state-history session failed: {err}");
                }
                Err(err) => return Err(err),
            }
            if !self.must_reconnect {
                return Ok(());
            }
            tracing::info!(
                delay_secs = RECONNECT_DELAY.as_secs(),
                resume_from = self.next_start_block(),
                "reconnecting to state-history"
            );
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn session(&mut self) -> Result<SessionEnd, IndexerError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(MAX_MESSAGE_BYTES))
            .max_frame_size(Some(MAX_MESSAGE_BYTES));
        tracing::info!(endpoint = %self.ws_endpoint, "connecting to state-history");
        let (socket, _) =
            connect_async_with_config(self.ws_endpoint.as_str(), Some(ws_config), true).await?;
        let (mut writer, mut reader) = socket.split();

        // The first frame is the node's schema.
        let Some(schema_frame) = reader.next().await else {
            return Ok(SessionEnd::Disconnected);
        };
        let schema_json = match schema_frame? {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(raw) => String::from_utf8(raw.to_vec())
                .map_err(|_| IndexerError::Decode("schema frame is not utf-8".to_string()))?,
            other => {
                return Err(IndexerError::Decode(format!(
                    "expected a schema frame, got {other:?}"
                )))
            }
        };
        let codec = Arc::new(Codec::from_json(&schema_json)?);
        let pool = Arc::new(DecodePool::new(
            Arc::clone(&codec),
            self.perf.worker_amount,
        ));
        tracing::info!(workers = pool.worker_count(), "schema loaded, decode pool ready");

        let request = BlockRequest {
            start_block_num: self.next_start_block(),
            end_block_num: self.stop_block,
            max_messages_in_flight: self.perf.max_msgs_in_flight,
            have_positions: Vec::new(),
            irreversible_only: self.irreversible_only,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        };
        tracing::info!(
            start = request.start_block_num,
            end = request.end_block_num,
            window = request.max_messages_in_flight,
            "requesting blocks"
        );
        writer
            .send(Message::binary(
                codec.encode("request", &request.to_request_value())?,
            ))
            .await?;

        let mut queue: OrderedQueue<DecodedBlock> = OrderedQueue::new(
            self.perf.concurrency_amount,
            self.perf.max_msgs_in_flight as usize,
        );
        let mut last_acked = request.start_block_num.saturating_sub(1);
        let session_epoch = self.monitor.abort_epoch();
        let mut abort_poll = tokio::time::interval(Duration::from_secs(1));

        let end = loop {
            let mut prepared: Option<PreparedBlock> = None;
            tokio::select! {
                frame = reader.next() => {
                    let Some(frame) = frame else { break SessionEnd::Disconnected; };
                    match frame? {
                        Message::Binary(raw) => {
                            prepared = self.handle_frame(&codec, &pool, raw.as_ref())?;
                        }
                        Message::Close(_) => break SessionEnd::Disconnected,
                        Message::Ping(_) | Message::Pong(_) => {}
                        other => tracing::warn!("unexpected frame: {other:?}"),
                    }
                }
                done = queue.next_done(), if !queue.is_empty() => {
                    let decoded = done?;
                    if self.deliver(decoded).await? {
                        break SessionEnd::RangeComplete;
                    }
                }
                _ = abort_poll.tick() => {}
            }
            if self.monitor.abort_epoch() != session_epoch {
                break SessionEnd::Aborted;
            }
            if let Some(block) = prepared {
                if self.monitor.state() == IndexerState::Head && queue.is_empty() {
                    // At head the queue is bypassed for minimum latency.
                    // Ordering still holds: frames arrive strictly ordered
                    // and nothing else is in flight.
                    let decoded = block.task.await?;
                    if self.deliver(decoded).await? {
                        break SessionEnd::RangeComplete;
                    }
                } else {
                    tracing::trace!(block_num = block.block_num, queued = queue.len(), "block scheduled");
                    queue.enqueue(block.task);
                }
            }
            let ordered = self.monitor.last_ordered_block();
            let unconfirmed = ordered.saturating_sub(last_acked);
            if unconfirmed >= self.perf.min_block_confirmation {
                writer
                    .send(Message::binary(
                        codec.encode("request", &ack_value(unconfirmed))?,
                    ))
                    .await?;
                last_acked = ordered;
            }
        };

        drop(queue);
        drop(reader);
        drop(writer);
        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown(),
            Err(_) => tracing::warn!("decode pool still referenced at session teardown"),
        }
        Ok(end)
    }

    /// Decodes one result frame and prepares the per-block decode task.
    /// Returns `None` for results without a block (caught up / pre-snapshot).
    fn handle_frame(
        &self,
        codec: &Arc<Codec>,
        pool: &Arc<DecodePool>,
        raw: &[u8],
    ) -> Result<Option<PreparedBlock>, IndexerError> {
        let value = codec.decode_checked("result", raw)?;
        let (tag, body) = match value {
            Value::Array(mut parts) if parts.len() == 2 => {
                let body = parts.remove(1);
                let tag = match parts.remove(0) {
                    Value::String(tag) => tag,
                    _ => {
                        return Err(IndexerError::Decode(
                            "result variant tag is not a string".to_string(),
                        ))
                    }
                };
                (tag, body)
            }
            _ => {
                return Err(IndexerError::Decode(
                    "result frame is not a tagged pair".to_string(),
                ))
            }
        };
        let body_type = block_body_type(&tag)?;

        let head: BlockPosition = position(&body, "head")?;
        let last_irreversible: BlockPosition = position(&body, "last_irreversible")?;
        let this_block = match body.get("this_block") {
            Some(Value::Object(_)) => position(&body, "this_block")?,
            _ => {
                tracing::info!(
                    head = head.block_num,
                    "result carries no block: caught up or node is pre-snapshot"
                );
                return Ok(None);
            }
        };
        let block_num = this_block.block_num;

        let block_bytes = take_payload(&body, "block", self.allow_empty_block, block_num)?;
        let traces_bytes = take_payload(&body, "traces", self.allow_empty_traces, block_num)?;
        let deltas_bytes = take_payload(&body, "deltas", self.allow_empty_deltas, block_num)?;

        let codec = Arc::clone(codec);
        let pool = Arc::clone(pool);
        let hash_mode = self.hash_mode;
        let task: QueueTask<DecodedBlock> = Box::pin(async move {
            let block_fut = async {
                match block_bytes {
                    Some(bytes) => {
                        let value = pool.decode(body_type.to_string(), bytes).await?;
                        Ok::<_, IndexerError>(Some(unwrap_block_body(body_type, value)?))
                    }
                    None => Ok(None),
                }
            };
            let traces_fut = async {
                match traces_bytes {
                    Some(bytes) => Ok(Some(
                        pool.decode("transaction_trace[]".to_string(), bytes).await?,
                    )),
                    None => Ok(None),
                }
            };
            let deltas_codec = Arc::clone(&codec);
            let deltas_fut = async {
                match deltas_bytes {
                    Some(bytes) => {
                        let value = pool.decode("table_delta[]".to_string(), bytes).await?;
                        Ok(Some(
                            extract::decode_whitelisted_rows(value, &deltas_codec)
                                .map_err(|err| IndexerError::Decode(err.to_string()))?,
                        ))
                    }
                    None => Ok(None),
                }
            };
            let (block, traces, deltas) = tokio::try_join!(block_fut, traces_fut, deltas_fut)?;
            let signatures = block
                .as_ref()
                .map(|block| mine_signatures(block, &codec, hash_mode))
                .unwrap_or_default();
            Ok(DecodedBlock {
                this_block,
                head,
                last_irreversible,
                block,
                traces,
                deltas,
                signatures,
            })
        });
        Ok(Some(PreparedBlock { block_num, task }))
    }

    /// Hands one decoded block to the assembler. Returns `true` when the
    /// requested range is fully delivered.
    async fn deliver(&self, decoded: DecodedBlock) -> Result<bool, IndexerError> {
        let block_num = decoded.this_block.block_num;
        self.out
            .send(decoded)
            .await
            .map_err(|_| IndexerError::ChannelClosed)?;
        Ok(self.stop_block != u32::MAX && block_num >= self.stop_block - 1)
    }
}

fn position(body: &Value, key: &str) -> Result<BlockPosition, IndexerError> {
    serde_json::from_value(body.get(key).cloned().unwrap_or(Value::Null))
        .map_err(|err| IndexerError::Decode(format!("bad `{key}` position: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tevm_indexer_config::IndexerConfig;

    const SHIP_ABI: &str = r#"{
        "structs": [
            {
                "name": "block_position", "base": "",
                "fields": [
                    {"name": "block_num", "type": "uint32"},
                    {"name": "block_id", "type": "checksum256"}
                ]
            },
            {
                "name": "get_blocks_request_v0", "base": "",
                "fields": [
                    {"name": "start_block_num", "type": "uint32"},
                    {"name": "end_block_num", "type": "uint32"},
                    {"name": "max_messages_in_flight", "type": "uint32"},
                    {"name": "have_positions", "type": "block_position[]"},
                    {"name": "irreversible_only", "type": "bool"},
                    {"name": "fetch_block", "type": "bool"},
                    {"name": "fetch_traces", "type": "bool"},
                    {"name": "fetch_deltas", "type": "bool"}
                ]
            },
            {
                "name": "get_blocks_ack_request_v0", "base": "",
                "fields": [{"name": "num_messages", "type": "uint32"}]
            },
            {
                "name": "get_blocks_result_v0", "base": "",
                "fields": [
                    {"name": "head", "type": "block_position"},
                    {"name": "last_irreversible", "type": "block_position"},
                    {"name": "this_block", "type": "block_position?"},
                    {"name": "prev_block", "type": "block_position?"},
                    {"name": "block", "type": "bytes?"},
                    {"name": "traces", "type": "bytes?"},
                    {"name": "deltas", "type": "bytes?"}
                ]
            },
            {
                "name": "signed_block", "base": "",
                "fields": [
                    {"name": "timestamp", "type": "block_timestamp_type"},
                    {"name": "producer", "type": "name"}
                ]
            }
        ],
        "variants": [
            {"name": "request", "types": ["get_blocks_request_v0", "get_blocks_ack_request_v0"]},
            {"name": "result", "types": ["get_blocks_result_v0"]}
        ]
    }"#;

    fn codec() -> Arc<Codec> {
        Arc::new(Codec::from_json(SHIP_ABI).unwrap())
    }

    fn client() -> (ShipClient, mpsc::Receiver<DecodedBlock>) {
        let config = IndexerConfig {
            endpoint: "http://127.0.0.1:8888".to_string(),
            ws_endpoint: "ws://127.0.0.1:8080".to_string(),
            chain_name: "telos-testnet".to_string(),
            chain_id: "00".repeat(32),
            start_block: 1,
            stop_block: u32::MAX,
            irreversible_only: false,
            debug: false,
            allow_empty_block: false,
            allow_empty_traces: false,
            allow_empty_deltas: false,
            perf: Default::default(),
            elastic: Default::default(),
            broadcast: Default::default(),
        };
        let (sender, receiver) = mpsc::channel(8);
        let client = ShipClient::new(&config, 1, PipelineMonitor::new(), sender);
        (client, receiver)
    }

    fn result_frame(codec: &Codec, this_block: Option<(u32, &str)>) -> Vec<u8> {
        let block_bytes = codec
            .encode(
                "signed_block",
                &serde_json::json!({
                    "timestamp": "2024-03-01T00:00:00.000",
                    "producer": "telosproducr"
                }),
            )
            .unwrap();
        let result = serde_json::json!(["get_blocks_result_v0", {
            "head": {"block_num": 1000u32, "block_id": "aa".repeat(32)},
            "last_irreversible": {"block_num": 660u32, "block_id": "bb".repeat(32)},
            "this_block": this_block.map(|(num, id)| serde_json::json!({
                "block_num": num,
                "block_id": id.repeat(32)
            })),
            "prev_block": null,
            "block": hex::encode(block_bytes),
            "traces": "00",
            "deltas": "00"
        }]);
        codec.encode("result", &result).unwrap()
    }

    #[test]
    fn body_type_per_result_version() {
        assert_eq!(block_body_type("get_blocks_result_v0").unwrap(), "signed_block");
        assert_eq!(
            block_body_type("get_blocks_result_v1").unwrap(),
            "signed_block_v1"
        );
        assert_eq!(
            block_body_type("get_blocks_result_v2").unwrap(),
            "signed_block_variant"
        );
        assert!(matches!(
            block_body_type("get_status_result_v0"),
            Err(CodecError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn v2_bodies_must_resolve_to_signed_block_v1() {
        let inner = serde_json::json!({"producer": "telosproducr"});
        let ok = unwrap_block_body(
            "signed_block_variant",
            serde_json::json!(["signed_block_v1", inner.clone()]),
        )
        .unwrap();
        assert_eq!(ok, inner);

        let err = unwrap_block_body(
            "signed_block_variant",
            serde_json::json!(["signed_block_v0", inner]),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVariant { tag, .. } if tag == "signed_block_v0"));
    }

    #[test]
    fn missing_payload_policy() {
        let body = serde_json::json!({"traces": null});
        assert!(matches!(
            take_payload(&body, "traces", false, 7),
            Err(IndexerError::MissingPayload { payload: "traces", block_num: 7 })
        ));
        assert_eq!(take_payload(&body, "traces", true, 7).unwrap(), None);
        let body = serde_json::json!({"traces": "beef"});
        assert_eq!(
            take_payload(&body, "traces", false, 7).unwrap(),
            Some(vec![0xbe, 0xef])
        );
    }

    #[test]
    fn request_and_ack_encode_against_the_schema() {
        let codec = codec();
        let request = BlockRequest {
            start_block_num: 100,
            end_block_num: u32::MAX,
            max_messages_in_flight: 1000,
            have_positions: Vec::new(),
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        };
        let bytes = codec.encode("request", &request.to_request_value()).unwrap();
        assert_eq!(bytes[0], 0);
        let ack = codec.encode("request", &ack_value(200)).unwrap();
        assert_eq!(ack[0], 1);
        assert_eq!(&ack[1..], 200u32.to_le_bytes().as_slice());
    }

    #[tokio::test]
    async fn frame_with_block_prepares_an_ordered_task() {
        let codec = codec();
        let pool = Arc::new(DecodePool::new(Arc::clone(&codec), 0));
        let (client, _receiver) = client();

        let raw = result_frame(&codec, Some((500, "cc")));
        let prepared = client.handle_frame(&codec, &pool, &raw).unwrap().unwrap();
        assert_eq!(prepared.block_num, 500);

        let decoded = prepared.task.await.unwrap();
        assert_eq!(decoded.this_block.block_num, 500);
        assert_eq!(decoded.this_block.block_id, "cc".repeat(32));
        assert_eq!(decoded.head.block_num, 1000);
        assert_eq!(decoded.last_irreversible.block_num, 660);
        assert_eq!(
            decoded.block.as_ref().unwrap()["producer"],
            "telosproducr"
        );
        assert_eq!(decoded.traces.unwrap(), serde_json::json!([]));
        assert_eq!(decoded.deltas.unwrap(), serde_json::json!([]));
        assert!(decoded.signatures.is_empty());
    }

    #[tokio::test]
    async fn frame_without_block_is_skipped() {
        let codec = codec();
        let pool = Arc::new(DecodePool::new(Arc::clone(&codec), 0));
        let (client, _receiver) = client();

        let raw = result_frame(&codec, None);
        assert!(client.handle_frame(&codec, &pool, &raw).unwrap().is_none());
    }
}
