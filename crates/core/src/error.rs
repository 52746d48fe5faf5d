use crate::abi::CodecError;

/// Errors surfaced by the pipeline.
///
/// Session-recoverable errors tear the current socket session down and
/// reconnect; the rest are fatal to the process. See
/// [`IndexerError::is_session_recoverable`].
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Schema(#[from] CodecError),

    #[error("decode task failed: {0}")]
    Decode(String),

    #[error("block gap: expected {expected}, got {got}")]
    Gap { expected: u32, got: u32 },

    #[error("fork detected: block {got} at or below last accepted {last_accepted}")]
    Fork { got: u32, last_accepted: u32 },

    #[error("requested {payload} payload missing in block {block_num}")]
    MissingPayload { payload: &'static str, block_num: u32 },

    #[error("transaction deserialization failed: {0}")]
    TxDeserialization(String),

    #[error("sink: {0}")]
    Sink(#[source] anyhow::Error),

    #[error("pipeline channel closed")]
    ChannelClosed,
}

impl IndexerError {
    /// Whether the error poisons only the current session: the socket is torn
    /// down and a reconnect resumes from `last_accepted + 1`. Everything else
    /// (schema negotiation failures, per-action decoder failures outside
    /// debug mode, sink failures) takes the process down with exit code 1.
    pub fn is_session_recoverable(&self) -> bool {
        matches!(
            self,
            IndexerError::Transport(_)
                | IndexerError::Gap { .. }
                | IndexerError::Fork { .. }
                | IndexerError::Decode(_)
                | IndexerError::MissingPayload { .. }
        )
    }
}
