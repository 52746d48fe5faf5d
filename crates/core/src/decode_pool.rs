//! Fixed-size worker pool for CPU-bound binary decoding.
//!
//! Workers are created with the active session schema and own no other state:
//! jobs carry opaque bytes in, results carry decoded values out. The pool must
//! be torn down before a reconnect builds a new one against a fresh schema.

use crate::abi::{Codec, CodecError};
use serde_json::Value;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("decode pool terminated")]
    Terminated,
}

impl From<PoolError> for crate::error::IndexerError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Codec(codec) => crate::error::IndexerError::Schema(codec),
            PoolError::Terminated => {
                crate::error::IndexerError::Decode("decode pool terminated".to_string())
            }
        }
    }
}

#[derive(Debug)]
pub struct DecodeJob {
    pub type_name: String,
    pub bytes: Vec<u8>,
}

struct Task {
    job: DecodeJob,
    reply: oneshot::Sender<Result<Value, CodecError>>,
}

pub struct DecodePool {
    codec: Arc<Codec>,
    sender: Option<crossbeam_channel::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawns `workers` decode threads sharing one job queue. `workers == 0`
    /// falls through to inline decoding on the caller's task.
    pub fn new(codec: Arc<Codec>, workers: usize) -> Self {
        if workers == 0 {
            return Self {
                codec,
                sender: None,
                workers: Vec::new(),
            };
        }
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let handles = (0..workers)
            .map(|index| {
                let receiver = receiver.clone();
                let codec = Arc::clone(&codec);
                std::thread::Builder::new()
                    .name(format!("ship-decode-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            let result =
                                codec.decode_checked(&task.job.type_name, &task.job.bytes);
                            // Receiver may have been dropped by a torn-down
                            // session; nothing left to do with the result.
                            let _ = task.reply.send(result);
                        }
                    })
                    .expect("failed to spawn decode worker")
            })
            .collect();
        Self {
            codec,
            sender: Some(sender),
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Decodes one value. Top-level decodes always run in checked mode: the
    /// whole buffer must be consumed.
    pub async fn decode(&self, type_name: String, bytes: Vec<u8>) -> Result<Value, PoolError> {
        match &self.sender {
            None => Ok(self.codec.decode_checked(&type_name, &bytes)?),
            Some(sender) => {
                let (reply, receiver) = oneshot::channel();
                sender
                    .send(Task {
                        job: DecodeJob { type_name, bytes },
                        reply,
                    })
                    .map_err(|_| PoolError::Terminated)?;
                Ok(receiver.await.map_err(|_| PoolError::Terminated)??)
            }
        }
    }

    /// Decodes a batch, preserving input order in the results.
    pub async fn decode_batch(&self, jobs: Vec<DecodeJob>) -> Vec<Result<Value, PoolError>> {
        let pending = jobs
            .into_iter()
            .map(|job| self.decode(job.type_name, job.bytes))
            .collect::<Vec<_>>();
        futures::future::join_all(pending).await
    }

    /// Drains the job queue and joins all workers.
    pub fn shutdown(mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("decode worker panicked during shutdown");
            }
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        // Closing the channel lets workers exit; joining is left to
        // `shutdown` so drop never blocks an async context.
        self.sender.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Codec;

    const ABI: &str = r#"{
        "structs": [{
            "name": "pair", "base": "",
            "fields": [
                {"name": "key", "type": "name"},
                {"name": "value", "type": "uint32"}
            ]
        }]
    }"#;

    fn pool(workers: usize) -> DecodePool {
        DecodePool::new(Arc::new(Codec::from_json(ABI).unwrap()), workers)
    }

    fn pair_bytes(value: u32) -> Vec<u8> {
        let mut bytes = 0x5530ea0000000000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    #[tokio::test]
    async fn inline_mode_decodes_on_caller() {
        let pool = pool(0);
        assert_eq!(pool.worker_count(), 0);
        let value = pool
            .decode("pair".to_string(), pair_bytes(7))
            .await
            .unwrap();
        assert_eq!(value["value"], 7);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let pool = pool(4);
        let jobs = (0..32u32)
            .map(|i| DecodeJob {
                type_name: "pair".to_string(),
                bytes: pair_bytes(i),
            })
            .collect();
        let results = pool.decode_batch(jobs).await;
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().unwrap()["value"], i as u32);
        }
        pool.shutdown();
    }

    #[tokio::test]
    async fn decode_failures_are_reported_not_swallowed() {
        let pool = pool(2);
        let err = pool
            .decode("pair".to_string(), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Codec(CodecError::Eof { .. })));
        pool.shutdown();
    }

    #[tokio::test]
    async fn trailing_bytes_fail_top_level_decodes() {
        let pool = pool(1);
        let mut bytes = pair_bytes(1);
        bytes.push(0);
        let err = pool.decode("pair".to_string(), bytes).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Codec(CodecError::TrailingBytes { .. })
        ));
        pool.shutdown();
    }
}
