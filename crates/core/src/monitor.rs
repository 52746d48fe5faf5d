//! Shared pipeline snapshot.
//!
//! The assembler publishes `{state, last_ordered_block}` here; the reader
//! polls it to pick queued vs immediate dispatch and to size ACKs. This is
//! the only assembler-to-reader channel.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tevm_indexer_types::IndexerState;

#[derive(Debug, Default)]
struct Inner {
    head: AtomicBool,
    last_ordered_block: AtomicU32,
    abort_epoch: AtomicU32,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMonitor {
    inner: Arc<Inner>,
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> IndexerState {
        if self.inner.head.load(Ordering::Acquire) {
            IndexerState::Head
        } else {
            IndexerState::Sync
        }
    }

    /// Transitions to HEAD. Monotonic: there is no way back to SYNC.
    pub fn set_head(&self) {
        self.inner.head.store(true, Ordering::Release);
    }

    pub fn last_ordered_block(&self) -> u32 {
        self.inner.last_ordered_block.load(Ordering::Acquire)
    }

    pub fn publish_block(&self, block_num: u32) {
        self.inner
            .last_ordered_block
            .store(block_num, Ordering::Release);
    }

    pub fn snapshot(&self) -> (IndexerState, u32) {
        (self.state(), self.last_ordered_block())
    }

    /// Current session-abort epoch. The reader samples this at session start
    /// and tears the session down when it moves.
    pub fn abort_epoch(&self) -> u32 {
        self.inner.abort_epoch.load(Ordering::Acquire)
    }

    /// Asks the reader to abandon the current session and reconnect from
    /// `last_ordered_block + 1`. Used by the assembler for gap/fork/decode
    /// failures that poison the stream but not the pipeline.
    pub fn flag_session_abort(&self) {
        self.inner.abort_epoch.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_transition_is_monotonic() {
        let monitor = PipelineMonitor::new();
        assert_eq!(monitor.state(), IndexerState::Sync);
        monitor.set_head();
        assert_eq!(monitor.state(), IndexerState::Head);
        // Another publish cannot revert the state.
        monitor.publish_block(7);
        assert_eq!(monitor.snapshot(), (IndexerState::Head, 7));
    }

    #[test]
    fn clones_share_state() {
        let monitor = PipelineMonitor::new();
        let observer = monitor.clone();
        monitor.publish_block(42);
        assert_eq!(observer.last_ordered_block(), 42);
    }

    #[test]
    fn abort_epoch_moves_on_flag() {
        let monitor = PipelineMonitor::new();
        let seen = monitor.abort_epoch();
        monitor.flag_session_abort();
        assert_ne!(monitor.abort_epoch(), seen);
    }
}
