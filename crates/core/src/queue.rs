//! Bounded FIFO of fallible decode pipelines with in-order completion.
//!
//! Up to `concurrency` tasks run at once, but results surface strictly in
//! enqueue order. One failure clears everything in flight and pauses the
//! queue until `start_processing` is called again.

use crate::error::IndexerError;
use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};
use std::collections::VecDeque;
use std::future::poll_fn;
use std::task::{Context, Poll};

pub type QueueTask<T> = BoxFuture<'static, Result<T, IndexerError>>;

pub struct OrderedQueue<T> {
    backlog: VecDeque<QueueTask<T>>,
    running: FuturesOrdered<QueueTask<T>>,
    concurrency: usize,
    capacity: usize,
    paused: bool,
}

impl<T> OrderedQueue<T> {
    pub fn new(concurrency: usize, capacity: usize) -> Self {
        Self {
            backlog: VecDeque::new(),
            running: FuturesOrdered::new(),
            concurrency: concurrency.max(1),
            capacity,
            paused: false,
        }
    }

    pub fn enqueue(&mut self, task: QueueTask<T>) {
        if self.is_full() {
            // The ACK window upstream should make this unreachable.
            tracing::warn!(len = self.len(), capacity = self.capacity, "ordered queue over capacity");
        }
        self.backlog.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.backlog.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn start_processing(&mut self) {
        self.paused = false;
    }

    pub fn clear(&mut self) {
        self.backlog.clear();
        self.running = FuturesOrdered::new();
    }

    /// Polls for the next completed task in enqueue order. Pending while the
    /// queue is paused or has nothing in flight; the caller's loop re-polls
    /// after every enqueue.
    pub fn poll_next_done(&mut self, cx: &mut Context<'_>) -> Poll<Result<T, IndexerError>> {
        if self.paused {
            return Poll::Pending;
        }
        while self.running.len() < self.concurrency {
            match self.backlog.pop_front() {
                Some(task) => self.running.push_back(task),
                None => break,
            }
        }
        match self.running.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Some(Err(err))) => {
                self.clear();
                self.paused = true;
                Poll::Ready(Err(err))
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    pub async fn next_done(&mut self) -> Result<T, IndexerError> {
        poll_fn(|cx| self.poll_next_done(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn delayed(value: u32, delay_ms: u64) -> QueueTask<u32> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(value)
        })
    }

    fn failing(delay_ms: u64) -> QueueTask<u32> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Err(IndexerError::Decode("boom".to_string()))
        })
    }

    #[tokio::test]
    async fn completion_order_matches_enqueue_order() {
        let mut queue = OrderedQueue::new(4, 64);
        // Later tasks finish first; outputs must still arrive 0, 1, 2, 3.
        for (i, delay) in [40u64, 30, 20, 10].into_iter().enumerate() {
            queue.enqueue(delayed(i as u32, delay));
        }
        for expected in 0..4u32 {
            assert_eq!(queue.next_done().await.unwrap(), expected);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut queue = OrderedQueue::new(2, 64);
        for i in 0..6u32 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            queue.enqueue(Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            }));
        }
        for expected in 0..6u32 {
            assert_eq!(queue.next_done().await.unwrap(), expected);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failure_clears_and_pauses() {
        let mut queue = OrderedQueue::new(4, 64);
        queue.enqueue(delayed(0, 5));
        queue.enqueue(failing(5));
        queue.enqueue(delayed(2, 5));

        assert_eq!(queue.next_done().await.unwrap(), 0);
        assert!(queue.next_done().await.is_err());
        assert!(queue.is_paused());
        assert!(queue.is_empty());

        // Paused queue delivers nothing even with new work enqueued.
        queue.enqueue(delayed(9, 1));
        let pending =
            tokio::time::timeout(Duration::from_millis(20), queue.next_done()).await;
        assert!(pending.is_err());

        queue.start_processing();
        assert_eq!(queue.next_done().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn capacity_is_advisory() {
        let mut queue = OrderedQueue::new(1, 2);
        for i in 0..3u32 {
            queue.enqueue(delayed(i, 1));
        }
        assert!(queue.is_full());
        for expected in 0..3u32 {
            assert_eq!(queue.next_done().await.unwrap(), expected);
        }
    }
}
