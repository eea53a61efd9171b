//! A bounded, single-producer/single-consumer drop-oldest frame queue
//! (§4.3), generalized from the source stack's `queue.Queue(maxsize=2)` plus
//! its `put_nowait`/evict-then-retry fallback into an explicit queue type
//! the producer and `CameraRegistry` can both reason about.

use frame_pool::FrameBuffer;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Outcome of a [`FrameQueue::push`]: whether the push evicted an
/// already-queued frame to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    DroppedOldest,
}

struct Inner {
    items: Mutex<VecDeque<FrameBuffer>>,
    capacity: usize,
    notify: Notify,
}

/// Cheap to `Clone` (an `Arc` wrapper); the producer holds one clone per
/// pipeline it fans out to, the consumer holds the other.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<Inner>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame queue capacity must be > 0");
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a frame, evicting the oldest queued frame first if full. Returns
    /// the queue depth immediately before this push alongside the outcome,
    /// matching the before/after depth pair the metrics registry wants.
    pub fn push(&self, frame: FrameBuffer) -> (PushOutcome, usize) {
        let mut items = self.inner.items.lock();
        let depth_before = items.len();
        let outcome = if items.len() >= self.inner.capacity {
            items.pop_front();
            items.push_back(frame);
            PushOutcome::DroppedOldest
        } else {
            items.push_back(frame);
            PushOutcome::Enqueued
        };
        drop(items);
        self.inner.notify.notify_one();
        (outcome, depth_before)
    }

    /// Pop the oldest frame immediately if one is queued, without waiting.
    /// Used by the producer's pool-exhaustion drain path (§4.4 step 4).
    pub fn pop_front_nonblocking(&self) -> Option<FrameBuffer> {
        self.inner.items.lock().pop_front()
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<FrameBuffer> {
        if let Some(frame) = self.inner.items.lock().pop_front() {
            return Some(frame);
        }
        let wait = self.inner.notify.notified();
        tokio::select! {
            _ = wait => self.inner.items.lock().pop_front(),
            _ = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_pool::{BufferPool, FrameShape, PoolOutcome};

    fn buffer(pool: &BufferPool) -> FrameBuffer {
        match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!("pool exhausted in test"),
        }
    }

    fn pool() -> BufferPool {
        let pool = BufferPool::new(4, 8, 6, Duration::from_secs(1));
        pool.initialize(FrameShape::new(2, 2, 1));
        pool
    }

    #[test]
    fn push_under_capacity_enqueues() {
        let pool = pool();
        let queue = FrameQueue::new(2);
        let (outcome, depth_before) = queue.push(buffer(&pool));
        assert_eq!(outcome, PushOutcome::Enqueued);
        assert_eq!(depth_before, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn push_at_capacity_drops_oldest() {
        let pool = pool();
        let queue = FrameQueue::new(2);
        queue.push(buffer(&pool));
        queue.push(buffer(&pool));
        let (outcome, depth_before) = queue.push(buffer(&pool));
        assert_eq!(outcome, PushOutcome::DroppedOldest);
        assert_eq!(depth_before, 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_when_empty() {
        let queue = FrameQueue::new(2);
        let popped = queue.pop_timeout(Duration::from_millis(20)).await;
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_timeout_returns_pushed_frame() {
        let pool = pool();
        let queue = FrameQueue::new(2);
        queue.push(buffer(&pool));
        let popped = queue.pop_timeout(Duration::from_millis(20)).await;
        assert!(popped.is_some());
        assert_eq!(queue.len(), 0);
    }
}
