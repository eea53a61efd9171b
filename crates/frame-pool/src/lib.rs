//! Reference-counted frame buffer pool.
//!
//! A [`BufferPool`] pre-allocates fixed-shape pixel buffers and hands them out
//! as [`FrameBuffer`] handles. A `FrameBuffer` is a cheap `Clone` (acquiring
//! an extra reference); when the last clone is dropped the underlying buffer
//! is returned to its owning pool automatically. This mirrors the way
//! `daq-pool`'s `PooledBuffer` wraps `bytes::Bytes` ownership with a
//! drop-triggered return, generalized to an explicit multi-holder refcount
//! instead of a single `Bytes` owner.

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, MappedMutexGuard, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Every `SHRINK_CHECK_PERIOD` buffer releases, the pool evaluates whether
/// it can shrink back to `initial_buffers`.
const SHRINK_CHECK_PERIOD: u64 = 16;

/// Fixed shape of every buffer a given pool generation hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl FrameShape {
    pub fn new(height: u32, width: u32, channels: u8) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Byte length of a buffer with this shape.
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

/// Outcome of a `get_buffer` call: either a ready handle or a backpressure
/// signal. Exhaustion is never an `Err` — §4.2/§7 treat it as routine
/// backpressure the caller reacts to, not a fault.
pub enum PoolOutcome {
    Buffer(FrameBuffer),
    Exhausted,
}

struct BufferPoolInner {
    free: SegQueue<Vec<u8>>,
    shape: RwLock<Option<FrameShape>>,
    allocated: AtomicUsize,
    initial_buffers: usize,
    max_buffers: usize,
    high_water_mark: usize,
    shrink_idle: Duration,
    last_alloc: Mutex<Instant>,
    release_counter: AtomicU64,
    total_acquires: AtomicU64,
    total_returns: AtomicU64,
}

impl BufferPoolInner {
    fn return_buffer(self: &Arc<Self>, mut buf: Vec<u8>) {
        buf.clear();
        self.free.push(buf);
        self.total_returns.fetch_add(1, Ordering::Relaxed);

        let n = self.release_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SHRINK_CHECK_PERIOD == 0 {
            self.try_shrink();
        }
    }

    fn try_shrink(self: &Arc<Self>) {
        let allocated = self.allocated.load(Ordering::Acquire);
        if allocated <= self.initial_buffers || allocated < self.high_water_mark {
            return;
        }
        let last_alloc = *self.last_alloc.lock();
        if last_alloc.elapsed() < self.shrink_idle {
            return;
        }
        // Only shrink when every allocated buffer is currently idle in the
        // free list; a buffer still checked out means a burst may still be
        // in flight and shrinking now would just force a re-allocation.
        if self.free.len() != allocated {
            return;
        }

        let target = self.initial_buffers;
        let mut drained = 0usize;
        while self.allocated.load(Ordering::Acquire) > target {
            if self.free.pop().is_none() {
                break;
            }
            self.allocated.fetch_sub(1, Ordering::AcqRel);
            drained += 1;
        }
        if drained > 0 {
            *self.last_alloc.lock() = Instant::now();
            debug!(drained, allocated = target, "buffer pool shrunk to initial size");
        }
    }
}

/// Bounded, shape-locked pool of pre-allocated pixel buffers.
///
/// Cheap to `Clone` (an `Arc` wrapper), so the owning [`crate::FrameBuffer`]
/// handles and the pool itself can share the same allocation without a
/// global lock on the hot path.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Build an uninitialized pool. No buffers are allocated until
    /// [`BufferPool::initialize`] is called with a sample frame's shape.
    pub fn new(
        initial_buffers: usize,
        max_buffers: usize,
        high_water_mark: usize,
        shrink_idle: Duration,
    ) -> Self {
        assert!(initial_buffers > 0, "initial_buffers must be > 0");
        assert!(
            initial_buffers <= high_water_mark && high_water_mark <= max_buffers,
            "expected initial_buffers <= high_water_mark <= max_buffers"
        );

        Self {
            inner: Arc::new(BufferPoolInner {
                free: SegQueue::new(),
                shape: RwLock::new(None),
                allocated: AtomicUsize::new(0),
                initial_buffers,
                max_buffers,
                high_water_mark,
                shrink_idle,
                last_alloc: Mutex::new(Instant::now()),
                release_counter: AtomicU64::new(0),
                total_acquires: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
            }),
        }
    }

    /// Initialize (or reinitialize) the pool against `shape`. A no-op if the
    /// pool already holds this exact shape; otherwise every cached buffer is
    /// discarded and `initial_buffers` fresh buffers are pre-allocated.
    pub fn initialize(&self, shape: FrameShape) {
        let mut current = self.inner.shape.write();
        if *current == Some(shape) {
            return;
        }

        while self.inner.free.pop().is_some() {}
        for _ in 0..self.inner.initial_buffers {
            self.inner.free.push(vec![0u8; shape.byte_len()]);
        }
        self.inner
            .allocated
            .store(self.inner.initial_buffers, Ordering::Release);
        *self.inner.last_alloc.lock() = Instant::now();
        *current = Some(shape);
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.shape.read().is_some()
    }

    pub fn shape(&self) -> Option<FrameShape> {
        *self.inner.shape.read()
    }

    /// Pop a free buffer, growing the pool if under `max_buffers`, or report
    /// exhaustion as a backpressure signal.
    pub fn get_buffer(&self) -> PoolOutcome {
        let shape = match self.shape() {
            Some(shape) => shape,
            None => {
                warn!("get_buffer called before pool initialization");
                return PoolOutcome::Exhausted;
            }
        };

        let raw = if let Some(buf) = self.inner.free.pop() {
            buf
        } else {
            loop {
                let allocated = self.inner.allocated.load(Ordering::Acquire);
                if allocated >= self.inner.max_buffers {
                    return PoolOutcome::Exhausted;
                }
                if self
                    .inner
                    .allocated
                    .compare_exchange(
                        allocated,
                        allocated + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    *self.inner.last_alloc.lock() = Instant::now();
                    break vec![0u8; shape.byte_len()];
                }
            }
        };

        self.inner.total_acquires.fetch_add(1, Ordering::Relaxed);
        PoolOutcome::Buffer(FrameBuffer::new(raw, shape, Arc::clone(&self.inner)))
    }

    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    pub fn free_count(&self) -> usize {
        self.inner.free.len()
    }

    pub fn initial_buffers(&self) -> usize {
        self.inner.initial_buffers
    }

    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }

    pub fn total_acquires(&self) -> u64 {
        self.inner.total_acquires.load(Ordering::Relaxed)
    }

    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }
}

/// Either exclusive in-place access to a buffer's pixel data, or an
/// independent copy, depending on how many live handles share the buffer.
/// See [`FrameBuffer::modifiable_view`].
pub enum ModifiableView<'a> {
    InPlace(MutexGuard<'a, Vec<u8>>),
    Copy(Vec<u8>),
}

impl<'a> ModifiableView<'a> {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            ModifiableView::InPlace(guard) => guard.as_mut_slice(),
            ModifiableView::Copy(buf) => buf.as_mut_slice(),
        }
    }

    /// Consume the view, returning an owned buffer (cloning only in the
    /// `InPlace` case, where the caller wants to publish a snapshot without
    /// holding the pool's internal lock).
    pub fn into_owned(self) -> Vec<u8> {
        match self {
            ModifiableView::InPlace(guard) => guard.clone(),
            ModifiableView::Copy(buf) => buf,
        }
    }
}

struct FrameBufferInner {
    data: Mutex<Vec<u8>>,
    shape: FrameShape,
    created_at: Instant,
    enqueue_timestamps: Mutex<HashMap<u64, Instant>>,
    pool: Arc<BufferPoolInner>,
}

impl Drop for FrameBufferInner {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut *self.data.lock());
        self.pool.return_buffer(buf);
    }
}

/// A reference-counted handle to a pool-owned pixel buffer.
///
/// `Clone` is the spec's `acquire()`: every clone is a live reference. The
/// underlying buffer returns to its pool automatically when the last clone
/// is dropped, which is the spec's `release()` reaching a zero refcount —
/// Rust's `Arc` drop glue gives us the "exactly once" guarantee for free, so
/// there is no separate "already returned" flag to maintain.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<FrameBufferInner>,
}

impl FrameBuffer {
    fn new(data: Vec<u8>, shape: FrameShape, pool: Arc<BufferPoolInner>) -> Self {
        Self {
            inner: Arc::new(FrameBufferInner {
                data: Mutex::new(data),
                shape,
                created_at: Instant::now(),
                enqueue_timestamps: Mutex::new(HashMap::new()),
                pool,
            }),
        }
    }

    /// Acquire another reference. Equivalent to `.clone()`.
    pub fn acquire(&self) -> FrameBuffer {
        self.clone()
    }

    /// Release this reference. Equivalent to `drop(self)`; spelled out for
    /// call sites that want to document intent explicitly.
    pub fn release(self) {
        drop(self);
    }

    pub fn shape(&self) -> FrameShape {
        self.inner.shape
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Number of live references to this buffer, including `self`.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// A read-only view of the pixel data, valid for the duration of the
    /// returned guard.
    pub fn read_view(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.inner.data.lock(), |v| v.as_mut_slice())
    }

    /// An independent copy of the pixel data.
    pub fn writable_copy(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// In-place access when safe (at most the producer's own reference and
    /// the display slot hold this buffer), otherwise a copy. Two is the
    /// threshold named in §4.1: the producer's reference plus the display
    /// slot's reference are the only "safe" holders for an overlay draw.
    pub fn modifiable_view(&self) -> ModifiableView<'_> {
        if self.ref_count() <= 2 {
            ModifiableView::InPlace(self.inner.data.lock())
        } else {
            ModifiableView::Copy(self.inner.data.lock().clone())
        }
    }

    pub fn mark_enqueued(&self, pipeline_id: u64, ts: Instant) {
        self.inner.enqueue_timestamps.lock().insert(pipeline_id, ts);
    }

    pub fn pop_enqueue_timestamp(&self, pipeline_id: u64) -> Option<Instant> {
        self.inner.enqueue_timestamps.lock().remove(&pipeline_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> FrameShape {
        FrameShape::new(4, 4, 3)
    }

    #[test]
    fn initialize_preallocates_initial_buffers() {
        let pool = BufferPool::new(3, 8, 6, Duration::from_millis(50));
        pool.initialize(shape());
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn initialize_same_shape_is_noop() {
        let pool = BufferPool::new(2, 8, 6, Duration::from_millis(50));
        pool.initialize(shape());
        let buf = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!("unexpected exhaustion"),
        };
        let allocated_before = pool.allocated();
        pool.initialize(shape());
        assert_eq!(pool.allocated(), allocated_before);
        drop(buf);
    }

    #[test]
    fn initialize_reshape_discards_cache() {
        let pool = BufferPool::new(2, 8, 6, Duration::from_millis(50));
        pool.initialize(shape());
        pool.initialize(FrameShape::new(8, 8, 3));
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.shape().unwrap().height, 8);
    }

    #[test]
    fn get_buffer_grows_then_exhausts() {
        let pool = BufferPool::new(1, 2, 2, Duration::from_millis(50));
        pool.initialize(shape());

        let b1 = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        let b2 = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        assert_eq!(pool.allocated(), 2);

        match pool.get_buffer() {
            PoolOutcome::Exhausted => {}
            PoolOutcome::Buffer(_) => panic!("expected exhaustion at max_buffers"),
        }

        drop(b1);
        drop(b2);
    }

    #[test]
    fn drop_returns_buffer_to_free_list() {
        let pool = BufferPool::new(1, 4, 4, Duration::from_millis(50));
        pool.initialize(shape());
        let buf = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        assert_eq!(pool.free_count(), 0);
        drop(buf);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn clone_keeps_buffer_alive_until_last_drop() {
        let pool = BufferPool::new(1, 4, 4, Duration::from_millis(50));
        pool.initialize(shape());
        let buf = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        let acquired = buf.acquire();
        assert_eq!(buf.ref_count(), 2);
        drop(buf);
        assert_eq!(pool.free_count(), 0, "buffer must stay out while a clone lives");
        drop(acquired);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn shrinks_back_to_initial_after_idle_burst() {
        let pool = BufferPool::new(2, 8, 3, Duration::from_millis(10));
        pool.initialize(shape());

        // Burst past the high water mark.
        let held: Vec<_> = (0..3)
            .map(|_| match pool.get_buffer() {
                PoolOutcome::Buffer(b) => b,
                PoolOutcome::Exhausted => panic!(),
            })
            .collect();
        assert_eq!(pool.allocated(), 3);
        drop(held);
        assert_eq!(pool.free_count(), 3);

        std::thread::sleep(Duration::from_millis(20));

        // Release enough buffers to cross SHRINK_CHECK_PERIOD and trigger a
        // shrink attempt while the pool is fully idle.
        for _ in 0..(SHRINK_CHECK_PERIOD as usize) {
            let buf = match pool.get_buffer() {
                PoolOutcome::Buffer(b) => b,
                PoolOutcome::Exhausted => panic!(),
            };
            drop(buf);
        }

        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn mark_and_pop_enqueue_timestamp_round_trips() {
        let pool = BufferPool::new(1, 1, 1, Duration::from_millis(50));
        pool.initialize(shape());
        let buf = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        let ts = Instant::now();
        buf.mark_enqueued(7, ts);
        assert_eq!(buf.pop_enqueue_timestamp(7), Some(ts));
        assert_eq!(buf.pop_enqueue_timestamp(7), None);
    }

    #[test]
    fn modifiable_view_in_place_when_at_most_two_refs() {
        let pool = BufferPool::new(1, 1, 1, Duration::from_millis(50));
        pool.initialize(shape());
        let buf = match pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => panic!(),
        };
        let display = buf.acquire();
        assert_eq!(display.ref_count(), 2);
        match display.modifiable_view() {
            ModifiableView::InPlace(_) => {}
            ModifiableView::Copy(_) => panic!("expected in-place access at refcount 2"),
        }

        let _extra = buf.acquire();
        match display.modifiable_view() {
            ModifiableView::InPlace(_) => panic!("expected a copy once a third holder exists"),
            ModifiableView::Copy(_) => {}
        };
    }
}
