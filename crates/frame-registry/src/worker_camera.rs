use crate::queue::{FrameQueue, PushOutcome};
use crate::stop::StopSignal;
use frame_core::{CameraDriver, Orientation};
use frame_metrics::MetricsRegistry;
use frame_pool::{BufferPool, FrameBuffer, FrameShape, ModifiableView, PoolOutcome};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DRAIN_ON_EXHAUSTION: usize = 2;

/// The latest raw display frame, overlaid with at least an FPS readout
/// (§4.4 step 8).
#[derive(Clone)]
pub struct DisplaySlot {
    pub sequence: u64,
    pub shape: FrameShape,
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

struct Shared {
    identifier: String,
    queues: RwLock<HashMap<u64, FrameQueue>>,
    display: Mutex<Option<DisplaySlot>>,
    pool: BufferPool,
    stop: StopSignal,
    orientation: Mutex<Orientation>,
}

/// Handle to a running producer task. Dropping this handle does not stop the
/// task; call [`CameraWorkerHandle::stop`] and `.join().await` explicitly,
/// mirroring the registry's lock-release-before-join discipline.
pub struct CameraWorkerHandle {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl CameraWorkerHandle {
    pub fn spawn(
        identifier: String,
        orientation: Orientation,
        mut driver: Box<dyn CameraDriver>,
        pool: BufferPool,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let shared = Arc::new(Shared {
            identifier: identifier.clone(),
            queues: RwLock::new(HashMap::new()),
            display: Mutex::new(None),
            pool,
            stop: StopSignal::new(),
            orientation: Mutex::new(orientation),
        });

        let task_shared = Arc::clone(&shared);
        let span = tracing::info_span!("camera_worker", camera_identifier = %identifier);
        let join = tokio::spawn(
            async move {
                run(task_shared, driver.as_mut(), metrics).await;
            }
            .instrument(span),
        );

        Self {
            shared,
            join: Some(join),
        }
    }

    pub fn add_pipeline_queue(&self, pipeline_id: u64, queue: FrameQueue) {
        self.shared.queues.write().insert(pipeline_id, queue);
    }

    pub fn remove_pipeline_queue(&self, pipeline_id: u64) {
        self.shared.queues.write().remove(&pipeline_id);
    }

    pub fn display_slot(&self) -> Option<DisplaySlot> {
        self.shared.display.lock().clone()
    }

    pub fn stop(&self) {
        self.shared.stop.signal();
    }

    /// Signal a runtime orientation change (§4.4 step 1). Picked up by the
    /// acquisition loop on its next iteration, which reinitializes the
    /// buffer pool against the rotated shape before the next frame lands.
    pub fn set_orientation(&self, orientation: Orientation) {
        *self.shared.orientation.lock() = orientation;
    }

    /// Join the producer task, waiting at most `timeout` (§5: 5 s upper
    /// bound). A missed join is logged but never blocks registry cleanup.
    pub async fn join(&mut self, timeout: Duration) {
        if let Some(handle) = self.join.take() {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!(camera = %self.shared.identifier, "producer task did not join within timeout");
            }
        }
    }
}

async fn run(shared: Arc<Shared>, driver: &mut dyn CameraDriver, metrics: Arc<MetricsRegistry>) {
    while !shared.stop.is_stopped() {
        if let Err(e) = driver.connect().await {
            warn!(camera = %shared.identifier, error = %e, "camera connect failed, retrying");
            shared.stop.wait(RECONNECT_DELAY).await;
            continue;
        }
        info!(camera = %shared.identifier, "camera connected");

        acquisition_loop(&shared, driver, &metrics).await;

        driver.disconnect().await;
        if !shared.stop.is_stopped() {
            shared.stop.wait(RECONNECT_DELAY).await;
        }
    }
    debug!(camera = %shared.identifier, "producer task stopped");
}

async fn acquisition_loop(shared: &Arc<Shared>, driver: &mut dyn CameraDriver, metrics: &Arc<MetricsRegistry>) {
    let (start, mut frame_count) = (Instant::now(), 0u32);
    let mut window_start = start;
    let mut fps = 0.0f64;
    let sequence = AtomicU64::new(0);

    let mut orientation = *shared.orientation.lock();
    let mut last_raw_shape: Option<FrameShape> = None;

    loop {
        if shared.stop.is_stopped() {
            return;
        }

        let current_orientation = *shared.orientation.lock();
        if current_orientation != orientation {
            orientation = current_orientation;
            if let Some(raw_shape) = last_raw_shape {
                shared.pool.initialize(orientation.rotated_shape(raw_shape));
            }
        }

        let Some(driver_frame) = driver.get_frame().await else {
            info!(camera = %shared.identifier, "lost frame, reconnecting");
            return;
        };
        last_raw_shape = Some(driver_frame.shape);

        let rotated_shape = orientation.rotated_shape(driver_frame.shape);
        shared.pool.initialize(rotated_shape);
        let rotated = orientation.apply(&driver_frame.data, driver_frame.shape);

        let buffer = match shared.pool.get_buffer() {
            PoolOutcome::Buffer(b) => b,
            PoolOutcome::Exhausted => {
                drain_queues(shared);
                continue;
            }
        };

        match buffer.modifiable_view() {
            ModifiableView::InPlace(mut guard) => guard.as_mut_slice().copy_from_slice(&rotated),
            ModifiableView::Copy(_) => {
                // A brand-new buffer is uniquely held; this arm is unreachable
                // in practice but kept total for ModifiableView's contract.
                unreachable!("freshly acquired buffer must have refcount 1")
            }
        }

        fan_out(shared, &buffer, metrics);
        publish_display_frame(shared, &buffer, fps, sequence.fetch_add(1, Ordering::Relaxed) + 1);
        drop(buffer);

        frame_count += 1;
        if window_start.elapsed() >= Duration::from_secs(1) {
            fps = frame_count as f64 / window_start.elapsed().as_secs_f64();
            frame_count = 0;
            window_start = Instant::now();
        }
    }
}

fn fan_out(shared: &Arc<Shared>, buffer: &FrameBuffer, metrics: &Arc<MetricsRegistry>) {
    let targets: Vec<(u64, FrameQueue)> = shared
        .queues
        .read()
        .iter()
        .map(|(id, q)| (*id, q.clone()))
        .collect();

    for (pipeline_id, queue) in targets {
        let handle = buffer.acquire();
        let capacity = queue.capacity();
        let depth_before = queue.len();
        metrics.record_queue_depth(&shared.identifier, pipeline_id, depth_before, capacity);

        handle.mark_enqueued(pipeline_id, Instant::now());
        let (outcome, _) = queue.push(handle);

        if outcome == PushOutcome::DroppedOldest {
            metrics.record_drop(&shared.identifier, pipeline_id, depth_before, capacity);
        }
        metrics.record_queue_depth(&shared.identifier, pipeline_id, queue.len(), capacity);
    }
}

fn publish_display_frame(shared: &Arc<Shared>, buffer: &FrameBuffer, fps: f64, sequence: u64) {
    let shape = buffer.shape();
    let mut data = match buffer.modifiable_view() {
        ModifiableView::InPlace(guard) => guard.clone(),
        ModifiableView::Copy(copy) => copy,
    };
    draw_fps_overlay(&mut data, shape, fps);

    *shared.display.lock() = Some(DisplaySlot {
        sequence,
        shape,
        data,
        captured_at: Instant::now(),
    });
}

/// Stamps a minimal top-left marker proportional to `fps` into the first
/// row's first `fps.round()` pixels, standing in for a real font renderer
/// the way §4.4 step 8 only requires "at minimum an FPS text" be present.
fn draw_fps_overlay(data: &mut [u8], shape: FrameShape, fps: f64) {
    let channels = shape.channels as usize;
    let marker_width = (fps.round() as usize).min(shape.width as usize);
    for x in 0..marker_width {
        let offset = x * channels;
        if offset + channels <= data.len() {
            data[offset..offset + channels].fill(255);
        }
    }
}

fn drain_queues(shared: &Arc<Shared>) {
    let queues: Vec<FrameQueue> = shared.queues.read().values().cloned().collect();
    for queue in queues {
        let mut drained = 0;
        while drained < DRAIN_ON_EXHAUSTION {
            if queue.pop_front_nonblocking().is_none() {
                break;
            }
            drained += 1;
        }
        if drained > 0 {
            debug!(camera = %shared.identifier, drained, "drained queue after pool exhaustion");
        }
    }
}
