use crate::queue::FrameQueue;
use crate::stop::StopSignal;
use frame_core::{AnnotatedFrame, Intrinsics, Overlay, PipelineResult, VisionPipeline};
use frame_metrics::MetricsRegistry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

const POP_TIMEOUT: Duration = Duration::from_secs(1);
const SLOW_WARN_INTERVAL: Duration = Duration::from_secs(5);

struct Shared {
    camera_identifier: String,
    pipeline_id: u64,
    result: Mutex<Option<PipelineResult>>,
    annotated: Mutex<Option<AnnotatedFrame>>,
    sequence: AtomicU64,
    last_warn: Mutex<Instant>,
    stop: StopSignal,
}

pub struct PipelineWorkerHandle {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl PipelineWorkerHandle {
    pub fn spawn(
        camera_identifier: String,
        pipeline_id: u64,
        pipeline_type: String,
        queue: FrameQueue,
        mut pipeline: Box<dyn VisionPipeline>,
        intrinsics: Option<Intrinsics>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let shared = Arc::new(Shared {
            camera_identifier: camera_identifier.clone(),
            pipeline_id,
            result: Mutex::new(None),
            annotated: Mutex::new(None),
            sequence: AtomicU64::new(0),
            last_warn: Mutex::new(Instant::now() - SLOW_WARN_INTERVAL),
            stop: StopSignal::new(),
        });

        metrics.register_pipeline(&camera_identifier, pipeline_id, &pipeline_type, queue.capacity());

        let task_shared = Arc::clone(&shared);
        let span = tracing::info_span!("pipeline_worker", camera_identifier = %camera_identifier, pipeline_id);
        let join = tokio::spawn(
            async move {
                run(task_shared, queue, pipeline.as_mut(), intrinsics, pipeline_type, metrics).await;
            }
            .instrument(span),
        );

        Self {
            shared,
            join: Some(join),
        }
    }

    pub fn latest_result(&self) -> Option<PipelineResult> {
        self.shared.result.lock().clone()
    }

    pub fn latest_annotated_frame(&self) -> Option<AnnotatedFrame> {
        self.shared.annotated.lock().clone()
    }

    pub fn stop(&self) {
        self.shared.stop.signal();
    }

    pub async fn join(&mut self, timeout: Duration) {
        if let Some(handle) = self.join.take() {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!(
                    camera = %self.shared.camera_identifier,
                    pipeline_id = self.shared.pipeline_id,
                    "pipeline task did not join within timeout"
                );
            }
        }
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn run(
    shared: Arc<Shared>,
    queue: FrameQueue,
    pipeline: &mut dyn VisionPipeline,
    intrinsics: Option<Intrinsics>,
    pipeline_type: String,
    metrics: Arc<MetricsRegistry>,
) {
    while !shared.stop.is_stopped() {
        let Some(frame) = queue.pop_timeout(POP_TIMEOUT).await else {
            continue;
        };

        let dequeue_ts = Instant::now();
        let queue_wait_ms = frame
            .pop_enqueue_timestamp(shared.pipeline_id)
            .map(|ts| dequeue_ts.duration_since(ts).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let shape = frame.shape();
        let frame_intrinsics = intrinsics
            .clone()
            .unwrap_or_else(|| Intrinsics::synthesize(shape.width, shape.height));

        let view = frame.read_view().to_vec();
        let processing_start = Instant::now();
        let outcome = pipeline.process_frame(&view, shape, &frame_intrinsics);
        let processing_ms = processing_start.elapsed().as_secs_f64() * 1000.0;
        let total_latency_ms = dequeue_ts.duration_since(frame.created_at()).as_secs_f64() * 1000.0 + processing_ms;

        match outcome {
            Ok(output) => {
                let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;

                let mut annotated_data = frame.writable_copy();
                draw_overlays(&mut annotated_data, shape, &output.overlays);

                *shared.annotated.lock() = Some(AnnotatedFrame {
                    sequence,
                    shape,
                    data: annotated_data,
                });
                *shared.result.lock() = Some(PipelineResult {
                    sequence,
                    captured_at_unix_ms: unix_ms_now(),
                    total_latency_ms,
                    queue_wait_ms,
                    processing_ms,
                    payload: output.payload,
                    error: None,
                });

                metrics.record_latencies(
                    &shared.camera_identifier,
                    shared.pipeline_id,
                    &pipeline_type,
                    total_latency_ms,
                    queue_wait_ms,
                    processing_ms,
                );

                maybe_warn_slow(&shared, &metrics, total_latency_ms, queue_wait_ms, queue.len(), queue.capacity());
            }
            Err(e) => {
                warn!(
                    camera = %shared.camera_identifier,
                    pipeline_id = shared.pipeline_id,
                    error = %e,
                    "pipeline processing failed for this frame, worker continues"
                );
                let mut guard = shared.result.lock();
                match guard.as_mut() {
                    Some(result) => result.error = Some(e.to_string()),
                    None => {
                        *guard = Some(PipelineResult {
                            sequence: 0,
                            captured_at_unix_ms: unix_ms_now(),
                            total_latency_ms,
                            queue_wait_ms,
                            processing_ms,
                            payload: serde_json::Value::Null,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        drop(frame);
    }
}

fn maybe_warn_slow(
    shared: &Arc<Shared>,
    metrics: &Arc<MetricsRegistry>,
    total_latency_ms: f64,
    queue_wait_ms: f64,
    queue_depth: usize,
    queue_capacity: usize,
) {
    let snapshot = metrics.snapshot();
    let latency_warn_ms = snapshot.config.latency_warn_ms;
    let queue_high_utilization_pct = snapshot.config.queue_high_utilization_pct;

    let utilization_pct = if queue_capacity > 0 {
        queue_depth as f64 / queue_capacity as f64 * 100.0
    } else {
        0.0
    };
    let queue_wait_threshold = (0.6 * latency_warn_ms).max(50.0);

    let triggered = total_latency_ms > latency_warn_ms
        || utilization_pct > queue_high_utilization_pct
        || queue_wait_ms > queue_wait_threshold;
    if !triggered {
        return;
    }

    let mut last_warn = shared.last_warn.lock();
    if last_warn.elapsed() < SLOW_WARN_INTERVAL {
        return;
    }
    *last_warn = Instant::now();
    warn!(
        camera = %shared.camera_identifier,
        pipeline_id = shared.pipeline_id,
        total_latency_ms,
        queue_wait_ms,
        utilization_pct,
        "pipeline running slow"
    );
}

fn draw_overlays(data: &mut [u8], shape: frame_pool::FrameShape, overlays: &[Overlay]) {
    let channels = shape.channels as usize;
    let (width, height) = (shape.width as usize, shape.height as usize);
    let mut plot = |x: f32, y: f32| {
        let (x, y) = (x.round() as i64, y.round() as i64);
        if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
            return;
        }
        let offset = (y as usize * width + x as usize) * channels;
        if offset + channels <= data.len() {
            data[offset..offset + channels].fill(0);
        }
    };

    for overlay in overlays {
        match overlay {
            Overlay::Polyline { points } => {
                for (x, y) in points {
                    plot(*x, *y);
                }
            }
            Overlay::Text { x, y, .. } => plot(*x, *y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_ms_now_is_monotonic_forward() {
        let a = unix_ms_now();
        std::thread::sleep(Duration::from_millis(5));
        let b = unix_ms_now();
        assert!(b >= a);
    }
}
