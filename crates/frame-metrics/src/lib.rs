//! Sliding-window pipeline metrics and a background resident-memory sampler.
//!
//! Mirrors the shape of the source `MetricsRegistry`/`PipelineMetrics`
//! pair: per-pipeline deques of `(timestamp, value)` samples, pruned by
//! wall-clock cutoff at snapshot time, plus linear-interpolation quantiles.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_WINDOW: Duration = Duration::from_secs(300);
const DEFAULT_FPS_WINDOW: Duration = Duration::from_secs(10);

fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if q <= 0.0 {
        return values[0];
    }
    if q >= 1.0 {
        return values[values.len() - 1];
    }

    let position = (values.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        return values[lower];
    }
    let fraction = position - lower as f64;
    values[lower] + (values[upper] - values[lower]) * fraction
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

fn latency_stats(mut values: Vec<f64>) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats::default();
    }
    let count = values.len();
    let avg = values.iter().sum::<f64>() / count as f64;
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let max = *values.last().unwrap();
    LatencyStats {
        avg_ms: avg,
        p50_ms: quantile(&values, 0.5),
        p95_ms: quantile(&values, 0.95),
        max_ms: max,
        count,
    }
}

fn prune(series: &mut VecDeque<(Instant, f64)>, cutoff: Instant) {
    while let Some((ts, _)) = series.front() {
        if *ts < cutoff {
            series.pop_front();
        } else {
            break;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub max_size: usize,
    pub current_depth: usize,
    pub utilization_pct: f64,
    pub high_watermark_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropSnapshot {
    pub total: u64,
    pub window_total: u64,
    pub per_minute: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub camera_identifier: String,
    pub pipeline_id: u64,
    pub pipeline_type: String,
    pub queue: QueueSnapshot,
    pub drops: DropSnapshot,
    pub latency_ms: LatencyBreakdown,
    pub fps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyBreakdown {
    pub total: LatencyStats,
    pub queue_wait: LatencyStats,
    pub processing: LatencyStats,
}

struct PipelineMetricsInner {
    camera_identifier: String,
    pipeline_id: u64,
    pipeline_type: String,
    queue_max_size: usize,
    dropped_frames_total: u64,
    drop_events: VecDeque<(Instant, f64)>,
    queue_samples: VecDeque<(Instant, f64)>,
    queue_high_watermark: usize,
    last_queue_size: usize,
    total_latency_samples: VecDeque<(Instant, f64)>,
    queue_latency_samples: VecDeque<(Instant, f64)>,
    processing_latency_samples: VecDeque<(Instant, f64)>,
    processed_timestamps: VecDeque<(Instant, f64)>,
}

impl PipelineMetricsInner {
    fn new(camera_identifier: String, pipeline_id: u64, pipeline_type: String, queue_max_size: usize) -> Self {
        Self {
            camera_identifier,
            pipeline_id,
            pipeline_type,
            queue_max_size,
            dropped_frames_total: 0,
            drop_events: VecDeque::new(),
            queue_samples: VecDeque::new(),
            queue_high_watermark: 0,
            last_queue_size: 0,
            total_latency_samples: VecDeque::new(),
            queue_latency_samples: VecDeque::new(),
            processing_latency_samples: VecDeque::new(),
            processed_timestamps: VecDeque::new(),
        }
    }

    fn update_metadata(&mut self, pipeline_type: Option<&str>, queue_max_size: Option<usize>) {
        if let Some(t) = pipeline_type {
            if !t.is_empty() {
                self.pipeline_type = t.to_string();
            }
        }
        if let Some(size) = queue_max_size {
            if size > 0 {
                self.queue_max_size = size;
            }
        }
    }

    fn record_drop(&mut self, ts: Instant, queue_size: usize) {
        self.dropped_frames_total += 1;
        self.drop_events.push_back((ts, 1.0));
        if queue_size > self.queue_high_watermark {
            self.queue_high_watermark = queue_size;
        }
    }

    fn record_queue(&mut self, ts: Instant, queue_size: usize) {
        self.queue_samples.push_back((ts, queue_size as f64));
        self.last_queue_size = queue_size;
        if queue_size > self.queue_high_watermark {
            self.queue_high_watermark = queue_size;
        }
    }

    fn record_latencies(&mut self, ts: Instant, total_ms: f64, queue_ms: f64, processing_ms: f64) {
        self.total_latency_samples.push_back((ts, total_ms));
        self.queue_latency_samples.push_back((ts, queue_ms));
        self.processing_latency_samples.push_back((ts, processing_ms));
    }

    fn record_processed_frame(&mut self, ts: Instant) {
        self.processed_timestamps.push_back((ts, 1.0));
    }

    fn snapshot(&mut self, now: Instant, window: Duration, fps_window: Duration) -> PipelineSnapshot {
        let window_cutoff = now.checked_sub(window).unwrap_or(now);
        let fps_cutoff = now.checked_sub(fps_window).unwrap_or(now);

        prune(&mut self.drop_events, window_cutoff);
        prune(&mut self.queue_samples, window_cutoff);
        prune(&mut self.total_latency_samples, window_cutoff);
        prune(&mut self.queue_latency_samples, window_cutoff);
        prune(&mut self.processing_latency_samples, window_cutoff);
        prune(&mut self.processed_timestamps, fps_cutoff);

        let max_size = self.queue_max_size;
        let (utilization_pct, high_watermark_pct) = if max_size > 0 {
            (
                (self.last_queue_size as f64 / max_size as f64).min(1.0) * 100.0,
                (self.queue_high_watermark as f64 / max_size as f64).min(1.0) * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        let window_total = self.drop_events.len() as u64;
        let window_minutes = (window.as_secs_f64() / 60.0).max(1.0);
        let per_minute = window_total as f64 / window_minutes;

        let fps = if self.processed_timestamps.len() >= 2 {
            let elapsed = self
                .processed_timestamps
                .back()
                .unwrap()
                .0
                .duration_since(self.processed_timestamps.front().unwrap().0)
                .as_secs_f64();
            if elapsed > 0.0 {
                self.processed_timestamps.len() as f64 / elapsed
            } else {
                0.0
            }
        } else {
            0.0
        };

        let total_latency = latency_stats(self.total_latency_samples.iter().map(|(_, v)| *v).collect());
        let queue_latency = latency_stats(self.queue_latency_samples.iter().map(|(_, v)| *v).collect());
        let processing_latency =
            latency_stats(self.processing_latency_samples.iter().map(|(_, v)| *v).collect());

        PipelineSnapshot {
            camera_identifier: self.camera_identifier.clone(),
            pipeline_id: self.pipeline_id,
            pipeline_type: self.pipeline_type.clone(),
            queue: QueueSnapshot {
                max_size,
                current_depth: self.last_queue_size,
                utilization_pct,
                high_watermark_pct,
            },
            drops: DropSnapshot {
                total: self.dropped_frames_total,
                window_total,
                per_minute,
            },
            latency_ms: LatencyBreakdown {
                total: total_latency,
                queue_wait: queue_latency,
                processing: processing_latency,
            },
            fps,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsConfig {
    pub window_seconds: f64,
    pub fps_window_seconds: f64,
    pub queue_high_utilization_pct: f64,
    pub latency_warn_ms: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW.as_secs_f64(),
            fps_window_seconds: DEFAULT_FPS_WINDOW.as_secs_f64(),
            queue_high_utilization_pct: 80.0,
            latency_warn_ms: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub enabled: bool,
    pub pipelines: Vec<PipelineSnapshot>,
    pub memory_rss_bytes: u64,
    pub config: MetricsConfig,
}

type PipelineKey = (String, u64);

struct MemorySampler {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Process-wide, concurrency-safe metrics registry. One lock guards the
/// pipeline table for O(1) lookups/inserts; each pipeline's own series live
/// behind their own lock so a busy pipeline never blocks another's writes.
pub struct MetricsRegistry {
    pipelines: RwLock<HashMap<PipelineKey, Arc<Mutex<PipelineMetricsInner>>>>,
    rss_bytes: AtomicU64,
    config: RwLock<MetricsConfig>,
    enabled: AtomicBool,
    sampler: Mutex<Option<MemorySampler>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            rss_bytes: AtomicU64::new(0),
            config: RwLock::new(MetricsConfig::default()),
            enabled: AtomicBool::new(true),
            sampler: Mutex::new(None),
        }
    }

    pub fn configure(&self, config: MetricsConfig, enabled: bool) {
        *self.config.write() = config;
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn window(&self) -> Duration {
        Duration::from_secs_f64(self.config.read().window_seconds)
    }

    fn fps_window(&self) -> Duration {
        Duration::from_secs_f64(self.config.read().fps_window_seconds)
    }

    fn get_or_create(
        &self,
        camera_identifier: &str,
        pipeline_id: u64,
        pipeline_type: &str,
        queue_max_size: usize,
    ) -> Arc<Mutex<PipelineMetricsInner>> {
        let key = (camera_identifier.to_string(), pipeline_id);
        if let Some(existing) = self.pipelines.read().get(&key) {
            existing.lock().update_metadata(
                if pipeline_type.is_empty() { None } else { Some(pipeline_type) },
                if queue_max_size > 0 { Some(queue_max_size) } else { None },
            );
            return Arc::clone(existing);
        }
        let mut pipelines = self.pipelines.write();
        Arc::clone(pipelines.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(PipelineMetricsInner::new(
                camera_identifier.to_string(),
                pipeline_id,
                pipeline_type.to_string(),
                queue_max_size,
            )))
        }))
    }

    pub fn register_pipeline(&self, camera_identifier: &str, pipeline_id: u64, pipeline_type: &str, queue_max_size: usize) {
        if !self.enabled() {
            return;
        }
        self.get_or_create(camera_identifier, pipeline_id, pipeline_type, queue_max_size);
    }

    pub fn record_drop(&self, camera_identifier: &str, pipeline_id: u64, queue_size: usize, queue_max_size: usize) {
        if !self.enabled() {
            return;
        }
        let metrics = self.get_or_create(camera_identifier, pipeline_id, "", queue_max_size);
        metrics.lock().record_drop(Instant::now(), queue_size);
    }

    pub fn record_queue_depth(&self, camera_identifier: &str, pipeline_id: u64, queue_size: usize, queue_max_size: usize) {
        if !self.enabled() {
            return;
        }
        let metrics = self.get_or_create(camera_identifier, pipeline_id, "", queue_max_size);
        metrics.lock().record_queue(Instant::now(), queue_size);
    }

    pub fn record_latencies(
        &self,
        camera_identifier: &str,
        pipeline_id: u64,
        pipeline_type: &str,
        total_ms: f64,
        queue_ms: f64,
        processing_ms: f64,
    ) {
        if !self.enabled() {
            return;
        }
        let metrics = self.get_or_create(camera_identifier, pipeline_id, pipeline_type, 0);
        let now = Instant::now();
        let mut guard = metrics.lock();
        guard.record_latencies(now, total_ms, queue_ms, processing_ms);
        guard.record_processed_frame(now);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let config = self.config.read().clone();
        if !self.enabled() {
            return MetricsSnapshot {
                enabled: false,
                pipelines: Vec::new(),
                memory_rss_bytes: 0,
                config,
            };
        }

        let entries: Vec<_> = self.pipelines.read().values().cloned().collect();
        let now = Instant::now();
        let window = self.window();
        let fps_window = self.fps_window();
        let pipelines = entries
            .iter()
            .map(|m| m.lock().snapshot(now, window, fps_window))
            .collect();

        MetricsSnapshot {
            enabled: true,
            pipelines,
            memory_rss_bytes: self.rss_bytes.load(Ordering::Relaxed),
            config,
        }
    }

    /// Start the background resident-memory sampler. A second call while a
    /// sampler is already running is a no-op.
    pub fn start_memory_sampler(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.sampler.lock();
        if slot.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut sys = sysinfo::System::new();
            let pid = sysinfo::Pid::from_u32(std::process::id());
            while !stop_clone.load(Ordering::Relaxed) {
                sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
                if let Some(process) = sys.process(pid) {
                    registry.rss_bytes.store(process.memory(), Ordering::Relaxed);
                }
                tokio::time::sleep(interval).await;
            }
        });
        *slot = Some(MemorySampler { handle, stop });
    }

    /// Stop the sampler (if running) and clear the pipeline table. Intended
    /// for deterministic test-harness resets as well as process shutdown.
    pub async fn shutdown(&self) {
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.stop.store(true, Ordering::Relaxed);
            if tokio::time::timeout(Duration::from_secs(1), sampler.handle).await.is_err() {
                debug!("memory sampler did not stop within timeout");
            }
        }
        self.pipelines.write().clear();
        self.rss_bytes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_ordering_holds() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let p50 = quantile(&values, 0.5);
        let p95 = quantile(&values, 0.95);
        let max = *values.last().unwrap();
        assert!(p50 <= p95);
        assert!(p95 <= max);
    }

    #[test]
    fn drop_counts_are_non_decreasing_across_snapshots() {
        let registry = MetricsRegistry::new();
        registry.register_pipeline("cam0", 1, "april_tag", 2);
        registry.record_drop("cam0", 1, 2, 2);
        let first = registry.snapshot();
        registry.record_drop("cam0", 1, 2, 2);
        let second = registry.snapshot();

        let first_total = first.pipelines[0].drops.total;
        let second_total = second.pipelines[0].drops.total;
        assert!(second_total >= first_total);
        assert_eq!(first_total, 1);
        assert_eq!(second_total, 2);
    }

    #[test]
    fn latency_quantiles_stay_ordered_after_recording() {
        let registry = MetricsRegistry::new();
        registry.register_pipeline("cam0", 1, "april_tag", 2);
        for ms in [5.0, 50.0, 10.0, 200.0, 15.0] {
            registry.record_latencies("cam0", 1, "april_tag", ms, ms / 2.0, ms / 2.0);
        }
        let snapshot = registry.snapshot();
        let stats = &snapshot.pipelines[0].latency_ms.total;
        assert!(stats.p50_ms <= stats.p95_ms);
        assert!(stats.p95_ms <= stats.max_ms);
        assert_eq!(stats.count, 5);
    }

    #[test]
    fn queue_high_watermark_tracks_peak_not_last() {
        let registry = MetricsRegistry::new();
        registry.register_pipeline("cam0", 1, "april_tag", 4);
        registry.record_queue_depth("cam0", 1, 4, 4);
        registry.record_queue_depth("cam0", 1, 1, 4);
        let snapshot = registry.snapshot();
        let queue = &snapshot.pipelines[0].queue;
        assert_eq!(queue.current_depth, 1);
        assert_eq!(queue.high_watermark_pct, 100.0);
    }

    #[test]
    fn disabled_registry_reports_empty_snapshot() {
        let registry = MetricsRegistry::new();
        registry.configure(MetricsConfig::default(), false);
        registry.register_pipeline("cam0", 1, "april_tag", 4);
        let snapshot = registry.snapshot();
        assert!(!snapshot.enabled);
        assert!(snapshot.pipelines.is_empty());
    }

    #[tokio::test]
    async fn memory_sampler_starts_and_shuts_down_cleanly() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_memory_sampler(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.shutdown().await;
        assert!(registry.pipelines.read().is_empty());
    }
}
