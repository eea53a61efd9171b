use crate::queue::FrameQueue;
use crate::worker_camera::{CameraWorkerHandle, DisplaySlot};
use crate::worker_pipeline::PipelineWorkerHandle;
use frame_core::{
    AnnotatedFrame, CameraDescriptor, CameraDriverFactory, FanoutError, PipelineDescriptor, PipelineResult,
    VisionPipelineFactory,
};
use frame_metrics::MetricsRegistry;
use frame_pool::BufferPool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INITIAL_BUFFERS: usize = 5;
const DEFAULT_MAX_BUFFERS: usize = 10;
const DEFAULT_HIGH_WATER_MARK: usize = 8;
const DEFAULT_SHRINK_IDLE: Duration = Duration::from_secs(10);

struct CameraGroup {
    descriptor: CameraDescriptor,
    /// `None` once `stop_camera` has taken the handle to join it outside the
    /// table lock; the group stays in the table as a tombstone until the
    /// join completes, so a concurrent `start_camera` still sees the
    /// identifier occupied.
    producer: Option<CameraWorkerHandle>,
    pipelines: HashMap<u64, PipelineWorkerHandle>,
    stopping: Arc<AtomicBool>,
}

/// Process-wide table of running camera groups (§4.6). Every mutating
/// operation is idempotent, and `stop_camera`/`remove_pipeline` release the
/// table lock before joining worker tasks to avoid the classic
/// time-of-check/time-of-use deadlock a worker's own teardown path could
/// otherwise hit.
pub struct CameraRegistry {
    groups: Mutex<HashMap<String, CameraGroup>>,
    driver_factories: HashMap<&'static str, Arc<dyn CameraDriverFactory>>,
    pipeline_factories: HashMap<frame_core::PipelineType, Arc<dyn VisionPipelineFactory>>,
    metrics: Arc<MetricsRegistry>,
}

impl CameraRegistry {
    pub fn new(
        driver_factories: Vec<Arc<dyn CameraDriverFactory>>,
        pipeline_factories: Vec<Arc<dyn VisionPipelineFactory>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            driver_factories: driver_factories.into_iter().map(|f| (f.camera_type(), f)).collect(),
            pipeline_factories: pipeline_factories.into_iter().map(|f| (f.pipeline_type(), f)).collect(),
            metrics,
        }
    }

    /// Build a BufferPool, a CameraWorker, and one PipelineWorker per
    /// descriptor-supplied pipeline, then insert the group. A no-op if the
    /// camera is already running.
    pub fn start_camera(&self, descriptor: CameraDescriptor) -> Result<(), FanoutError> {
        descriptor.validate()?;
        let mut groups = self.groups.lock();
        if groups.contains_key(&descriptor.identifier) {
            return Ok(());
        }

        let factory = self
            .driver_factories
            .get(descriptor.camera_type.as_str())
            .ok_or_else(|| FanoutError::DriverConnection(format!("unknown camera_type '{}'", descriptor.camera_type)))?;
        let driver = factory.build(&descriptor.identifier, &serde_json::Value::Null)?;

        let pool = BufferPool::new(
            DEFAULT_INITIAL_BUFFERS,
            DEFAULT_MAX_BUFFERS,
            DEFAULT_HIGH_WATER_MARK,
            DEFAULT_SHRINK_IDLE,
        );
        let producer = CameraWorkerHandle::spawn(
            descriptor.identifier.clone(),
            descriptor.orientation,
            driver,
            pool,
            Arc::clone(&self.metrics),
        );

        let mut pipelines = HashMap::new();
        for pipeline_descriptor in &descriptor.pipelines {
            if let Some(worker) = self.build_pipeline_worker(&descriptor.identifier, pipeline_descriptor, &producer) {
                pipelines.insert(pipeline_descriptor.pipeline_id, worker);
            }
        }

        groups.insert(
            descriptor.identifier.clone(),
            CameraGroup {
                descriptor,
                producer: Some(producer),
                pipelines,
                stopping: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    fn build_pipeline_worker(
        &self,
        identifier: &str,
        descriptor: &PipelineDescriptor,
        producer: &CameraWorkerHandle,
    ) -> Option<PipelineWorkerHandle> {
        let factory = match self.pipeline_factories.get(&descriptor.pipeline_type) {
            Some(f) => f,
            None => {
                warn!(camera = %identifier, pipeline_type = ?descriptor.pipeline_type, "unsupported pipeline type, worker aborted");
                return None;
            }
        };

        let pipeline = match factory.build(descriptor) {
            Ok(p) => p,
            Err(e) => {
                warn!(camera = %identifier, pipeline_id = descriptor.pipeline_id, error = %e, "pipeline construction failed, worker aborted");
                return None;
            }
        };

        let queue = FrameQueue::new(descriptor.queue_capacity);
        producer.add_pipeline_queue(descriptor.pipeline_id, queue.clone());

        Some(PipelineWorkerHandle::spawn(
            identifier.to_string(),
            descriptor.pipeline_id,
            format!("{:?}", descriptor.pipeline_type),
            queue,
            pipeline,
            descriptor.intrinsics.clone(),
            Arc::clone(&self.metrics),
        ))
    }

    /// Idempotent: a second concurrent call while stopping is already true
    /// is a no-op. The group stays in the table (as a tombstone, `producer:
    /// None`) until the producer has actually joined, so a concurrent
    /// `start_camera` for the same identifier never races a still-live
    /// producer task.
    pub async fn stop_camera(&self, identifier: &str) {
        let (producer, pipelines) = {
            let mut groups = self.groups.lock();
            let Some(group) = groups.get_mut(identifier) else {
                return;
            };
            if group.stopping.swap(true, Ordering::AcqRel) {
                return;
            }
            let pipelines: Vec<_> = group.pipelines.drain().collect();
            let producer = group.producer.take();
            if let Some(p) = &producer {
                p.stop();
            }
            (producer, pipelines)
        };

        info!(camera = %identifier, "stopping camera");
        for (_, worker) in &pipelines {
            worker.stop();
        }
        let mut pipelines = pipelines;
        for (_, mut worker) in pipelines.drain(..) {
            worker.join(JOIN_TIMEOUT).await;
        }

        if let Some(mut producer) = producer {
            producer.join(JOIN_TIMEOUT).await;
        }

        self.groups.lock().remove(identifier);
    }

    /// Refuses if the group is stopping or the pipeline id is already
    /// present.
    pub fn add_pipeline(&self, identifier: &str, descriptor: PipelineDescriptor) -> Result<(), FanoutError> {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(identifier) else {
            return Err(FanoutError::Validation(format!("camera '{identifier}' is not running")));
        };
        if group.stopping.load(Ordering::Acquire) {
            return Err(FanoutError::Validation(format!("camera '{identifier}' is stopping")));
        }
        if group.pipelines.contains_key(&descriptor.pipeline_id) {
            return Err(FanoutError::Validation(format!(
                "pipeline {} already exists on camera '{identifier}'",
                descriptor.pipeline_id
            )));
        }

        let Some(producer) = group.producer.as_ref() else {
            return Err(FanoutError::Validation(format!("camera '{identifier}' is stopping")));
        };
        if let Some(worker) = self.build_pipeline_worker(identifier, &descriptor, producer) {
            group.pipelines.insert(descriptor.pipeline_id, worker);
        }
        Ok(())
    }

    pub async fn remove_pipeline(&self, identifier: &str, pipeline_id: u64) {
        let worker = {
            let mut groups = self.groups.lock();
            let Some(group) = groups.get_mut(identifier) else {
                return;
            };
            if let Some(producer) = group.producer.as_ref() {
                producer.remove_pipeline_queue(pipeline_id);
            }
            group.pipelines.remove(&pipeline_id)
        };
        if let Some(mut worker) = worker {
            worker.stop();
            worker.join(JOIN_TIMEOUT).await;
        }
    }

    /// `remove_pipeline` followed by `add_pipeline`; the producer is never
    /// paused across the swap.
    pub async fn update_pipeline(&self, identifier: &str, descriptor: PipelineDescriptor) -> Result<(), FanoutError> {
        self.remove_pipeline(identifier, descriptor.pipeline_id).await;
        self.add_pipeline(identifier, descriptor)
    }

    pub fn get_latest_results(&self, identifier: &str) -> HashMap<u64, PipelineResult> {
        let groups = self.groups.lock();
        let Some(group) = groups.get(identifier) else {
            return HashMap::new();
        };
        group
            .pipelines
            .iter()
            .filter_map(|(id, worker)| worker.latest_result().map(|r| (*id, r)))
            .collect()
    }

    pub fn get_latest_annotated_frames(&self, identifier: &str) -> HashMap<u64, AnnotatedFrame> {
        let groups = self.groups.lock();
        let Some(group) = groups.get(identifier) else {
            return HashMap::new();
        };
        group
            .pipelines
            .iter()
            .filter_map(|(id, worker)| worker.latest_annotated_frame().map(|f| (*id, f)))
            .collect()
    }

    pub fn get_display_slot(&self, identifier: &str) -> Option<DisplaySlot> {
        self.groups
            .lock()
            .get(identifier)
            .and_then(|g| g.producer.as_ref())
            .and_then(|p| p.display_slot())
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        self.groups
            .lock()
            .get(identifier)
            .map(|g| !g.stopping.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn camera_descriptor(&self, identifier: &str) -> Option<CameraDescriptor> {
        self.groups.lock().get(identifier).map(|g| g.descriptor.clone())
    }

    pub fn running_cameras(&self) -> Vec<String> {
        self.groups.lock().keys().cloned().collect()
    }

    /// Stop every running camera, join its workers, then drop the metrics
    /// registry's memory sampler. Called once from the binary's signal
    /// handler on graceful shutdown.
    pub async fn shutdown(&self) {
        let identifiers = self.running_cameras();
        for identifier in identifiers {
            self.stop_camera(&identifier).await;
        }
        self.metrics.shutdown().await;
    }
}
