//! Per-camera producer/consumer fan-out and the process-wide registry that
//! owns camera and pipeline worker lifecycles.

pub mod queue;
pub mod registry;
pub mod stop;
pub mod worker_camera;
pub mod worker_pipeline;

pub use queue::{FrameQueue, PushOutcome};
pub use registry::CameraRegistry;
pub use stop::StopSignal;
pub use worker_camera::{CameraWorkerHandle, DisplaySlot};
pub use worker_pipeline::PipelineWorkerHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use frame_apriltag::AprilTagPipelineFactory;
    use frame_core::{
        CameraDescriptor, CameraDriver, CameraDriverFactory, DeviceDescriptor, DriverFrame, FanoutError, Orientation,
        PipelineDescriptor, PipelineType,
    };
    use frame_metrics::MetricsRegistry;
    use frame_pool::FrameShape;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct MockDriver {
        shape: FrameShape,
        frames_served: Arc<AtomicU64>,
    }

    #[async_trait]
    impl CameraDriver for MockDriver {
        async fn connect(&mut self) -> Result<(), FanoutError> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn get_frame(&mut self) -> Option<DriverFrame> {
            self.frames_served.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Some(DriverFrame {
                shape: self.shape,
                data: vec![0u8; self.shape.byte_len()],
                depth: None,
            })
        }
    }

    struct MockDriverFactory {
        frames_served: Arc<AtomicU64>,
    }

    impl CameraDriverFactory for MockDriverFactory {
        fn camera_type(&self) -> &'static str {
            "mock"
        }

        fn list_devices(&self) -> Vec<DeviceDescriptor> {
            vec![]
        }

        fn build(&self, _identifier: &str, _config: &serde_json::Value) -> Result<Box<dyn CameraDriver>, FanoutError> {
            Ok(Box::new(MockDriver {
                shape: FrameShape::new(480, 640, 3),
                frames_served: Arc::clone(&self.frames_served),
            }))
        }
    }

    fn descriptor(identifier: &str) -> CameraDescriptor {
        CameraDescriptor {
            id: 1,
            identifier: identifier.to_string(),
            camera_type: "mock".to_string(),
            orientation: Orientation::Deg0,
            camera_matrix: None,
            dist_coeffs: None,
            resolution: None,
            framerate: None,
            depth_enabled: false,
            exposure: None,
            gain: None,
            pipelines: vec![PipelineDescriptor::new(1, PipelineType::AprilTag, serde_json::json!({}))],
        }
    }

    fn registry() -> CameraRegistry {
        let frames_served = Arc::new(AtomicU64::new(0));
        CameraRegistry::new(
            vec![Arc::new(MockDriverFactory { frames_served })],
            vec![Arc::new(AprilTagPipelineFactory)],
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn start_camera_is_idempotent() {
        let registry = registry();
        registry.start_camera(descriptor("cam0")).unwrap();
        registry.start_camera(descriptor("cam0")).unwrap();
        assert!(registry.is_running("cam0"));
        assert_eq!(registry.running_cameras(), vec!["cam0".to_string()]);
        registry.stop_camera("cam0").await;
    }

    #[tokio::test]
    async fn stop_camera_is_idempotent_and_removes_the_group() {
        let registry = registry();
        registry.start_camera(descriptor("cam0")).unwrap();
        registry.stop_camera("cam0").await;
        registry.stop_camera("cam0").await;
        assert!(!registry.is_running("cam0"));
        assert!(registry.running_cameras().is_empty());
    }

    #[tokio::test]
    async fn results_flow_through_after_frames_are_produced() {
        let registry = registry();
        registry.start_camera(descriptor("cam0")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let results = registry.get_latest_results("cam0");
        assert!(results.contains_key(&1), "expected a published pipeline result");

        registry.stop_camera("cam0").await;
    }

    #[tokio::test]
    async fn add_remove_and_update_pipeline_while_running() {
        let registry = registry();
        registry.start_camera(descriptor("cam0")).unwrap();

        let second = PipelineDescriptor::new(2, PipelineType::AprilTag, serde_json::json!({}));
        registry.add_pipeline("cam0", second.clone()).unwrap();
        assert!(registry.add_pipeline("cam0", second.clone()).is_err());

        registry.remove_pipeline("cam0", 2).await;
        assert!(registry.add_pipeline("cam0", second.clone()).is_ok());

        registry
            .update_pipeline("cam0", PipelineDescriptor::new(2, PipelineType::AprilTag, serde_json::json!({})))
            .await
            .unwrap();

        registry.stop_camera("cam0").await;
    }

    #[tokio::test]
    async fn operations_on_unknown_camera_are_harmless() {
        let registry = registry();
        registry.stop_camera("ghost").await;
        registry.remove_pipeline("ghost", 1).await;
        assert!(!registry.is_running("ghost"));
        assert!(registry.get_latest_results("ghost").is_empty());
        assert!(registry
            .add_pipeline("ghost", PipelineDescriptor::new(1, PipelineType::AprilTag, serde_json::json!({})))
            .is_err());
    }
}
