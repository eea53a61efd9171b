use crate::intrinsics::Intrinsics;
use serde::{Deserialize, Serialize};

/// Pipeline variants the registry knows the shape of. `AprilTag` is the only
/// variant with a concrete in-tree implementation (§4.5.1); the others are
/// external collaborators identified here only so descriptors round-trip.
#[derive(Debug, Clone, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    AprilTag,
    ColouredShape,
    ObjectDetectionML,
}

/// Exposure or gain control mode/value pair, as supplied on a camera
/// descriptor. The core never interprets these beyond passing them to the
/// driver at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSetting {
    pub mode: String,
    pub value: Option<f64>,
}

/// Immutable input consumed by the registry to build a `PipelineWorker`.
/// Never mutated in place: `update_pipeline` replaces the whole worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    pub pipeline_id: u64,
    pub pipeline_type: PipelineType,
    pub config: serde_json::Value,
    /// Camera intrinsics known at construction time; `None` means the
    /// pipeline worker synthesizes a pinhole model per §4.5 step 2.
    pub intrinsics: Option<Intrinsics>,
    pub queue_capacity: usize,
}

impl PipelineDescriptor {
    pub fn new(pipeline_id: u64, pipeline_type: PipelineType, config: serde_json::Value) -> Self {
        Self {
            pipeline_id,
            pipeline_type,
            config,
            intrinsics: None,
            queue_capacity: 2,
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Descriptor consumed by `CameraRegistry::start_camera` to build one
/// `CameraWorker` plus one `PipelineWorker` per listed pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: u64,
    pub identifier: String,
    pub camera_type: String,
    pub orientation: crate::geometry::Orientation,
    pub camera_matrix: Option<[[f64; 3]; 3]>,
    pub dist_coeffs: Option<Vec<f64>>,
    pub resolution: Option<(u32, u32)>,
    pub framerate: Option<u32>,
    pub depth_enabled: bool,
    pub exposure: Option<ControlSetting>,
    pub gain: Option<ControlSetting>,
    pub pipelines: Vec<PipelineDescriptor>,
}

impl CameraDescriptor {
    pub fn validate(&self) -> Result<(), crate::error::FanoutError> {
        if self.identifier.trim().is_empty() {
            return Err(crate::error::FanoutError::Validation(
                "camera identifier must not be empty".into(),
            ));
        }
        if self.camera_type.trim().is_empty() {
            return Err(crate::error::FanoutError::Validation(
                "camera_type must not be empty".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.pipeline_id) {
                return Err(crate::error::FanoutError::Validation(format!(
                    "duplicate pipeline_id {} in camera descriptor",
                    pipeline.pipeline_id
                )));
            }
            if pipeline.queue_capacity == 0 {
                return Err(crate::error::FanoutError::Validation(
                    "pipeline queue_capacity must be > 0".into(),
                ));
            }
        }
        Ok(())
    }

    /// Intrinsics derived from the descriptor's calibration fields, if both
    /// a camera matrix and distortion coefficients were supplied.
    pub fn intrinsics(&self) -> Option<Intrinsics> {
        let matrix = self.camera_matrix?;
        let dist = self.dist_coeffs.clone().unwrap_or_default();
        Some(Intrinsics::from_calibration(matrix, dist))
    }
}

/// A single device as reported by `CameraDriverFactory::list_devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identifier: String,
    pub name: String,
    pub camera_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> CameraDescriptor {
        CameraDescriptor {
            id: 1,
            identifier: "cam0".into(),
            camera_type: "usb".into(),
            orientation: crate::geometry::Orientation::Deg0,
            camera_matrix: None,
            dist_coeffs: None,
            resolution: None,
            framerate: None,
            depth_enabled: false,
            exposure: None,
            gain: None,
            pipelines: vec![],
        }
    }

    #[test]
    fn empty_identifier_fails_validation() {
        let mut d = descriptor();
        d.identifier.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn duplicate_pipeline_ids_fail_validation() {
        let mut d = descriptor();
        d.pipelines.push(PipelineDescriptor::new(
            1,
            PipelineType::AprilTag,
            serde_json::json!({}),
        ));
        d.pipelines.push(PipelineDescriptor::new(
            1,
            PipelineType::AprilTag,
            serde_json::json!({}),
        ));
        assert!(d.validate().is_err());
    }

    #[test]
    fn valid_descriptor_passes() {
        let mut d = descriptor();
        d.pipelines.push(PipelineDescriptor::new(
            1,
            PipelineType::AprilTag,
            serde_json::json!({}),
        ));
        assert!(d.validate().is_ok());
    }
}
