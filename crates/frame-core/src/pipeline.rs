use crate::descriptors::PipelineDescriptor;
use crate::error::FanoutError;
use crate::intrinsics::Intrinsics;
use frame_pool::FrameShape;
use serde::{Deserialize, Serialize};

/// A single overlay drawable produced alongside a pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Polyline { points: Vec<(f32, f32)> },
    Text { x: f32, y: f32, text: String },
}

/// What a `VisionPipeline::process_frame` call produces for a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Opaque, pipeline-defined result payload (§4.5.1 for the AprilTag
    /// schema).
    pub payload: serde_json::Value,
    pub overlays: Vec<Overlay>,
}

/// Consumes a frame plus intrinsics, produces results and optional overlay
/// drawables (§6). The concrete AprilTag implementation lives in
/// `frame-apriltag`; other variants are external collaborators.
pub trait VisionPipeline: Send {
    fn describe_config(&self) -> serde_json::Value;

    fn process_frame(
        &mut self,
        view: &[u8],
        shape: FrameShape,
        intrinsics: &Intrinsics,
    ) -> Result<PipelineOutput, FanoutError>;
}

/// Builds a `VisionPipeline` for one descriptor. An unsupported
/// `pipeline_type` returns `PipelineConstructionError` and is fatal to that
/// worker only (§4.5, §7).
pub trait VisionPipelineFactory: Send + Sync {
    fn pipeline_type(&self) -> crate::descriptors::PipelineType;

    fn build(&self, descriptor: &PipelineDescriptor) -> Result<Box<dyn VisionPipeline>, FanoutError>;
}

/// Published per-pipeline result slot contents. Only the most recent is
/// retained (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub sequence: u64,
    pub captured_at_unix_ms: u64,
    pub total_latency_ms: f64,
    pub queue_wait_ms: f64,
    pub processing_ms: f64,
    pub payload: serde_json::Value,
    /// Last pipeline error, if any; the worker keeps running (§7).
    pub error: Option<String>,
}

/// Published per-pipeline annotated-frame slot contents. Only the most
/// recent is retained (§3).
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub sequence: u64,
    pub shape: FrameShape,
    pub data: Vec<u8>,
}
