//! Reference AprilTag vision pipeline (§4.5.1): the one `VisionPipeline`
//! implementation this workspace carries in-tree, used both as the anchor
//! for the result-schema contract and as the default pipeline type wired up
//! by the binary's demo configuration.

pub mod config;
pub mod detector;
pub mod field_layout;
pub mod geometry;
pub mod pipeline;

pub use config::AprilTagConfig;
pub use field_layout::{parse_field_layout, FieldLayout, FieldLayoutError};
pub use pipeline::AprilTagPipeline;

use frame_core::descriptors::PipelineDescriptor;
use frame_core::{FanoutError, PipelineType, VisionPipeline, VisionPipelineFactory};

pub struct AprilTagPipelineFactory;

impl VisionPipelineFactory for AprilTagPipelineFactory {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::AprilTag
    }

    fn build(&self, descriptor: &PipelineDescriptor) -> Result<Box<dyn VisionPipeline>, FanoutError> {
        let mut config: AprilTagConfig = if descriptor.config.is_null() {
            AprilTagConfig::default()
        } else {
            serde_json::from_value(descriptor.config.clone())
                .map_err(|e| FanoutError::PipelineConstruction(format!("invalid april_tag config: {e}")))?
        };

        if config.multi_tag_enabled && config.field_layout.is_none() {
            if let Some(raw) = descriptor.config.get("field_layout").and_then(|v| v.as_str()) {
                match parse_field_layout(raw) {
                    Ok(layout) => config.field_layout = Some(layout),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load field layout; degrading to single-tag");
                        config.multi_tag_enabled = false;
                    }
                }
            }
        }

        Ok(Box::new(AprilTagPipeline::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_reports_april_tag_type() {
        assert_eq!(AprilTagPipelineFactory.pipeline_type(), PipelineType::AprilTag);
    }
}
