//! Core types and external-collaborator traits for the camera fan-out core.
//!
//! This crate draws its shape from `daq-core`: a `driver.rs`/`pipeline.rs`
//! split for the plug-in contracts, descriptor types that travel by value
//! into the registry, and a small `thiserror` enum for the error kinds the
//! registry and workers actually need to name.

pub mod descriptors;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod intrinsics;
pub mod pipeline;

pub use descriptors::{CameraDescriptor, ControlSetting, DeviceDescriptor, PipelineDescriptor, PipelineType};
pub use driver::{CameraDriver, CameraDriverFactory, DriverFrame};
pub use error::{FanoutError, FanoutResult};
pub use geometry::Orientation;
pub use intrinsics::Intrinsics;
pub use pipeline::{AnnotatedFrame, Overlay, PipelineOutput, PipelineResult, VisionPipeline, VisionPipelineFactory};
