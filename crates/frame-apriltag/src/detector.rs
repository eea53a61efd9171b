//! Thin wrapper around the `apriltag` crate's bindgen bindings to the
//! reference AprilTag C detector, grounded on the same FFI-wrapper shape as
//! this workspace's `ads-apriltag`-style dependency: own a detector handle,
//! translate its raw detections into a small owned struct, and keep the
//! C library entirely behind this module.

use crate::config::AprilTagConfig;
use apriltag::{Detector, Family, Image};
use frame_core::FanoutError;

/// One surviving detection: corner order matches the AprilTag convention
/// (counter-clockwise starting at the bottom-left corner in tag space).
#[derive(Debug, Clone)]
pub struct TagDetection {
    pub id: i64,
    pub corners: [(f64, f64); 4],
    pub decision_margin: f64,
    pub hamming: u32,
}

pub struct TagDetector {
    detector: Detector,
}

// SAFETY: `Detector` wraps an exclusively-owned `apriltag_detector_t*` with no
// thread-local state; it is only ever accessed through `&mut self` on
// whichever thread currently owns this `TagDetector`, never shared
// concurrently.
unsafe impl Send for TagDetector {}

impl TagDetector {
    pub fn new(config: &AprilTagConfig) -> Result<Self, FanoutError> {
        let family: Family = config
            .family
            .parse()
            .map_err(|e| FanoutError::PipelineConstruction(format!("unknown tag family '{}': {e}", config.family)))?;

        let builder = Detector::builder().add_family_bits(family, config.error_correction as usize);

        let mut detector = builder
            .build()
            .map_err(|e| FanoutError::PipelineConstruction(format!("failed to build AprilTag detector: {e}")))?;

        detector.set_thread_number(config.resolved_threads() as u8);
        detector.set_decimation(config.decimate);
        detector.set_sigma(config.blur);
        detector.set_refine_edges(config.refine_edges);
        detector.set_shapening(config.decode_sharpening as f64);

        Ok(Self { detector })
    }

    /// Detect tags in a single-channel grayscale buffer and apply the
    /// hamming/decision-margin acceptance filter from §4.5.1.
    pub fn detect(&mut self, gray: &[u8], width: u32, height: u32, decision_margin_threshold: f64) -> Vec<TagDetection> {
        let mut image = match Image::zeros_with_stride(width as usize, height as usize, width as usize) {
            Ok(image) => image,
            Err(_) => return Vec::new(),
        };
        image.as_slice_mut().copy_from_slice(gray);

        self.detector
            .detect(&image)
            .into_iter()
            .filter_map(|detection| {
                let hamming = detection.hamming() as u32;
                let decision_margin = detection.decision_margin() as f64;
                if hamming > 1 || decision_margin < decision_margin_threshold {
                    return None;
                }
                let raw_corners = detection.corners();
                Some(TagDetection {
                    id: detection.id() as i64,
                    corners: [
                        (raw_corners[0][0], raw_corners[0][1]),
                        (raw_corners[1][0], raw_corners[1][1]),
                        (raw_corners[2][0], raw_corners[2][1]),
                        (raw_corners[3][0], raw_corners[3][1]),
                    ],
                    decision_margin,
                    hamming,
                })
            })
            .collect()
    }
}
