use crate::field_layout::FieldLayout;
use serde::Deserialize;

/// AprilTag pipeline configuration (§6). Every field has a default so a
/// pipeline descriptor's `config` JSON can supply only the options it cares
/// about.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AprilTagConfig {
    pub family: String,
    pub error_correction: u8,
    pub tag_size_m: f64,
    pub threads: usize,
    pub auto_threads: bool,
    pub decimate: f32,
    pub blur: f32,
    pub refine_edges: bool,
    pub decode_sharpening: f32,
    pub decision_margin: f64,
    pub pose_iterations: usize,
    pub multi_tag_enabled: bool,
    /// Never deserialized directly: the raw `config.field_layout` JSON
    /// string field is parsed and assigned by the pipeline factory so a
    /// malformed upload degrades multi-tag mode instead of failing
    /// construction outright (§4.5.1).
    #[serde(skip)]
    pub field_layout: Option<FieldLayout>,
    pub ransac_reproj_threshold: f64,
    pub ransac_confidence: f64,
    pub min_inliers: usize,
    pub multi_tag_error_threshold: f64,
}

impl Default for AprilTagConfig {
    fn default() -> Self {
        Self {
            family: "tag36h11".to_string(),
            error_correction: 2,
            tag_size_m: 0.1651,
            threads: 1,
            auto_threads: false,
            decimate: 1.0,
            blur: 0.0,
            refine_edges: true,
            decode_sharpening: 0.25,
            decision_margin: 35.0,
            pose_iterations: 40,
            multi_tag_enabled: false,
            field_layout: None,
            ransac_reproj_threshold: 3.0,
            ransac_confidence: 0.99,
            min_inliers: 4,
            multi_tag_error_threshold: 1.0,
        }
    }
}

impl AprilTagConfig {
    /// The number of detector worker threads after resolving `auto_threads`:
    /// `min(4, host_cores)`, per §6.
    pub fn resolved_threads(&self) -> usize {
        if self.auto_threads {
            std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(1)
        } else {
            self.threads.max(1)
        }
    }

    /// Multi-tag mode is silently degraded to single-tag only when no field
    /// layout is loaded, per §4.5.1.
    pub fn effective_multi_tag_enabled(&self) -> bool {
        self.multi_tag_enabled && self.field_layout.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = AprilTagConfig::default();
        assert_eq!(cfg.family, "tag36h11");
        assert_eq!(cfg.error_correction, 2);
        assert!((cfg.tag_size_m - 0.1651).abs() < 1e-9);
        assert_eq!(cfg.pose_iterations, 40);
    }

    #[test]
    fn multi_tag_degrades_without_field_layout() {
        let mut cfg = AprilTagConfig::default();
        cfg.multi_tag_enabled = true;
        assert!(!cfg.effective_multi_tag_enabled());
    }

    #[test]
    fn auto_threads_caps_at_four() {
        let mut cfg = AprilTagConfig::default();
        cfg.auto_threads = true;
        assert!(cfg.resolved_threads() >= 1 && cfg.resolved_threads() <= 4);
    }
}
