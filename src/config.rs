//! Startup TOML configuration: one `[[camera]]` table per camera, each with
//! a nested `[[camera.pipeline]]` array, plus a `[metrics]` table. A thin
//! bootstrapping reader, not a persistence layer — it only exists to hand
//! descriptors to `CameraRegistry::start_camera` at process start.

use frame_core::{CameraDescriptor, ControlSetting, Orientation, PipelineDescriptor, PipelineType};
use frame_metrics::MetricsConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    camera: Vec<RawCamera>,
    #[serde(default)]
    metrics: RawMetrics,
}

#[derive(Debug, Deserialize)]
struct RawCamera {
    id: u64,
    identifier: String,
    #[serde(default = "default_camera_type")]
    camera_type: String,
    #[serde(default)]
    orientation_degrees: i32,
    camera_matrix: Option<[[f64; 3]; 3]>,
    dist_coeffs: Option<Vec<f64>>,
    resolution: Option<(u32, u32)>,
    framerate: Option<u32>,
    #[serde(default)]
    depth_enabled: bool,
    exposure: Option<RawControlSetting>,
    gain: Option<RawControlSetting>,
    #[serde(default, rename = "pipeline")]
    pipelines: Vec<RawPipeline>,
}

fn default_camera_type() -> String {
    "mock".to_string()
}

#[derive(Debug, Deserialize)]
struct RawControlSetting {
    mode: String,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    id: u64,
    pipeline_type: PipelineType,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    2
}

#[derive(Debug, Deserialize)]
struct RawMetrics {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    window_seconds: Option<f64>,
    #[serde(default)]
    fps_window_seconds: Option<f64>,
    #[serde(default)]
    queue_high_utilization_pct: Option<f64>,
    #[serde(default)]
    latency_warn_ms: Option<f64>,
    #[serde(default = "default_sampler_interval_ms")]
    sampler_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_sampler_interval_ms() -> u64 {
    2_000
}

impl Default for RawMetrics {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_seconds: None,
            fps_window_seconds: None,
            queue_high_utilization_pct: None,
            latency_warn_ms: None,
            sampler_interval_ms: default_sampler_interval_ms(),
        }
    }
}

/// Fully parsed startup configuration: camera descriptors ready for
/// `CameraRegistry::start_camera`, plus metrics settings.
pub struct StartupConfig {
    pub cameras: Vec<CameraDescriptor>,
    pub metrics_enabled: bool,
    pub metrics_config: MetricsConfig,
    pub sampler_interval: Duration,
}

pub fn load(path: &Path) -> anyhow::Result<StartupConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let raw: RawConfig = toml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    let cameras = raw.camera.into_iter().map(into_descriptor).collect();

    let mut metrics_config = MetricsConfig::default();
    if let Some(v) = raw.metrics.window_seconds {
        metrics_config.window_seconds = v;
    }
    if let Some(v) = raw.metrics.fps_window_seconds {
        metrics_config.fps_window_seconds = v;
    }
    if let Some(v) = raw.metrics.queue_high_utilization_pct {
        metrics_config.queue_high_utilization_pct = v;
    }
    if let Some(v) = raw.metrics.latency_warn_ms {
        metrics_config.latency_warn_ms = v;
    }

    Ok(StartupConfig {
        cameras,
        metrics_enabled: raw.metrics.enabled,
        metrics_config,
        sampler_interval: Duration::from_millis(raw.metrics.sampler_interval_ms),
    })
}

fn into_descriptor(raw: RawCamera) -> CameraDescriptor {
    let camera_matrix = raw.camera_matrix;
    let dist_coeffs = raw.dist_coeffs;
    let intrinsics = camera_matrix.map(|matrix| {
        frame_core::Intrinsics::from_calibration(matrix, dist_coeffs.clone().unwrap_or_default())
    });

    CameraDescriptor {
        id: raw.id,
        identifier: raw.identifier,
        camera_type: raw.camera_type,
        orientation: Orientation::from_degrees(raw.orientation_degrees).unwrap_or(Orientation::Deg0),
        camera_matrix,
        dist_coeffs,
        resolution: raw.resolution,
        framerate: raw.framerate,
        depth_enabled: raw.depth_enabled,
        exposure: raw.exposure.map(|c| ControlSetting { mode: c.mode, value: c.value }),
        gain: raw.gain.map(|c| ControlSetting { mode: c.mode, value: c.value }),
        pipelines: raw
            .pipelines
            .into_iter()
            .map(|p| {
                let mut descriptor =
                    PipelineDescriptor::new(p.id, p.pipeline_type, p.config).with_queue_capacity(p.queue_capacity);
                if let Some(intrinsics) = intrinsics.clone() {
                    descriptor = descriptor.with_intrinsics(intrinsics);
                }
                descriptor
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_minimal_single_camera_config() {
        let file = write_temp(
            r#"
            [[camera]]
            id = 1
            identifier = "front"

            [[camera.pipeline]]
            id = 1
            pipeline_type = "april_tag"
            "#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].identifier, "front");
        assert_eq!(config.cameras[0].pipelines.len(), 1);
        assert_eq!(config.cameras[0].pipelines[0].queue_capacity, 2);
        assert!(config.metrics_enabled);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load(Path::new("/nonexistent/camera-fanout.toml")).is_err());
    }

    #[test]
    fn metrics_overrides_apply() {
        let file = write_temp(
            r#"
            [metrics]
            enabled = false
            latency_warn_ms = 75.0
            "#,
        );
        let config = load(file.path()).unwrap();
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_config.latency_warn_ms, 75.0);
    }
}
