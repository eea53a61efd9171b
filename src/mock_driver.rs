//! Synthetic camera driver for demos and integration tests without hardware.
//!
//! The test pattern itself is a simplified BGR descendant of the mock
//! driver's diagnostic pattern: a checkerboard background, four corner
//! markers for orientation, and a center crosshair. Unlike the source
//! pattern this emits directly into the 8-bit BGR buffers `CameraDriver`
//! expects rather than a 16-bit intermediate, and drops the moving-hotspot
//! and pulsing-ring animation since nothing downstream consumes them.

use async_trait::async_trait;
use frame_core::{CameraDriver, CameraDriverFactory, DeviceDescriptor, DriverFrame, FanoutError};
use frame_pool::FrameShape;
use std::time::Duration;

#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fff_ffff
}

/// Stamps a filled square near the frame center, standing in for a real
/// AprilTag when a config wants pipelines exercised without a physical
/// target in view.
fn stamp_tag_marker(data: &mut [u8], width: usize, height: usize, channels: usize) {
    let side = (width.min(height) / 6).max(8);
    let (top, left) = (height / 2 - side / 2, width / 2 - side / 2);
    let border = (side / 8).max(1);

    for y in top..(top + side).min(height) {
        for x in left..(left + side).min(width) {
            let on_border = y < top + border || y >= top + side - border || x < left + border || x >= left + side - border;
            let offset = (y * width + x) * channels;
            if offset + channels > data.len() {
                continue;
            }
            data[offset..offset + channels].fill(if on_border { 255 } else { 0 });
        }
    }
}

fn generate_pattern(width: u32, height: u32, channels: u8, frame_num: u64, stamp_tag: bool) -> Vec<u8> {
    let (w, h, c) = (width as usize, height as usize, channels as usize);
    let mut data = vec![0u8; w * h * c];

    if w < 16 || h < 16 {
        for y in 0..h {
            for x in 0..w {
                let value = (((x + y) * 255) / (w + h).max(1)) as u8;
                let offset = (y * w + x) * c;
                data[offset..offset + c].fill(value);
            }
        }
        return data;
    }

    let checker_size = (w.min(h) / 16).max(1);
    let corner_size = (w.min(h) / 8).max(1);
    let frame_seed = frame_num.wrapping_mul(2_654_435_761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let noise = (prng(frame_seed ^ idx as u64) & 0x1f) as i32 - 16;
            let checker_x = x / checker_size;
            let checker_y = y / checker_size;
            let base: i32 = if (checker_x + checker_y) % 2 == 0 { 64 } else { 96 };
            let mut value = (base + noise).clamp(0, 255) as u8;

            if x < corner_size && y < corner_size {
                value = 255;
            } else if x >= w - corner_size && y >= h - corner_size {
                value = 32;
            }

            let offset = idx * c;
            data[offset..offset + c].fill(value);
        }
    }

    let (cx, cy) = (w / 2, h / 2);
    let crosshair_len = (w.min(h) / 10).max(1);
    for dx in 0..crosshair_len {
        let offset_left = (cy * w + cx.saturating_sub(dx)) * c;
        let offset_right = (cy * w + (cx + dx).min(w - 1)) * c;
        if offset_left + c <= data.len() {
            data[offset_left..offset_left + c].fill(200);
        }
        if offset_right + c <= data.len() {
            data[offset_right..offset_right + c].fill(200);
        }
    }

    if stamp_tag {
        stamp_tag_marker(&mut data, w, h, c);
    }

    data
}

/// Configuration for a synthetic camera: resolution, target frame rate, and
/// whether to stamp a synthetic tag marker into every frame.
#[derive(Debug, Clone, Copy)]
pub struct MockDriverConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub stamp_tag: bool,
}

impl Default for MockDriverConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: 30,
            stamp_tag: false,
        }
    }
}

pub struct MockCameraDriver {
    config: MockDriverConfig,
    frame_interval: Duration,
    frame_num: u64,
}

impl MockCameraDriver {
    pub fn new(config: MockDriverConfig) -> Self {
        let fps = config.framerate.max(1);
        Self {
            config,
            frame_interval: Duration::from_secs_f64(1.0 / fps as f64),
            frame_num: 0,
        }
    }
}

#[async_trait]
impl CameraDriver for MockCameraDriver {
    async fn connect(&mut self) -> Result<(), FanoutError> {
        self.frame_num = 0;
        Ok(())
    }

    async fn disconnect(&mut self) {}

    async fn get_frame(&mut self) -> Option<DriverFrame> {
        tokio::time::sleep(self.frame_interval).await;
        let data = generate_pattern(self.config.width, self.config.height, 3, self.frame_num, self.config.stamp_tag);
        self.frame_num += 1;
        Some(DriverFrame {
            shape: FrameShape::new(self.config.height, self.config.width, 3),
            data,
            depth: None,
        })
    }

    fn supports_depth(&self) -> bool {
        false
    }
}

pub struct MockDriverFactory {
    config: MockDriverConfig,
}

impl MockDriverFactory {
    pub fn new(config: MockDriverConfig) -> Self {
        Self { config }
    }
}

impl CameraDriverFactory for MockDriverFactory {
    fn camera_type(&self) -> &'static str {
        "mock"
    }

    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        vec![DeviceDescriptor {
            identifier: "mock0".to_string(),
            name: "Synthetic test-pattern camera".to_string(),
            camera_type: "mock".to_string(),
        }]
    }

    fn build(&self, _identifier: &str, _config: &serde_json::Value) -> Result<Box<dyn CameraDriver>, FanoutError> {
        Ok(Box::new(MockCameraDriver::new(self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_frames_fall_back_to_diagonal_gradient() {
        let data = generate_pattern(8, 8, 1, 0, false);
        assert_eq!(data.len(), 64);
    }

    #[test]
    fn tag_marker_stamps_a_filled_square() {
        let mut data = generate_pattern(128, 128, 1, 0, false);
        stamp_tag_marker(&mut data, 128, 128, 1);
        let center_offset = (64 * 128 + 64) * 1;
        assert_eq!(data[center_offset], 0);
    }

    #[tokio::test]
    async fn driver_produces_frames_of_the_configured_shape() {
        let mut driver = MockCameraDriver::new(MockDriverConfig {
            width: 64,
            height: 48,
            framerate: 1000,
            stamp_tag: true,
        });
        driver.connect().await.unwrap();
        let frame = driver.get_frame().await.unwrap();
        assert_eq!(frame.shape.width, 64);
        assert_eq!(frame.shape.height, 48);
        assert_eq!(frame.data.len(), 64 * 48 * 3);
    }

    #[test]
    fn factory_reports_mock_camera_type() {
        let factory = MockDriverFactory::new(MockDriverConfig::default());
        assert_eq!(factory.camera_type(), "mock");
        assert_eq!(factory.list_devices().len(), 1);
    }
}
