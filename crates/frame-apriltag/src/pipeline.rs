use crate::config::AprilTagConfig;
use crate::detector::{TagDetection, TagDetector};
use crate::geometry::{self, RigidTransform};
use frame_core::{FanoutError, Intrinsics, Overlay, PipelineOutput, VisionPipeline};
use frame_pool::FrameShape;
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::warn;

/// Object-space (tag-frame) corners for a square tag of the given edge
/// length, in AprilTag's counter-clockwise-from-bottom-left convention.
fn tag_corners(tag_size_m: f32) -> [Vector3<f32>; 4] {
    let h = tag_size_m / 2.0;
    [
        Vector3::new(-h, -h, 0.0),
        Vector3::new(h, -h, 0.0),
        Vector3::new(h, h, 0.0),
        Vector3::new(-h, h, 0.0),
    ]
}

fn to_normalized_rays(corners: &[(f64, f64); 4], fx: f32, fy: f32, cx: f32, cy: f32) -> Vec<Vector2<f32>> {
    corners
        .iter()
        .map(|(x, y)| Vector2::new((*x as f32 - cx) / fx, (*y as f32 - cy) / fy))
        .collect()
}

/// Initial pose guess: tag facing the camera at a distance estimated from
/// apparent corner spacing, refined by orthogonal iteration afterward.
fn initial_guess(corners: &[(f64, f64); 4], tag_size_m: f32, fx: f32) -> RigidTransform {
    let (x0, y0) = corners[0];
    let (x1, y1) = corners[1];
    let apparent_width = (((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt() as f32).max(1.0);
    let z = fx * tag_size_m / apparent_width;
    RigidTransform::identity_at(z.max(0.05))
}

fn to_grayscale(view: &[u8], shape: FrameShape) -> Vec<u8> {
    if shape.channels == 1 {
        return view.to_vec();
    }
    let channels = shape.channels as usize;
    (0..(shape.height as usize * shape.width as usize))
        .map(|i| {
            let base = i * channels;
            // BGR -> luma, ITU-R BT.601 weights.
            let b = view[base] as f64;
            let g = view[base + 1] as f64;
            let r = view[base + 2] as f64;
            (0.114 * b + 0.587 * g + 0.299 * r).round() as u8
        })
        .collect()
}

fn draw_unit_cube_overlay(detection: &TagDetection, pose: &RigidTransform, cfg: &AprilTagConfig, intr: &Intrinsics) -> Overlay {
    let tag_size_m = cfg.tag_size_m as f32;
    let h = tag_size_m / 2.0;
    let base = [
        Vector3::new(-h, -h, 0.0),
        Vector3::new(h, -h, 0.0),
        Vector3::new(h, h, 0.0),
        Vector3::new(-h, h, 0.0),
    ];
    let top = base.map(|p| Vector3::new(p.x, p.y, -tag_size_m));

    let (fx, fy, cx, cy) = (intr.fx() as f32, intr.fy() as f32, intr.cx() as f32, intr.cy() as f32);
    let project = |p: Vector3<f32>| -> (f32, f32) {
        let v = geometry::project(p, pose, fx, fy, cx, cy);
        (v.x, v.y)
    };

    let mut points: Vec<(f32, f32)> = base.iter().chain(top.iter()).map(|p| project(*p)).collect();
    // Close both the base and top loops, then connect corner 0 vertically,
    // tracing the cube's 12 edges as one polyline.
    points.push(project(base[0]));
    points.push(project(top[0]));
    for i in 0..4 {
        points.push(project(top[i]));
    }
    points.push(project(top[0]));

    let _ = detection;
    Overlay::Polyline { points }
}

/// Reference AprilTag pipeline: detection, per-tag orthogonal-iteration pose,
/// and field-layout RANSAC multi-tag pose, per §4.5.1.
pub struct AprilTagPipeline {
    config: AprilTagConfig,
    detector: TagDetector,
}

impl AprilTagPipeline {
    pub fn new(config: AprilTagConfig) -> Result<Self, FanoutError> {
        let detector = TagDetector::new(&config)?;
        Ok(Self { config, detector })
    }

    fn estimate_single_tag(&self, detection: &TagDetection, intr: &Intrinsics) -> (RigidTransform, f32) {
        let (fx, fy, cx, cy) = (intr.fx() as f32, intr.fy() as f32, intr.cx() as f32, intr.cy() as f32);
        let tag_size_m = self.config.tag_size_m as f32;
        let object_points = tag_corners(tag_size_m);
        let rays = to_normalized_rays(&detection.corners, fx, fy, cx, cy);
        let initial = initial_guess(&detection.corners, tag_size_m, fx);
        geometry::orthogonal_iteration(&object_points, &rays, initial, self.config.pose_iterations)
    }

    fn single_tag_payload(&self, detection: &TagDetection, pose: &RigidTransform, pose_error: f32) -> serde_json::Value {
        let frc = pose.to_frc();
        let (roll, pitch, yaw) = frc.euler_rpy();
        serde_json::json!({
            "id": detection.id,
            "decision_margin": detection.decision_margin,
            "pose_error": pose_error,
            "x_m": frc.translation.x,
            "y_m": frc.translation.y,
            "z_m": frc.translation.z,
            "roll_rad": roll,
            "pitch_rad": pitch,
            "yaw_rad": yaw,
            "roll_deg": roll.to_degrees(),
            "pitch_deg": pitch.to_degrees(),
            "yaw_deg": yaw.to_degrees(),
        })
    }

    fn multi_tag_result(
        &self,
        detections: &[TagDetection],
        poses: &[(RigidTransform, f32)],
        intr: &Intrinsics,
    ) -> Option<serde_json::Value> {
        if !self.config.effective_multi_tag_enabled() || detections.len() < 2 {
            return None;
        }
        let layout = self.config.field_layout.as_ref()?;
        let (fx, fy, cx, cy) = (intr.fx() as f32, intr.fy() as f32, intr.cx() as f32, intr.cy() as f32);
        let tag_size_m = self.config.tag_size_m as f32;

        let mut object_points = Vec::new();
        let mut image_points = Vec::new();
        for detection in detections {
            let Some(field_pose) = layout.get(detection.id) else {
                continue;
            };
            let rotation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                field_pose.quaternion[0] as f32,
                field_pose.quaternion[1] as f32,
                field_pose.quaternion[2] as f32,
                field_pose.quaternion[3] as f32,
            ))
            .to_rotation_matrix()
            .into_inner();
            let translation = Vector3::new(
                field_pose.translation[0] as f32,
                field_pose.translation[1] as f32,
                field_pose.translation[2] as f32,
            );

            for (local, (x, y)) in tag_corners(tag_size_m).iter().zip(detection.corners) {
                object_points.push(rotation * local + translation);
                image_points.push(Vector2::new(x as f32, y as f32));
            }
        }

        if object_points.len() < 4 {
            return None;
        }

        let (pose, inliers) = self.ransac_multi_tag(&object_points, &image_points, intr)?;
        if inliers < self.config.min_inliers {
            return None;
        }
        let error = geometry::mean_reprojection_error(&object_points, &image_points, &pose, fx, fy, cx, cy);
        if error as f64 > self.config.multi_tag_error_threshold {
            return None;
        }

        let frc = pose.to_frc();
        let (roll, pitch, yaw) = frc.euler_rpy();
        let _ = poses;
        Some(serde_json::json!({
            "num_tags": detections.len(),
            "inliers": inliers,
            "pose_error": error,
            "x_m": frc.translation.x,
            "y_m": frc.translation.y,
            "z_m": frc.translation.z,
            "roll_rad": roll,
            "pitch_rad": pitch,
            "yaw_rad": yaw,
            "roll_deg": roll.to_degrees(),
            "pitch_deg": pitch.to_degrees(),
            "yaw_deg": yaw.to_degrees(),
        }))
    }

    /// RANSAC over the pooled field-frame correspondences: sample minimal
    /// 4-point subsets, score by reprojection inlier count, refine the best
    /// sample on its full inlier set.
    fn ransac_multi_tag(
        &self,
        object_points: &[Vector3<f32>],
        image_points: &[Vector2<f32>],
        intr: &Intrinsics,
    ) -> Option<(RigidTransform, usize)> {
        let n = object_points.len();
        if n < 4 {
            return None;
        }
        let (fx, fy, cx, cy) = (intr.fx() as f32, intr.fy() as f32, intr.cx() as f32, intr.cy() as f32);
        let reproj_threshold = self.config.ransac_reproj_threshold as f32;

        let sample_prob = (4.0 / n as f64).min(1.0);
        let max_iterations = if sample_prob >= 1.0 {
            1
        } else {
            ((1.0 - self.config.ransac_confidence).ln() / (1.0 - sample_prob.powi(4)).ln()).ceil() as usize
        }
        .clamp(1, 200);

        let indices: Vec<usize> = (0..n).collect();
        let mut rng = thread_rng();
        let mut best: Option<(RigidTransform, usize)> = None;

        for _ in 0..max_iterations {
            let mut sample = indices.clone();
            sample.shuffle(&mut rng);
            let sample = &sample[..4.min(n)];

            let sample_objects: Vec<_> = sample.iter().map(|&i| object_points[i]).collect();
            let sample_rays: Vec<_> = sample
                .iter()
                .map(|&i| {
                    let p = image_points[i];
                    Vector2::new((p.x - cx) / fx, (p.y - cy) / fy)
                })
                .collect();
            let initial = RigidTransform::identity_at(1.0);
            let (candidate, _) = geometry::orthogonal_iteration(&sample_objects, &sample_rays, initial, 10);

            let inlier_count = object_points
                .iter()
                .zip(image_points)
                .filter(|(obj, img)| {
                    let projected = geometry::project(**obj, &candidate, fx, fy, cx, cy);
                    (projected - *img).norm() < reproj_threshold
                })
                .count();

            if best.as_ref().map(|(_, c)| inlier_count > *c).unwrap_or(true) {
                best = Some((candidate, inlier_count));
            }
        }

        let (best_pose, inliers) = best?;
        let mut inlier_objects = Vec::with_capacity(inliers);
        let mut inlier_rays = Vec::with_capacity(inliers);
        for (obj, img) in object_points.iter().zip(image_points) {
            let projected = geometry::project(*obj, &best_pose, fx, fy, cx, cy);
            if (projected - *img).norm() < reproj_threshold {
                inlier_objects.push(*obj);
                inlier_rays.push(Vector2::new((img.x - cx) / fx, (img.y - cy) / fy));
            }
        }

        let refined = if inlier_objects.len() >= 4 {
            geometry::orthogonal_iteration(&inlier_objects, &inlier_rays, best_pose, self.config.pose_iterations).0
        } else {
            best_pose
        };

        Some((refined, inliers))
    }
}

impl VisionPipeline for AprilTagPipeline {
    fn describe_config(&self) -> serde_json::Value {
        serde_json::json!({
            "pipeline_type": "april_tag",
            "family": self.config.family,
            "tag_size_m": self.config.tag_size_m,
            "multi_tag_enabled": self.config.effective_multi_tag_enabled(),
        })
    }

    fn process_frame(&mut self, view: &[u8], shape: FrameShape, intrinsics: &Intrinsics) -> Result<PipelineOutput, FanoutError> {
        let gray = to_grayscale(view, shape);
        let detections = self.detector.detect(&gray, shape.width, shape.height, self.config.decision_margin);

        let mut overlays = Vec::with_capacity(detections.len() * 2);
        let mut single_tags = Vec::with_capacity(detections.len());
        let mut poses = Vec::with_capacity(detections.len());

        for detection in &detections {
            let (pose, error) = self.estimate_single_tag(detection, intrinsics);
            overlays.push(draw_unit_cube_overlay(detection, &pose, &self.config, intrinsics));
            overlays.push(Overlay::Text {
                x: detection.corners[0].0 as f32,
                y: detection.corners[0].1 as f32,
                text: detection.id.to_string(),
            });
            single_tags.push(self.single_tag_payload(detection, &pose, error));
            poses.push((pose, error));
        }

        let multi_tag = self.multi_tag_result(&detections, &poses, intrinsics);
        if self.config.multi_tag_enabled && self.config.field_layout.is_none() {
            warn!("multi_tag_enabled but no field layout configured; degraded to single-tag only");
        }

        Ok(PipelineOutput {
            payload: serde_json::json!({
                "single_tags": single_tags,
                "multi_tag": multi_tag,
            }),
            overlays,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_conversion_is_identity_for_single_channel() {
        let shape = FrameShape::new(2, 2, 1);
        let data = vec![10, 20, 30, 40];
        assert_eq!(to_grayscale(&data, shape), data);
    }

    #[test]
    fn grayscale_conversion_averages_bgr_with_bt601_weights() {
        let shape = FrameShape::new(1, 1, 3);
        let data = vec![0u8, 0, 255]; // pure red in BGR order
        let gray = to_grayscale(&data, shape);
        assert_eq!(gray.len(), 1);
        assert!((gray[0] as f64 - 76.0).abs() < 2.0);
    }

    #[test]
    fn initial_guess_scales_distance_with_apparent_size() {
        let near = [(0.0, 0.0), (200.0, 0.0), (200.0, 200.0), (0.0, 200.0)];
        let far = [(0.0, 0.0), (50.0, 0.0), (50.0, 50.0), (0.0, 50.0)];
        let near_guess = initial_guess(&near, 0.1651, 600.0);
        let far_guess = initial_guess(&far, 0.1651, 600.0);
        assert!(far_guess.translation.z > near_guess.translation.z);
    }
}
