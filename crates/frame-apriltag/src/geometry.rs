//! Pose math shared by the single-tag and multi-tag estimators: a rigid
//! transform type, quaternion round-trips, the orthogonal-iteration
//! refinement described in §4.5.1, and the FRC axis-convention remap
//! applied at the reporting boundary.
//!
//! The refinement follows Lu, Hager & Mjolsness's "orthogonal iteration"
//! scheme: hold the rotation fixed, project each object point onto its
//! camera ray, then re-solve absolute orientation (a Procrustes problem)
//! against those projections, and repeat. All of this happens in the
//! camera's optical frame (X-right, Y-down, Z-forward into the scene) —
//! `project`'s division by `camera_point.z` depends on it. Only
//! [`RigidTransform::to_frc`] leaves that frame, remapping a solved pose
//! into FRC convention (X-forward, Y-left, Z-up) for reporting.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector2, Vector3};

/// A camera-frame rigid transform: `p_camera = rotation * p_object + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

/// Change-of-basis matrix from the optical camera frame (X-right, Y-down,
/// Z-forward) to FRC field/robot convention (X-forward, Y-left, Z-up):
/// `frc = (cam.z, -cam.x, -cam.y)`. Orthogonal with determinant +1, so it's
/// a proper rotation and its own inverse is its transpose.
fn frc_basis_change() -> Matrix3<f32> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0, 0.0, 1.0,
        -1.0, 0.0, 0.0,
        0.0, -1.0, 0.0,
    );
    m
}

impl RigidTransform {
    pub fn identity_at(z: f32) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::new(0.0, 0.0, z),
        }
    }

    /// Raw Euler angles `(roll, pitch, yaw)` in radians, in whatever frame
    /// `self.rotation` is expressed in: roll about X, pitch about Y, yaw
    /// about Z. Call [`RigidTransform::to_frc`] first to report FRC-
    /// convention angles.
    pub fn euler_rpy(&self) -> (f32, f32, f32) {
        let rot = Rotation3::from_matrix_unchecked(self.rotation);
        rot.euler_angles()
    }

    pub fn to_quaternion(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_matrix(&self.rotation)
    }

    pub fn from_quaternion(quaternion: UnitQuaternion<f32>, translation: Vector3<f32>) -> Self {
        Self {
            rotation: quaternion.to_rotation_matrix().into_inner(),
            translation,
        }
    }

    /// Remap this transform out of the optical camera frame into FRC
    /// convention (X-forward, Y-left, Z-up), per §4.5.2. Internal pose
    /// refinement (`orthogonal_iteration`, `project`) always stays in the
    /// optical frame; this is applied once, at the point a pose is about to
    /// be reported.
    pub fn to_frc(&self) -> Self {
        let m = frc_basis_change();
        Self {
            rotation: m * self.rotation * m.transpose(),
            translation: m * self.translation,
        }
    }
}

/// Reprojects an object-space point through this transform and the pinhole
/// intrinsics `(fx, fy, cx, cy)`, returning pixel coordinates.
pub fn project(point: Vector3<f32>, transform: &RigidTransform, fx: f32, fy: f32, cx: f32, cy: f32) -> Vector2<f32> {
    let camera_point = transform.rotation * point + transform.translation;
    Vector2::new(
        fx * camera_point.x / camera_point.z + cx,
        fy * camera_point.y / camera_point.z + cy,
    )
}

/// Mean reprojection error in pixels across all correspondences.
pub fn mean_reprojection_error(
    object_points: &[Vector3<f32>],
    image_points: &[Vector2<f32>],
    transform: &RigidTransform,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
) -> f32 {
    let sum: f32 = object_points
        .iter()
        .zip(image_points)
        .map(|(obj, img)| (project(*obj, transform, fx, fy, cx, cy) - img).norm())
        .sum();
    sum / object_points.len().max(1) as f32
}

/// Absolute orientation (Procrustes with translation) between `source` and
/// `target` point sets: the rigid transform minimizing
/// `sum |target_i - (R*source_i + t)|^2`.
fn absolute_orientation(source: &[Vector3<f32>], target: &[Vector3<f32>]) -> RigidTransform {
    let n = source.len() as f32;
    let source_centroid = source.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let target_centroid = target.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    let mut cross = Matrix3::zeros();
    for (s, t) in source.iter().zip(target) {
        let sc = s - source_centroid;
        let tc = t - target_centroid;
        cross += sc * tc.transpose();
    }

    let svd = cross.svd(true, true);
    let u = svd.u.unwrap();
    let v_t = svd.v_t.unwrap();
    let mut rotation = v_t.transpose() * u.transpose();

    // Correct for a reflection: det(R) must be +1.
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] *= -1.0;
        }
        rotation = v * u.transpose();
    }

    let translation = target_centroid - rotation * source_centroid;
    RigidTransform { rotation, translation }
}

/// Refine a pose estimate against known object points and normalized image
/// rays (`x/z`, `y/z` in camera-intrinsic-free coordinates) using
/// orthogonal iteration for `iterations` rounds. Returns the refined
/// transform and its final object-space residual.
pub fn orthogonal_iteration(
    object_points: &[Vector3<f32>],
    normalized_rays: &[Vector2<f32>],
    initial: RigidTransform,
    iterations: usize,
) -> (RigidTransform, f32) {
    let line_of_sight: Vec<Matrix3<f32>> = normalized_rays
        .iter()
        .map(|ray| {
            let q = Vector3::new(ray.x, ray.y, 1.0);
            (q * q.transpose()) / q.dot(&q)
        })
        .collect();

    let mut estimate = initial;
    let mut residual = f32::INFINITY;

    for _ in 0..iterations.max(1) {
        let camera_points: Vec<Vector3<f32>> = object_points
            .iter()
            .map(|p| estimate.rotation * p + estimate.translation)
            .collect();

        let projected: Vec<Vector3<f32>> = camera_points
            .iter()
            .zip(&line_of_sight)
            .map(|(p, v)| v * p)
            .collect();

        residual = projected
            .iter()
            .zip(&camera_points)
            .map(|(proj, cam)| (proj - cam).norm_squared())
            .sum();

        estimate = absolute_orientation(object_points, &projected);
    }

    (estimate, residual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn square_tag(size: f32) -> [Vector3<f32>; 4] {
        let h = size / 2.0;
        [
            Vector3::new(-h, -h, 0.0),
            Vector3::new(h, -h, 0.0),
            Vector3::new(h, h, 0.0),
            Vector3::new(-h, h, 0.0),
        ]
    }

    fn rays_for(corners: &[Vector3<f32>; 4], transform: &RigidTransform) -> Vec<Vector2<f32>> {
        corners
            .iter()
            .map(|p| {
                let cam = transform.rotation * p + transform.translation;
                Vector2::new(cam.x / cam.z, cam.y / cam.z)
            })
            .collect()
    }

    #[test]
    fn quaternion_round_trips_rotation_matrix_within_tolerance() {
        let rotation = Rotation3::from_euler_angles(0.2, -0.35, 0.5).into_inner();
        let transform = RigidTransform {
            rotation,
            translation: Vector3::new(0.0, 0.0, 1.0),
        };
        let quaternion = transform.to_quaternion();
        let rebuilt = RigidTransform::from_quaternion(quaternion, transform.translation);
        for i in 0..3 {
            for j in 0..3 {
                assert!((transform.rotation[(i, j)] - rebuilt.rotation[(i, j)]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn orthogonal_iteration_recovers_known_frontal_pose() {
        let corners = square_tag(0.1651);
        let truth = RigidTransform::identity_at(0.5);
        let rays = rays_for(&corners, &truth);

        let initial = RigidTransform::identity_at(0.4);
        let (recovered, _residual) = orthogonal_iteration(&corners, &rays, initial, 40);

        assert!((recovered.translation.z - 0.5).abs() < 1e-3);
        assert!(recovered.translation.x.abs() < 1e-3);
        assert!(recovered.translation.y.abs() < 1e-3);
    }

    #[test]
    fn orthogonal_iteration_recovers_rotated_pose() {
        let corners = square_tag(0.1651);
        let rotation = Rotation3::from_euler_angles(0.0, FRAC_PI_4, 0.1).into_inner();
        let truth = RigidTransform {
            rotation,
            translation: Vector3::new(0.05, -0.02, 0.6),
        };
        let rays = rays_for(&corners, &truth);

        let initial = RigidTransform::identity_at(0.6);
        let (recovered, _residual) = orthogonal_iteration(&corners, &rays, initial, 60);

        assert!((recovered.translation - truth.translation).norm() < 5e-3);
        let (roll, pitch, yaw) = recovered.euler_rpy();
        let (troll, tpitch, tyaw) = RigidTransform::from_quaternion(UnitQuaternion::from_matrix(&truth.rotation), truth.translation).euler_rpy();
        assert!((roll - troll).abs() < 1e-2);
        assert!((pitch - tpitch).abs() < 1e-2);
        assert!((yaw - tyaw).abs() < 1e-2);
    }

    #[test]
    fn to_frc_maps_forward_optical_axis_to_frc_x() {
        // A tag straight ahead of the camera, no rotation: optical-frame
        // translation is (0, 0, z); FRC convention reports that as
        // "z meters ahead", i.e. along FRC's X axis.
        let transform = RigidTransform::identity_at(2.0);
        let frc = transform.to_frc();
        assert!((frc.translation.x - 2.0).abs() < 1e-6);
        assert!(frc.translation.y.abs() < 1e-6);
        assert!(frc.translation.z.abs() < 1e-6);
    }

    #[test]
    fn to_frc_rotation_stays_orthonormal() {
        let rotation = Rotation3::from_euler_angles(0.1, 0.2, 0.3).into_inner();
        let transform = RigidTransform {
            rotation,
            translation: Vector3::new(0.1, 0.2, 1.5),
        };
        let frc = transform.to_frc();
        let should_be_identity = frc.rotation * frc.rotation.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((should_be_identity[(i, j)] - expected).abs() < 1e-5);
            }
        }
    }
}
