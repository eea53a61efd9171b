use serde::{Deserialize, Serialize};

/// Pinhole camera model: 3x3 intrinsic matrix plus distortion coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Row-major 3x3 matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub camera_matrix: [[f64; 3]; 3],
    pub dist_coeffs: Vec<f64>,
    /// True when this model was synthesized from frame dimensions rather
    /// than supplied by calibration (§4.5 step 2).
    pub synthesized: bool,
}

impl Intrinsics {
    pub fn from_calibration(camera_matrix: [[f64; 3]; 3], dist_coeffs: Vec<f64>) -> Self {
        Self {
            camera_matrix,
            dist_coeffs,
            synthesized: false,
        }
    }

    /// Synthesize a default pinhole model from frame dimensions:
    /// `fx = fy = 0.9 * width`, `cx = width / 2`, `cy = height / 2`.
    pub fn synthesize(width: u32, height: u32) -> Self {
        let fx = 0.9 * width as f64;
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        Self {
            camera_matrix: [[fx, 0.0, cx], [0.0, fx, cy], [0.0, 0.0, 1.0]],
            dist_coeffs: Vec::new(),
            synthesized: true,
        }
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_pinhole_matches_formula() {
        let intr = Intrinsics::synthesize(640, 480);
        assert!(intr.synthesized);
        assert!((intr.fx() - 576.0).abs() < 1e-9);
        assert!((intr.fy() - 576.0).abs() < 1e-9);
        assert!((intr.cx() - 320.0).abs() < 1e-9);
        assert!((intr.cy() - 240.0).abs() < 1e-9);
    }

    #[test]
    fn calibrated_intrinsics_are_not_synthesized() {
        let intr = Intrinsics::from_calibration(
            [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]],
            vec![0.1, -0.2, 0.0, 0.0, 0.0],
        );
        assert!(!intr.synthesized);
    }
}
