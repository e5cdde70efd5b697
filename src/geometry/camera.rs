//! Pinhole camera intrinsics.

use nalgebra::{Matrix3, Matrix3x4, Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// Focal length (pixels) assumed when no calibration is supplied.
/// Roughly a phone camera at the half-resolution processing size.
pub const DEFAULT_FOCAL_PX: f64 = 600.0;

/// Pinhole intrinsics: focal lengths and principal point, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Approximate, uncalibrated intrinsics for an image of the given size:
    /// fixed focal length and the principal point at the image centre.
    pub fn approximate(width: u32, height: u32) -> Self {
        Self {
            fx: DEFAULT_FOCAL_PX,
            fy: DEFAULT_FOCAL_PX,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// The calibration matrix K.
    #[rustfmt::skip]
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Mean focal length, used to convert pixel thresholds to normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    /// Pixel → normalized image coordinates (K⁻¹ applied).
    #[inline]
    pub fn normalize(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Camera-frame point → pixel. `None` for points on or behind the camera plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// Projection matrix P = K·[R|t] for a world-to-camera pose.
    pub fn projection_matrix(&self, pose_cw: &SE3) -> Matrix3x4<f64> {
        let r = pose_cw.rotation_matrix();
        let t = &pose_cw.translation;
        let rt = Matrix3x4::from_columns(&[
            r.column(0).into_owned(),
            r.column(1).into_owned(),
            r.column(2).into_owned(),
            *t,
        ]);
        self.k() * rt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_approximate_intrinsics() {
        let cam = CameraIntrinsics::approximate(320, 240);

        assert_eq!(cam, CameraIntrinsics::new(600.0, 600.0, 160.0, 120.0));
    }

    #[test]
    fn test_normalize_inverts_project() {
        let cam = CameraIntrinsics::new(520.0, 510.0, 161.0, 119.0);
        let p = Vector3::new(0.4, -0.2, 3.0);
        let px = cam.project(&p).unwrap();
        let n = cam.normalize(&px);

        assert_relative_eq!(n.x, p.x / p.z, epsilon = 1e-12);
        assert_relative_eq!(n.y, p.y / p.z, epsilon = 1e-12);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_projection_matrix_identity_pose() {
        let cam = CameraIntrinsics::approximate(640, 480);
        let p = cam.projection_matrix(&SE3::identity());
        let x = p * Vector4::new(1.0, 2.0, 4.0, 1.0);

        assert_relative_eq!(x.x / x.z, 600.0 * 0.25 + 320.0, epsilon = 1e-12);
        assert_relative_eq!(x.y / x.z, 600.0 * 0.5 + 240.0, epsilon = 1e-12);
    }
}
