//! Linear two-view triangulation.
//!
//! Each correspondence gives four equations `x * P[2] - P[0]`,
//! `y * P[2] - P[1]` (two per view). The homogeneous point is the right
//! singular vector of the smallest singular value, and it is de-homogenized
//! by its own scale factor `w`.

use nalgebra::{Matrix3x4, Matrix4, Point2, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Configuration for the triangulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Homogeneous scale factors with magnitude below this are treated as
    /// points at infinity and dropped.
    pub min_homogeneous_w: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            min_homogeneous_w: 1e-6,
        }
    }
}

/// Output of [`triangulate_points`].
#[derive(Debug, Clone, Default)]
pub struct TriangulatedPoints {
    /// Reconstructed points, in the frame the projection matrices map from.
    pub points: Vec<Vector3<f64>>,
    /// `source_indices[i]` is the correspondence index `points[i]` came from.
    pub source_indices: Vec<usize>,
    /// Number of correspondences rejected as numerically unstable.
    pub num_dropped: usize,
}

/// Solve the DLT system for one correspondence.
///
/// Returns the unit-norm homogeneous point, or `None` if the SVD fails.
pub fn triangulate_dlt(
    p0: &Matrix3x4<f64>,
    p1: &Matrix3x4<f64>,
    x0: &Point2<f64>,
    x1: &Point2<f64>,
) -> Option<Vector4<f64>> {
    let mut a = Matrix4::<f64>::zeros();
    for j in 0..4 {
        a[(0, j)] = x0.x * p0[(2, j)] - p0[(0, j)];
        a[(1, j)] = x0.y * p0[(2, j)] - p0[(1, j)];
        a[(2, j)] = x1.x * p1[(2, j)] - p1[(0, j)];
        a[(3, j)] = x1.y * p1[(2, j)] - p1[(1, j)];
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.imin();
    let x = v_t.row(smallest).transpose();
    let norm = x.norm();
    if norm <= f64::EPSILON {
        return None;
    }
    Some(x / norm)
}

/// De-homogenize, rejecting points whose scale factor is below `min_w`.
#[inline]
pub fn dehomogenize(x: &Vector4<f64>, min_w: f64) -> Option<Vector3<f64>> {
    let w = x[3];
    if w.abs() < min_w {
        return None;
    }
    Some(Vector3::new(x[0] / w, x[1] / w, x[2] / w))
}

/// Triangulate index-aligned correspondences `pts0[i] <-> pts1[i]`.
///
/// Correspondences whose homogeneous scale factor is (near) zero are
/// silently dropped; see [`TriangulatedPoints::num_dropped`].
pub fn triangulate_points(
    p0: &Matrix3x4<f64>,
    p1: &Matrix3x4<f64>,
    pts0: &[Point2<f64>],
    pts1: &[Point2<f64>],
    config: &TriangulationConfig,
) -> TriangulatedPoints {
    assert_eq!(
        pts0.len(),
        pts1.len(),
        "triangulation needs index-aligned correspondences"
    );

    let mut out = TriangulatedPoints {
        points: Vec::with_capacity(pts0.len()),
        source_indices: Vec::with_capacity(pts0.len()),
        num_dropped: 0,
    };

    for (i, (x0, x1)) in pts0.iter().zip(pts1).enumerate() {
        match triangulate_dlt(p0, p1, x0, x1).and_then(|x| dehomogenize(&x, config.min_homogeneous_w)) {
            Some(p) => {
                out.points.push(p);
                out.source_indices.push(i);
            }
            None => out.num_dropped += 1,
        }
    }

    if out.num_dropped > 0 {
        trace!(dropped = out.num_dropped, kept = out.points.len(), "Dropped points at infinity");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CameraIntrinsics, SE3};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_triangulate_dlt_recovers_point() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let pose1 = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0),
            Vector3::new(-0.3, 0.0, 0.0),
        );
        let p0 = cam.projection_matrix(&SE3::identity());
        let p1 = cam.projection_matrix(&pose1);

        let world = Vector3::new(0.2, -0.1, 4.0);
        let x0 = cam.project(&world).unwrap();
        let x1 = cam.project(&pose1.transform_point(&world)).unwrap();

        let h = triangulate_dlt(&p0, &p1, &x0, &x1).unwrap();
        let p = dehomogenize(&h, 1e-6).unwrap();
        assert_relative_eq!(p, world, epsilon = 1e-6);
    }

    #[test]
    fn test_point_at_infinity_is_dropped() {
        // Pure lateral baseline and zero disparity: the rays are parallel, so
        // the homogeneous solution has w == 0.
        let cam = CameraIntrinsics::approximate(320, 240);
        let p0 = cam.projection_matrix(&SE3::identity());
        let p1 = cam.projection_matrix(&SE3::new(
            UnitQuaternion::identity(),
            Vector3::new(-1.0, 0.0, 0.0),
        ));

        let near = Vector3::new(0.0, 0.0, 5.0);
        let pts0 = vec![Point2::new(200.0, 100.0), cam.project(&near).unwrap()];
        let pts1 = vec![
            Point2::new(200.0, 100.0),
            cam.project(&(near - Vector3::new(1.0, 0.0, 0.0))).unwrap(),
        ];

        let h = triangulate_dlt(&p0, &p1, &pts0[0], &pts1[0]).unwrap();
        assert!(h[3].abs() < 1e-6);

        let out = triangulate_points(&p0, &p1, &pts0, &pts1, &TriangulationConfig::default());
        assert_eq!(out.num_dropped, 1);
        assert_eq!(out.source_indices, vec![1]);
        assert_relative_eq!(out.points[0], near, epsilon = 1e-6);
        assert!(out.points.iter().all(|p| p.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn test_depth_ordering_follows_parallax() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let pose1 = SE3::new(UnitQuaternion::identity(), Vector3::new(-0.5, 0.0, 0.0));
        let p0 = cam.projection_matrix(&SE3::identity());
        let p1 = cam.projection_matrix(&pose1);

        let depths = [2.0, 4.0, 8.0];
        let (pts0, pts1): (Vec<_>, Vec<_>) = depths
            .iter()
            .map(|&z| {
                let w = Vector3::new(0.1, 0.1, z);
                (
                    cam.project(&w).unwrap(),
                    cam.project(&pose1.transform_point(&w)).unwrap(),
                )
            })
            .unzip();

        let out = triangulate_points(&p0, &p1, &pts0, &pts1, &TriangulationConfig::default());
        assert_eq!(out.points.len(), 3);
        for (p, z) in out.points.iter().zip(depths) {
            assert_relative_eq!(p.z, z, epsilon = 1e-6);
        }
    }
}
