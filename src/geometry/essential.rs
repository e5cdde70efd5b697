//! Two-view relative motion from point correspondences.
//!
//! Robust essential-matrix estimation (8-point minimal solver inside an
//! adaptive RANSAC loop) followed by decomposition into the four `(R, t)`
//! candidates and a cheirality vote.
//!
//! Conventions: `E` satisfies `x_currᵀ · E · x_prev = 0` for normalized
//! image coordinates, and the recovered `(R, t)` maps previous-camera
//! coordinates into current-camera coordinates (`X_curr = R·X_prev + t`),
//! with `‖t‖ = 1`.

use nalgebra::{DMatrix, Matrix3, Matrix3x4, Point2, Vector3};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geometry::triangulation::{dehomogenize, triangulate_dlt};
use crate::geometry::{CameraIntrinsics, SE3};

/// Number of correspondences in a minimal sample.
pub const MIN_CORRESPONDENCES: usize = 8;

/// RANSAC and pose-recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EssentialConfig {
    /// Inlier threshold in pixels (Sampson distance).
    pub threshold_px: f64,
    /// Probability that at least one sample is outlier-free.
    pub confidence: f64,
    /// Hard cap on RANSAC iterations.
    pub max_iterations: usize,
    /// Depth bound (in baseline units) used to break ties in the cheirality
    /// vote. It never removes inliers.
    pub max_depth: f64,
    /// Seed of the RANSAC sampler.
    pub seed: u64,
}

impl Default for EssentialConfig {
    fn default() -> Self {
        Self {
            threshold_px: 1.0,
            confidence: 0.999,
            max_iterations: 1000,
            max_depth: 50.0,
            seed: 0x5eed,
        }
    }
}

/// Relative motion between two frames.
#[derive(Debug, Clone)]
pub struct MotionEstimate {
    /// Maps previous-camera coordinates to current-camera coordinates.
    /// Translation has unit norm.
    pub relative: SE3,
    pub essential: Matrix3<f64>,
    /// Per-correspondence flag: RANSAC inlier *and* in front of both cameras.
    pub inlier_mask: Vec<bool>,
    pub num_inliers: usize,
}

/// Estimate the relative motion `prev → curr` from pixel correspondences.
///
/// Returns `None` when fewer than eight correspondences are given, when no
/// essential matrix is supported by enough samples, or when no
/// decomposition places any point in front of both cameras.
pub fn estimate_motion<R: Rng + ?Sized>(
    prev: &[Point2<f64>],
    curr: &[Point2<f64>],
    camera: &CameraIntrinsics,
    config: &EssentialConfig,
    rng: &mut R,
) -> Option<MotionEstimate> {
    assert_eq!(
        prev.len(),
        curr.len(),
        "motion estimation needs index-aligned correspondences"
    );
    if prev.len() < MIN_CORRESPONDENCES {
        return None;
    }

    let n_prev: Vec<_> = prev.iter().map(|p| camera.normalize(p)).collect();
    let n_curr: Vec<_> = curr.iter().map(|p| camera.normalize(p)).collect();

    let threshold = config.threshold_px / camera.mean_focal();
    let (essential, ransac_mask) =
        find_essential_ransac(&n_prev, &n_curr, threshold * threshold, config, rng)?;

    let (relative, inlier_mask) =
        recover_pose(&essential, &n_prev, &n_curr, &ransac_mask, config.max_depth)?;
    let num_inliers = inlier_mask.iter().filter(|&&m| m).count();

    debug!(
        correspondences = prev.len(),
        ransac_inliers = ransac_mask.iter().filter(|&&m| m).count(),
        inliers = num_inliers,
        "Estimated relative motion"
    );

    Some(MotionEstimate {
        relative,
        essential,
        inlier_mask,
        num_inliers,
    })
}

/// RANSAC over normalized coordinates.
///
/// `threshold_sq` is the squared Sampson distance in normalized units.
pub fn find_essential_ransac<R: Rng + ?Sized>(
    prev: &[Point2<f64>],
    curr: &[Point2<f64>],
    threshold_sq: f64,
    config: &EssentialConfig,
    rng: &mut R,
) -> Option<(Matrix3<f64>, Vec<bool>)> {
    let n = prev.len();
    if n < MIN_CORRESPONDENCES || n != curr.len() {
        return None;
    }

    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut max_iter = config.max_iterations;
    let mut iteration = 0;

    let mut sample_prev = Vec::with_capacity(MIN_CORRESPONDENCES);
    let mut sample_curr = Vec::with_capacity(MIN_CORRESPONDENCES);

    while iteration < max_iter {
        iteration += 1;

        sample_prev.clear();
        sample_curr.clear();
        for i in index::sample(rng, n, MIN_CORRESPONDENCES) {
            sample_prev.push(prev[i]);
            sample_curr.push(curr[i]);
        }

        let Some(e) = eight_point(&sample_prev, &sample_curr) else {
            continue;
        };

        let (mask, count) = find_inliers(&e, prev, curr, threshold_sq);
        if count > best.as_ref().map_or(0, |b| b.2) {
            let ratio = count as f64 / n as f64;
            let needed = adaptive_iterations(ratio, config.confidence, MIN_CORRESPONDENCES);
            max_iter = max_iter.min(iteration.saturating_add(needed));
            best = Some((e, mask, count));
        }
    }

    let (mut e, mut mask, mut count) = best?;
    if count < MIN_CORRESPONDENCES {
        return None;
    }

    // Refit on every inlier, keep the refit only if it explains at least as much.
    let (in_prev, in_curr): (Vec<_>, Vec<_>) = prev
        .iter()
        .zip(curr)
        .zip(&mask)
        .filter(|&(_, &m)| m)
        .map(|((p, c), _)| (*p, *c))
        .unzip();
    if let Some(refined) = eight_point(&in_prev, &in_curr) {
        let (refined_mask, refined_count) = find_inliers(&refined, prev, curr, threshold_sq);
        if refined_count >= count {
            e = refined;
            mask = refined_mask;
            count = refined_count;
        }
    }

    trace!(iterations = iteration, inliers = count, "Essential RANSAC finished");
    Some((e, mask))
}

/// Hartley-normalized linear 8-point solver (≥ 8 correspondences).
fn eight_point(prev: &[Point2<f64>], curr: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = prev.len();
    if n < MIN_CORRESPONDENCES {
        return None;
    }

    let (p_norm, t_prev) = hartley_normalize(prev)?;
    let (c_norm, t_curr) = hartley_normalize(curr)?;

    // A thin SVD of an 8x9 system does not expose the null vector, so the
    // design matrix always gets at least nine rows.
    let mut a = DMatrix::<f64>::zeros(n.max(9), 9);
    for (i, (p, c)) in p_norm.iter().zip(&c_norm).enumerate() {
        let row = [
            c.x * p.x,
            c.x * p.y,
            c.x,
            c.y * p.x,
            c.y * p.y,
            c.y,
            p.x,
            p.y,
            1.0,
        ];
        for (j, v) in row.into_iter().enumerate() {
            a[(i, j)] = v;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.imin();
    let e = v_t.row(smallest);
    let e_hat = Matrix3::new(e[0], e[1], e[2], e[3], e[4], e[5], e[6], e[7], e[8]);

    let e = t_curr.transpose() * e_hat * t_prev;
    let e = enforce_essential(&e)?;
    let norm = e.norm();
    if norm <= f64::EPSILON {
        return None;
    }
    Some(e / norm)
}

/// Translate to zero mean and scale to mean distance √2.
fn hartley_normalize(pts: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    let (mx, my) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - mx), s * (p.y - my)))
        .collect();
    #[rustfmt::skip]
    let t = Matrix3::new(
        s, 0.0, -s * mx,
        0.0, s, -s * my,
        0.0, 0.0, 1.0,
    );
    Some((normalized, t))
}

/// Project onto the essential manifold: two equal singular values, one zero.
fn enforce_essential(e: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = e.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let s = 0.5 * (svd.singular_values[0] + svd.singular_values[1]);
    Some(u * Matrix3::from_diagonal(&Vector3::new(s, s, 0.0)) * v_t)
}

/// First-order geometric error of `x_currᵀ E x_prev = 0` (squared).
pub fn sampson_distance_sq(e: &Matrix3<f64>, prev: &Point2<f64>, curr: &Point2<f64>) -> f64 {
    let x0 = prev.to_homogeneous();
    let x1 = curr.to_homogeneous();
    let ex0 = e * x0;
    let etx1 = e.transpose() * x1;
    let residual = x1.dot(&ex0);
    let denom = ex0.x * ex0.x + ex0.y * ex0.y + etx1.x * etx1.x + etx1.y * etx1.y;
    if denom <= f64::EPSILON {
        return f64::INFINITY;
    }
    residual * residual / denom
}

fn find_inliers(
    e: &Matrix3<f64>,
    prev: &[Point2<f64>],
    curr: &[Point2<f64>],
    threshold_sq: f64,
) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = prev
        .iter()
        .zip(curr)
        .map(|(p, c)| sampson_distance_sq(e, p, c) <= threshold_sq)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (mask, count)
}

/// `k = log(1 - p) / log(1 - wⁿ)`.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64, sample_size: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_denom = (1.0 - w_n).ln();
    if log_denom.abs() < 1e-12 {
        return 1;
    }

    let k = (1.0 - confidence).ln() / log_denom;
    if !k.is_finite() || k >= usize::MAX as f64 {
        return usize::MAX;
    }
    (k.ceil() as usize).max(1)
}

/// Decompose `E` and keep the candidate with the most points in front of
/// both cameras. Only points flagged in `mask` take part in the vote. Equal
/// votes go to the candidate with more points closer than `max_depth`.
///
/// Returns the relative pose and the cheirality-filtered mask.
pub fn recover_pose(
    e: &Matrix3<f64>,
    prev: &[Point2<f64>],
    curr: &[Point2<f64>],
    mask: &[bool],
    max_depth: f64,
) -> Option<(SE3, Vec<bool>)> {
    debug_assert_eq!(prev.len(), mask.len());

    let svd = e.svd(true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v_t.determinant() < 0.0 {
        v_t = -v_t;
    }

    #[rustfmt::skip]
    let w = Matrix3::new(
        0.0, -1.0, 0.0,
        1.0, 0.0, 0.0,
        0.0, 0.0, 1.0,
    );
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t: Vector3<f64> = u.column(2).into_owned();
    if t.norm() <= f64::EPSILON {
        return None;
    }
    let t = t.normalize();

    let candidates = [(r1, t), (r1, -t), (r2, t), (r2, -t)];

    let p0 = Matrix3x4::identity();
    let mut best: Option<((usize, usize), Matrix3<f64>, Vector3<f64>, Vec<bool>)> = None;
    for (r, t) in candidates {
        let p1 = rt_matrix(&r, &t);
        let mut near = 0;
        let front: Vec<bool> = prev
            .iter()
            .zip(curr)
            .zip(mask)
            .map(|((x0, x1), &m)| {
                let Some((z0, z1)) = m.then(|| depths(&p0, &p1, &r, &t, x0, x1)).flatten() else {
                    return false;
                };
                let in_front = z0 > 0.0 && z1 > 0.0;
                if in_front && z0 < max_depth && z1 < max_depth {
                    near += 1;
                }
                in_front
            })
            .collect();
        let count = front.iter().filter(|&&f| f).count();
        trace!(count, near, "Cheirality vote");
        if count > 0 && best.as_ref().is_none_or(|b| (count, near) > b.0) {
            best = Some(((count, near), r, t, front));
        }
    }

    let (_, r, t, front) = best?;
    Some((SE3::from_rotation_matrix(&r, t), front))
}

fn rt_matrix(r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    p.set_column(3, t);
    p
}

/// Depth of the triangulated point in the previous and current camera.
fn depths(
    p0: &Matrix3x4<f64>,
    p1: &Matrix3x4<f64>,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    x0: &Point2<f64>,
    x1: &Point2<f64>,
) -> Option<(f64, f64)> {
    let x = triangulate_dlt(p0, p1, x0, x1).and_then(|h| dehomogenize(&h, f64::EPSILON))?;
    Some((x.z, (r * x + t).z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::so3::{angle_between, skew};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn scene_points(n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let col = (i % 5) as f64;
                let row = (i / 5) as f64;
                Vector3::new(
                    -0.8 + 0.4 * col,
                    -0.6 + 0.3 * row,
                    2.0 + ((i * 7) % 11) as f64 * 0.4,
                )
            })
            .collect()
    }

    fn project_all(
        cam: &CameraIntrinsics,
        pose: &SE3,
        pts: &[Vector3<f64>],
    ) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| cam.project(&pose.transform_point(p)).unwrap())
            .collect()
    }

    #[test]
    fn test_lateral_translation() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let world = scene_points(20);
        // Camera moves +1 along x, so points move -1 in camera coordinates.
        let moved = SE3::new(UnitQuaternion::identity(), Vector3::new(-1.0, 0.0, 0.0));
        let prev = project_all(&cam, &SE3::identity(), &world);
        let curr = project_all(&cam, &moved, &world);

        let mut rng = StdRng::seed_from_u64(7);
        let est = estimate_motion(&prev, &curr, &cam, &EssentialConfig::default(), &mut rng)
            .expect("motion should be recovered");

        assert_eq!(est.num_inliers, 20);
        assert!(est.relative.rotation.angle() < 1e-6);
        assert_relative_eq!(est.relative.translation.norm(), 1.0, epsilon = 1e-9);
        assert!(angle_between(&est.relative.translation, &Vector3::new(-1.0, 0.0, 0.0)) < 1e-4);
        for (p, c) in prev.iter().zip(&curr) {
            let x0 = cam.normalize(p).to_homogeneous();
            let x1 = cam.normalize(c).to_homogeneous();
            let residual = x1.dot(&(est.essential * x0));
            assert!(residual.abs() < 1e-9);
        }
    }

    #[test]
    fn test_small_baseline_keeps_distant_inliers() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let world = scene_points(20);
        // Points lie 100 to 300 baselines away.
        let moved = SE3::new(UnitQuaternion::identity(), Vector3::new(-0.02, 0.0, 0.0));
        let prev = project_all(&cam, &SE3::identity(), &world);
        let curr = project_all(&cam, &moved, &world);

        let mut rng = StdRng::seed_from_u64(3);
        let est = estimate_motion(&prev, &curr, &cam, &EssentialConfig::default(), &mut rng)
            .expect("motion should be recovered");

        assert_eq!(est.num_inliers, 20);
        assert!(est.inlier_mask.iter().all(|&m| m));
        assert!(angle_between(&est.relative.translation, &Vector3::new(-1.0, 0.0, 0.0)) < 1e-3);
    }

    #[test]
    fn test_rotation_and_translation_with_outliers() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let world = scene_points(40);
        let rel = SE3::new(
            UnitQuaternion::from_euler_angles(0.02, -0.05, 0.01),
            Vector3::new(-0.4, 0.05, 0.1),
        );
        let prev = project_all(&cam, &SE3::identity(), &world);
        let mut curr = project_all(&cam, &rel, &world);
        for i in (0..40).step_by(6) {
            curr[i].x += 25.0;
            curr[i].y -= 18.0;
        }

        let mut rng = StdRng::seed_from_u64(42);
        let est = estimate_motion(&prev, &curr, &cam, &EssentialConfig::default(), &mut rng)
            .expect("motion should be recovered");

        for (i, &m) in est.inlier_mask.iter().enumerate() {
            assert_eq!(m, i % 6 != 0, "inlier flag of correspondence {i}");
        }
        assert_relative_eq!(
            est.relative.rotation_matrix(),
            rel.rotation_matrix(),
            epsilon = 1e-6
        );
        assert!(angle_between(&est.relative.translation, &rel.translation) < 1e-4);
    }

    #[test]
    fn test_epipolar_constraint_holds() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let world = scene_points(15);
        let rel = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.03, 0.0),
            Vector3::new(0.3, 0.0, -0.2),
        );
        let prev: Vec<_> = project_all(&cam, &SE3::identity(), &world)
            .iter()
            .map(|p| cam.normalize(p))
            .collect();
        let curr: Vec<_> = project_all(&cam, &rel, &world)
            .iter()
            .map(|p| cam.normalize(p))
            .collect();

        let e = eight_point(&prev, &curr).unwrap();
        let expected = skew(&rel.translation) * rel.rotation_matrix();
        let expected = expected / expected.norm();
        // Equal up to sign.
        let sign = if (e - expected).norm() < (e + expected).norm() { 1.0 } else { -1.0 };
        assert_relative_eq!(e * sign, expected, epsilon = 1e-6);

        for (p, c) in prev.iter().zip(&curr) {
            assert!(sampson_distance_sq(&e, p, c) < 1e-16);
        }
    }

    #[test]
    fn test_too_few_correspondences() {
        let cam = CameraIntrinsics::approximate(320, 240);
        let pts = vec![Point2::new(10.0, 10.0); 7];
        let mut rng = StdRng::seed_from_u64(0);

        assert!(estimate_motion(&pts, &pts, &cam, &EssentialConfig::default(), &mut rng).is_none());
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(1.0, 0.999, 8), 1);
        assert_eq!(adaptive_iterations(0.0, 0.999, 8), usize::MAX);
        // 50% inliers with an 8-point sample needs on the order of 1.7k draws.
        let k = adaptive_iterations(0.5, 0.999, 8);
        assert!((1700..1800).contains(&k));
    }
}
