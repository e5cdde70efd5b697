//! Pyramidal Lucas–Kanade sparse optical flow.
//!
//! Tracks each point coarse-to-fine: the flow found at level `L` is doubled
//! and used as the initial guess at level `L - 1`. Within a level the
//! template gradients are computed once and the displacement is refined
//! iteratively with bilinear sampling of the current image.

use image::GrayImage;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::imgproc::{FloatImage, ImagePyramid};
use crate::tracking::FeaturePoint;

/// Tracker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalFlowConfig {
    /// Side of the square integration window (odd).
    pub window_size: usize,
    /// Highest pyramid level; levels `0..=max_level` are used.
    pub max_level: usize,
    pub max_iterations: usize,
    /// Stop refining once the update is shorter than this (pixels).
    pub epsilon: f32,
    /// Minimum eigenvalue of the gradient matrix, per window pixel, below
    /// which a window is too flat to track. Intensities are in `[0, 1]`.
    /// A flat window at a coarse level skips that level; at full
    /// resolution it loses the point.
    pub min_eigen_threshold: f32,
    /// Mean absolute intensity residual above which a track is rejected.
    pub max_patch_error: f32,
}

impl Default for OpticalFlowConfig {
    fn default() -> Self {
        Self {
            window_size: 21,
            max_level: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1.5e-6,
            max_patch_error: 0.12,
        }
    }
}

/// Outcome of tracking a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Tracked,
    /// Too little texture, or the final patch does not match.
    Lost,
    /// The point left the image.
    OutOfBounds,
}

impl TrackStatus {
    pub fn is_tracked(self) -> bool {
        matches!(self, Self::Tracked)
    }
}

/// Tracked location of an input point, index-aligned with the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    pub point: FeaturePoint,
    pub status: TrackStatus,
}

/// Track `points` from `prev` into `curr`.
///
/// The output has exactly one entry per input point, in input order.
///
/// # Panics
/// If `points` is empty or the frames differ in size.
pub fn track_features(
    prev: &GrayImage,
    curr: &GrayImage,
    points: &[FeaturePoint],
    config: &OpticalFlowConfig,
) -> Vec<TrackedPoint> {
    assert!(!points.is_empty(), "optical flow needs at least one point");
    assert_eq!(
        prev.dimensions(),
        curr.dimensions(),
        "optical flow frames must have equal size"
    );

    let min_size = config.window_size.max(1);
    let prev_pyr = ImagePyramid::build(prev, config.max_level, min_size);
    let curr_pyr = ImagePyramid::build(curr, config.max_level, min_size);

    let tracker = PatchTracker::new(config);
    let tracked: Vec<TrackedPoint> = points
        .iter()
        .map(|p| tracker.track(&prev_pyr, &curr_pyr, p))
        .collect();

    trace!(
        input = points.len(),
        tracked = tracked.iter().filter(|t| t.status.is_tracked()).count(),
        "Optical flow"
    );
    tracked
}

struct PatchTracker<'a> {
    config: &'a OpticalFlowConfig,
    half: isize,
}

/// Template samples at one pyramid level.
struct Template {
    values: Vec<f32>,
    grad_x: Vec<f32>,
    grad_y: Vec<f32>,
    g_inv: Matrix2<f32>,
}

impl<'a> PatchTracker<'a> {
    fn new(config: &'a OpticalFlowConfig) -> Self {
        Self {
            config,
            half: (config.window_size / 2) as isize,
        }
    }

    fn offsets(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        (-self.half..=self.half)
            .flat_map(move |dy| (-self.half..=self.half).map(move |dx| (dx as f32, dy as f32)))
    }

    fn track(&self, prev: &ImagePyramid, curr: &ImagePyramid, p: &FeaturePoint) -> TrackedPoint {
        let origin = Vector2::new(p.x as f32, p.y as f32);
        let lost = |status| TrackedPoint { point: *p, status };

        let base = &prev.levels[0];
        if !inside(base, origin) {
            return lost(TrackStatus::OutOfBounds);
        }

        let top = prev.num_levels().min(curr.num_levels()) - 1;
        let mut guess = Vector2::<f32>::zeros();

        for level in (0..=top).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let i_img = &prev.levels[level];
            let j_img = &curr.levels[level];
            let pt = origin * scale;

            let Some(template) = self.template(i_img, pt) else {
                if level == 0 {
                    return lost(TrackStatus::Lost);
                }
                trace!(level, "Flat window, skipping level");
                guess *= 2.0;
                continue;
            };

            let mut flow = Vector2::<f32>::zeros();
            for _ in 0..self.config.max_iterations {
                let q = pt + guess + flow;
                if !inside(j_img, q) {
                    return lost(TrackStatus::OutOfBounds);
                }

                let mut b = Vector2::<f32>::zeros();
                for (k, (dx, dy)) in self.offsets().enumerate() {
                    let diff = template.values[k] - j_img.interpolate(q.x + dx, q.y + dy);
                    b.x += diff * template.grad_x[k];
                    b.y += diff * template.grad_y[k];
                }

                let delta = template.g_inv * b;
                flow += delta;
                if delta.norm() < self.config.epsilon {
                    break;
                }
            }

            guess = if level > 0 { (guess + flow) * 2.0 } else { guess + flow };
        }

        let end = origin + guess;
        let curr_base = &curr.levels[0];
        if !end.iter().all(|v| v.is_finite()) || !inside(curr_base, end) {
            return lost(TrackStatus::OutOfBounds);
        }

        let error = self.patch_error(base, origin, curr_base, end);
        let point = FeaturePoint::new(end.x as f64, end.y as f64);
        if error > self.config.max_patch_error {
            return TrackedPoint {
                point,
                status: TrackStatus::Lost,
            };
        }
        TrackedPoint {
            point,
            status: TrackStatus::Tracked,
        }
    }

    /// Sample the template and its gradient matrix, or `None` if the
    /// window is too flat to track.
    fn template(&self, img: &FloatImage, pt: Vector2<f32>) -> Option<Template> {
        let n = self.config.window_size.pow(2).max(1);
        let mut values = Vec::with_capacity(n);
        let mut grad_x = Vec::with_capacity(n);
        let mut grad_y = Vec::with_capacity(n);
        let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);

        for (dx, dy) in self.offsets() {
            let (x, y) = (pt.x + dx, pt.y + dy);
            let gx = 0.5 * (img.interpolate(x + 1.0, y) - img.interpolate(x - 1.0, y));
            let gy = 0.5 * (img.interpolate(x, y + 1.0) - img.interpolate(x, y - 1.0));
            values.push(img.interpolate(x, y));
            grad_x.push(gx);
            grad_y.push(gy);
            a += gx * gx;
            b += gx * gy;
            c += gy * gy;
        }

        let area = values.len() as f32;
        let min_eig = (0.5 * (a + c) - (0.25 * (a - c) * (a - c) + b * b).sqrt()) / area;
        if !(min_eig >= self.config.min_eigen_threshold) {
            return None;
        }

        let g_inv = Matrix2::new(a, b, b, c).try_inverse()?;
        Some(Template {
            values,
            grad_x,
            grad_y,
            g_inv,
        })
    }

    fn patch_error(&self, i_img: &FloatImage, p: Vector2<f32>, j_img: &FloatImage, q: Vector2<f32>) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for (dx, dy) in self.offsets() {
            sum += (i_img.interpolate(p.x + dx, p.y + dy) - j_img.interpolate(q.x + dx, q.y + dy)).abs();
            count += 1;
        }
        sum / count.max(1) as f32
    }
}

fn inside(img: &FloatImage, p: Vector2<f32>) -> bool {
    p.x >= 0.0 && p.y >= 0.0 && p.x <= (img.width() - 1) as f32 && p.y <= (img.height() - 1) as f32
}
