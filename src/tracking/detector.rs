//! Shi–Tomasi corner detector ("good features to track").

use image::GrayImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A 2-D image location in pixels.
pub type FeaturePoint = Point2<f64>;

/// Detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Upper bound on returned corners. `0` means unbounded.
    pub max_corners: usize,
    /// Corners weaker than `quality_level * strongest` are discarded.
    pub quality_level: f64,
    /// Minimum Euclidean distance between returned corners, in pixels.
    pub min_distance: f64,
    /// Side of the window the structure tensor is summed over.
    pub block_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_corners: 300,
            quality_level: 0.01,
            min_distance: 10.0,
            block_size: 3,
        }
    }
}

struct Candidate {
    x: u32,
    y: u32,
    response: f32,
}

/// Detect up to `max_corners` corners, strongest first.
///
/// Never fails. A textureless image yields an empty set.
pub fn detect_features(gray: &GrayImage, config: &DetectorConfig) -> Vec<FeaturePoint> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let response = min_eigen_response(gray, config.block_size.max(1));
    let max_response = response.iter().copied().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        trace!("No corner response");
        return Vec::new();
    }
    let threshold = (config.quality_level * max_response as f64) as f32;

    let w = width as usize;
    let mut candidates = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let idx = y as usize * w + x as usize;
            let r = response[idx];
            if r <= 0.0 || r < threshold {
                continue;
            }
            let is_local_max = (-1isize..=1).all(|dy| {
                (-1isize..=1).all(|dx| {
                    let n = (idx as isize + dy * w as isize + dx) as usize;
                    response[n] <= r
                })
            });
            if is_local_max {
                candidates.push(Candidate { x, y, response: r });
            }
        }
    }

    // Stable sort keeps raster order among equal responses.
    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

    let corners = select_spaced(&candidates, width, height, config);
    trace!(
        candidates = candidates.len(),
        corners = corners.len(),
        "Corner detection"
    );
    corners
}

/// Greedy minimum-distance selection over a grid of `min_distance` cells.
fn select_spaced(
    candidates: &[Candidate],
    width: u32,
    height: u32,
    config: &DetectorConfig,
) -> Vec<FeaturePoint> {
    let limit = if config.max_corners == 0 {
        usize::MAX
    } else {
        config.max_corners
    };
    let min_dist = config.min_distance.max(0.0);

    if min_dist < 1.0 {
        return candidates
            .iter()
            .take(limit)
            .map(|c| FeaturePoint::new(c.x as f64, c.y as f64))
            .collect();
    }

    let cell = min_dist;
    let grid_w = (width as f64 / cell).ceil() as usize;
    let grid_h = (height as f64 / cell).ceil() as usize;
    let mut grid: Vec<Vec<FeaturePoint>> = vec![Vec::new(); grid_w * grid_h];
    let min_dist_sq = min_dist * min_dist;

    let mut corners = Vec::new();
    for c in candidates {
        if corners.len() >= limit {
            break;
        }
        let p = FeaturePoint::new(c.x as f64, c.y as f64);
        let gx = (p.x / cell) as usize;
        let gy = (p.y / cell) as usize;

        let too_close = (gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1)).any(|yy| {
            (gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1)).any(|xx| {
                grid[yy * grid_w + xx]
                    .iter()
                    .any(|q| (p - q).norm_squared() < min_dist_sq)
            })
        });
        if too_close {
            continue;
        }

        grid[gy * grid_w + gx].push(p);
        corners.push(p);
    }
    corners
}

/// Minimum eigenvalue of the gradient structure tensor at every pixel.
///
/// Gradients are 3x3 Sobel with replicated borders; the tensor is summed
/// over a `block_size` box.
fn min_eigen_response(gray: &GrayImage, block_size: usize) -> Vec<f32> {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as isize, height as isize);
    let px = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        gray.get_pixel(x, y)[0] as f32 / 255.0
    };

    let n = (w * h) as usize;
    let mut ixx = vec![0.0f32; n];
    let mut iyy = vec![0.0f32; n];
    let mut ixy = vec![0.0f32; n];
    for y in 0..h {
        for x in 0..w {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            let i = (y * w + x) as usize;
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }

    let lo = -((block_size as isize - 1) / 2);
    let hi = block_size as isize / 2;
    let mut response = vec![0.0f32; n];
    for y in 0..h {
        for x in 0..w {
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for by in lo..=hi {
                let yy = (y + by).clamp(0, h - 1);
                for bx in lo..=hi {
                    let xx = (x + bx).clamp(0, w - 1);
                    let i = (yy * w + xx) as usize;
                    a += ixx[i];
                    b += ixy[i];
                    c += iyy[i];
                }
            }
            let half_trace = 0.5 * (a + c);
            let root = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            response[(y * w + x) as usize] = (half_trace - root).max(0.0);
        }
    }
    response
}
