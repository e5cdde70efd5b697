//! Synthetic scenes shared by unit tests.
//!
//! Scenes are made of fronto-parallel squares. Under camera translation
//! without rotation a fronto-parallel square stays an axis-aligned square in
//! the image, so rendering it by exact pixel-area coverage gives images whose
//! corners move exactly as the projected geometry says.

use image::{Rgba, RgbaImage};
use nalgebra::Vector3;

use crate::geometry::{CameraIntrinsics, SE3};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

const BACKGROUND: f64 = 40.0;

/// A square facing the camera, in world coordinates.
#[derive(Debug, Clone)]
pub struct Square {
    pub center: Vector3<f64>,
    pub half_size: f64,
    pub intensity: f64,
}

pub fn camera() -> CameraIntrinsics {
    CameraIntrinsics::approximate(WIDTH, HEIGHT)
}

/// A 5x4 grid of squares at depths between 2 and 4, each 24 px wide in the
/// first view.
pub fn grid_scene() -> Vec<Square> {
    let cam = camera();
    let mut squares = Vec::new();
    for row in 0..4 {
        for col in 0..5 {
            let i = row * 5 + col;
            let z = 2.0 + ((i * 3 + row) % 5) as f64 * 0.5;
            let u = 56.3 + 56.0 * col as f64;
            let v = 36.6 + 56.0 * row as f64;
            squares.push(Square {
                center: Vector3::new((u - cam.cx) * z / cam.fx, (v - cam.cy) * z / cam.fy, z),
                half_size: 12.0 * z / cam.fx,
                intensity: 200.0 + (i % 3) as f64 * 15.0,
            });
        }
    }
    squares
}

/// Camera moved by `dx` along the world x axis (world-to-camera pose).
pub fn lateral_pose(dx: f64) -> SE3 {
    SE3::new(nalgebra::UnitQuaternion::identity(), Vector3::new(-dx, 0.0, 0.0))
}

/// Render `scene` seen from `pose`. Only valid for rotation-free poses.
pub fn render(scene: &[Square], cam: &CameraIntrinsics, pose: &SE3) -> RgbaImage {
    let (w, h) = (WIDTH as usize, HEIGHT as usize);
    let mut buf = vec![BACKGROUND; w * h];

    let mut visible: Vec<(Vector3<f64>, &Square)> = scene
        .iter()
        .map(|s| (pose.transform_point(&s.center), s))
        .filter(|(c, _)| c.z > 0.0)
        .collect();
    // Painter's order: far squares first.
    visible.sort_by(|a, b| b.0.z.total_cmp(&a.0.z));

    for (c, sq) in visible {
        let Some(center) = cam.project(&c) else {
            continue;
        };
        let hx = cam.fx * sq.half_size / c.z;
        let hy = cam.fy * sq.half_size / c.z;
        let (x0, x1) = (center.x - hx, center.x + hx);
        let (y0, y1) = (center.y - hy, center.y + hy);

        let px_lo = (x0.floor() as isize).max(0) as usize;
        let px_hi = ((x1.ceil() as isize).max(0) as usize).min(w - 1);
        let py_lo = (y0.floor() as isize).max(0) as usize;
        let py_hi = ((y1.ceil() as isize).max(0) as usize).min(h - 1);

        for py in py_lo..=py_hi {
            let cov_y = overlap(py as f64 - 0.5, py as f64 + 0.5, y0, y1);
            if cov_y <= 0.0 {
                continue;
            }
            for px in px_lo..=px_hi {
                let cov = cov_y * overlap(px as f64 - 0.5, px as f64 + 0.5, x0, x1);
                let v = &mut buf[py * w + px];
                *v = *v * (1.0 - cov) + sq.intensity * cov;
            }
        }
    }

    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let v = buf[y as usize * w + x as usize].round().clamp(0.0, 255.0) as u8;
        Rgba([v, v, v, 255])
    })
}

/// A frame with no texture at all.
pub fn uniform_frame(value: u8) -> RgbaImage {
    RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([value, value, value, 255]))
}

fn overlap(a0: f64, a1: f64, b0: f64, b1: f64) -> f64 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_is_deterministic_and_textured() {
        let scene = grid_scene();
        let a = render(&scene, &camera(), &SE3::identity());
        let b = render(&scene, &camera(), &SE3::identity());

        assert_eq!(a, b);
        assert_eq!(a.get_pixel(0, 0)[0], BACKGROUND as u8);
        // Centre of the first square.
        assert!(a.get_pixel(56, 37)[0] >= 200);
    }
}
