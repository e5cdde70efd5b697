//! Geometry: rigid poses, pinhole intrinsics, two-view motion and triangulation.

pub mod camera;
pub mod essential;
pub mod se3;
pub mod so3;
pub mod triangulation;

pub use camera::CameraIntrinsics;
pub use essential::{EssentialConfig, MotionEstimate, estimate_motion};
pub use se3::SE3;
pub use triangulation::{TriangulatedPoints, TriangulationConfig, triangulate_points};
