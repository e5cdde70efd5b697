//! Monocular visual odometry: sparse optical-flow tracking, two-view motion
//! estimation and an incrementally grown point cloud.

pub mod config;
pub mod geometry;
pub mod imgproc;
pub mod io;
pub mod map;
pub mod system;
pub mod tracking;

#[cfg(test)]
mod test_helpers;

pub use config::SlamConfig;
pub use geometry::{CameraIntrinsics, SE3};
pub use map::{MapPoint, PoseComposition};
pub use system::SlamSystem;
pub use tracking::{FrameMetrics, FrameOutcome, FrameOutput, TrackingStatus};
