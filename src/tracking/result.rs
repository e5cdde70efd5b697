//! Per-frame results and diagnostics.
//!
//! These types describe what happened while processing a single frame:
//! - the accumulated pose and a view of the map
//! - which branch of the state machine ran
//! - feature, inlier and point counts plus timing

use crate::geometry::SE3;
use crate::map::MapPoint;
use crate::tracking::TrackingStatus;

/// Which branch of the per-frame state machine ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// First frame: features detected, pose stays at identity.
    Initialized,
    /// Too few points survived tracking; features re-detected, pose unchanged.
    Redetected,
    /// Motion estimation failed or had too few inliers; pose unchanged.
    MotionRejected,
    /// Pose composed and new points appended to the map.
    Updated,
}

impl FrameOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Redetected => "redetected",
            Self::MotionRejected => "motion_rejected",
            Self::Updated => "updated",
        }
    }
}

/// Scalar metrics for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetrics {
    /// Features carried into the next frame.
    pub n_features: usize,
    /// Correspondences that survived optical flow.
    pub n_tracked: usize,
    pub n_inliers: usize,
    pub n_new_points: usize,
    /// Triangulated points rejected as being at infinity.
    pub n_dropped_points: usize,
    pub elapsed_ms: f64,
}

/// Result of [`crate::SlamSystem::process_frame`].
///
/// `map` borrows the system, so it cannot outlive the next call.
#[derive(Debug, Clone)]
pub struct FrameOutput<'a> {
    pub frame_index: u64,
    /// World-to-camera pose of the current frame.
    pub pose: SE3,
    /// All map points accumulated so far.
    pub map: &'a [MapPoint],
    pub state: TrackingStatus,
    pub outcome: FrameOutcome,
    pub metrics: FrameMetrics,
}
