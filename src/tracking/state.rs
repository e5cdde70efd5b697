//! Tracking state machine.

use image::GrayImage;

use crate::tracking::FeaturePoint;

/// Per-session tracking state.
///
/// `Tracking` owns the only frame buffer that outlives a call: the previous
/// grayscale frame and the features found (or tracked) in it.
#[derive(Debug, Clone, Default)]
pub enum TrackingState {
    /// No frame seen yet.
    #[default]
    Uninitialized,
    Tracking {
        prev_frame: GrayImage,
        prev_points: Vec<FeaturePoint>,
    },
}

impl TrackingState {
    pub fn status(&self) -> TrackingStatus {
        match self {
            Self::Uninitialized => TrackingStatus::Uninitialized,
            Self::Tracking { .. } => TrackingStatus::Tracking,
        }
    }

    /// Features that the next frame will be tracked from.
    pub fn points(&self) -> &[FeaturePoint] {
        match self {
            Self::Uninitialized => &[],
            Self::Tracking { prev_points, .. } => prev_points,
        }
    }
}

/// Data-free view of [`TrackingState`] handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingStatus {
    #[default]
    Uninitialized,
    Tracking,
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Tracking => write!(f, "tracking"),
        }
    }
}
