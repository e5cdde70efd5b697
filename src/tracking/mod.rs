//! Front end: feature detection, optical-flow tracking and the per-frame
//! state machine.

pub mod detector;
pub mod optical_flow;
pub mod result;
pub mod state;
pub mod tracker;

pub use detector::{DetectorConfig, FeaturePoint, detect_features};
pub use optical_flow::{OpticalFlowConfig, TrackStatus, TrackedPoint, track_features};
pub use result::{FrameMetrics, FrameOutcome, FrameOutput};
pub use state::{TrackingState, TrackingStatus};
pub use tracker::Tracker;
