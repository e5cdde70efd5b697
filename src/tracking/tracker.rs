//! Frame-to-frame tracker: the per-frame state machine.
//!
//! For each grayscale frame:
//! - first frame: detect features and remember the frame
//! - otherwise: track the previous features with optical flow
//! - too few survivors: re-detect and keep the pose
//! - enough survivors: estimate relative motion, triangulate the inliers,
//!   fold the motion into the pose and grow the map

use std::time::Instant;

use image::GrayImage;
use nalgebra::Point2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::config::SlamConfig;
use crate::geometry::{CameraIntrinsics, SE3, estimate_motion, triangulate_points};
use crate::map::{MapPoint, PoseAccumulator};
use crate::tracking::detector::detect_features;
use crate::tracking::optical_flow::track_features;
use crate::tracking::result::{FrameMetrics, FrameOutcome};
use crate::tracking::{FeaturePoint, TrackingState, TrackingStatus};

/// Owns every piece of session state except the frame-size contract.
pub struct Tracker {
    config: SlamConfig,
    /// Intrinsics in use, fixed on the first frame.
    camera: Option<CameraIntrinsics>,
    state: TrackingState,
    accumulator: PoseAccumulator,
    rng: StdRng,
}

impl Tracker {
    pub fn new(config: SlamConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.essential.seed);
        let accumulator = PoseAccumulator::new(config.pipeline.composition);
        Self {
            camera: config.camera,
            config,
            state: TrackingState::Uninitialized,
            accumulator,
            rng,
        }
    }

    pub fn pose(&self) -> &SE3 {
        self.accumulator.pose()
    }

    pub fn map(&self) -> &[MapPoint] {
        self.accumulator.map()
    }

    pub fn status(&self) -> TrackingStatus {
        self.state.status()
    }

    pub fn camera(&self) -> Option<&CameraIntrinsics> {
        self.camera.as_ref()
    }

    pub fn features(&self) -> &[FeaturePoint] {
        self.state.points()
    }

    /// Run the state machine on one frame. The frame becomes the new
    /// previous frame.
    pub fn process(&mut self, gray: GrayImage, frame_index: u64) -> (FrameOutcome, FrameMetrics) {
        let t_start = Instant::now();
        let (width, height) = gray.dimensions();
        let camera = *self
            .camera
            .get_or_insert_with(|| CameraIntrinsics::approximate(width, height));

        let (outcome, mut metrics) = match std::mem::take(&mut self.state) {
            TrackingState::Uninitialized => {
                let metrics = self.redetect(gray);
                info!(
                    frame = frame_index,
                    features = metrics.n_features,
                    composition = ?self.accumulator.composition(),
                    "Tracking initialized"
                );
                (FrameOutcome::Initialized, metrics)
            }
            TrackingState::Tracking {
                prev_frame,
                prev_points,
            } => {
                if prev_points.is_empty() {
                    debug!(frame = frame_index, "No features to track, re-detecting");
                    (FrameOutcome::Redetected, self.redetect(gray))
                } else {
                    self.track(&prev_frame, &prev_points, gray, &camera, frame_index)
                }
            }
        };

        metrics.elapsed_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        (outcome, metrics)
    }

    fn redetect(&mut self, gray: GrayImage) -> FrameMetrics {
        let points = detect_features(&gray, &self.config.detector);
        let metrics = FrameMetrics {
            n_features: points.len(),
            ..Default::default()
        };
        self.state = TrackingState::Tracking {
            prev_frame: gray,
            prev_points: points,
        };
        metrics
    }

    fn track(
        &mut self,
        prev_frame: &GrayImage,
        prev_points: &[FeaturePoint],
        gray: GrayImage,
        camera: &CameraIntrinsics,
        frame_index: u64,
    ) -> (FrameOutcome, FrameMetrics) {
        let tracked = track_features(prev_frame, &gray, prev_points, &self.config.optical_flow);
        debug_assert_eq!(tracked.len(), prev_points.len());

        let (good_prev, good_curr): (Vec<FeaturePoint>, Vec<FeaturePoint>) = prev_points
            .iter()
            .zip(&tracked)
            .filter(|(_, t)| t.status.is_tracked())
            .map(|(p, t)| (*p, t.point))
            .unzip();
        let n_tracked = good_curr.len();

        if n_tracked < self.config.pipeline.min_tracked {
            debug!(
                frame = frame_index,
                tracked = n_tracked,
                min = self.config.pipeline.min_tracked,
                "Too few tracked features, re-detecting"
            );
            let mut metrics = self.redetect(gray);
            metrics.n_tracked = n_tracked;
            return (FrameOutcome::Redetected, metrics);
        }

        let mut metrics = FrameMetrics {
            n_tracked,
            ..Default::default()
        };

        let estimate = estimate_motion(
            &good_prev,
            &good_curr,
            camera,
            &self.config.essential,
            &mut self.rng,
        );

        let outcome = match estimate {
            Some(est) if est.num_inliers >= self.config.pipeline.min_inliers => {
                metrics.n_inliers = est.num_inliers;

                let (in_prev, in_curr): (Vec<Point2<f64>>, Vec<Point2<f64>>) = good_prev
                    .iter()
                    .zip(&good_curr)
                    .zip(&est.inlier_mask)
                    .filter(|&(_, &inlier)| inlier)
                    .map(|((p, c), _)| (*p, *c))
                    .unzip();

                let p0 = camera.projection_matrix(&SE3::identity());
                let p1 = camera.projection_matrix(&est.relative);
                let triangulated =
                    triangulate_points(&p0, &p1, &in_prev, &in_curr, &self.config.triangulation);

                metrics.n_dropped_points = triangulated.num_dropped;
                metrics.n_new_points =
                    self.accumulator
                        .accumulate(&est.relative, &triangulated.points, frame_index);

                debug!(
                    frame = frame_index,
                    inliers = est.num_inliers,
                    new_points = metrics.n_new_points,
                    map_size = self.accumulator.map().len(),
                    "Pose updated"
                );
                FrameOutcome::Updated
            }
            Some(est) => {
                metrics.n_inliers = est.num_inliers;
                debug!(
                    frame = frame_index,
                    inliers = est.num_inliers,
                    min = self.config.pipeline.min_inliers,
                    "Motion estimate rejected: too few inliers"
                );
                FrameOutcome::MotionRejected
            }
            None => {
                debug!(frame = frame_index, tracked = n_tracked, "Motion estimation failed");
                FrameOutcome::MotionRejected
            }
        };

        metrics.n_features = good_curr.len();
        self.state = TrackingState::Tracking {
            prev_frame: gray,
            prev_points: good_curr,
        };
        (outcome, metrics)
    }
}
