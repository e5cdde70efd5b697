//! SLAM System - main entry point.
//!
//! `SlamSystem` is the struct callers interact with: it validates the frame
//! contract, converts RGBA input to grayscale and drives the [`Tracker`].

use anyhow::{Result, bail};
use image::RgbaImage;
use tracing::info;

use crate::config::SlamConfig;
use crate::geometry::{CameraIntrinsics, SE3};
use crate::imgproc::rgba_to_gray;
use crate::map::MapPoint;
use crate::tracking::{FeaturePoint, FrameOutput, Tracker, TrackingStatus};

/// Monocular visual odometry session.
pub struct SlamSystem {
    config: SlamConfig,
    tracker: Tracker,
    /// Frame size fixed by the first frame of the session.
    dimensions: Option<(u32, u32)>,
    frames_processed: u64,
}

impl SlamSystem {
    pub fn new(config: SlamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tracker: Tracker::new(config.clone()),
            config,
            dimensions: None,
            frames_processed: 0,
        })
    }

    /// Process one packed RGBA frame and return the accumulated pose and map.
    ///
    /// Frame size must be non-zero and identical for the whole session.
    ///
    /// # Panics
    /// If `rgba.len() != width * height * 4`.
    pub fn process_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<FrameOutput<'_>> {
        if width == 0 || height == 0 {
            bail!("Frame dimensions must be positive, got {}x{}", width, height);
        }
        if let Some((w, h)) = self.dimensions {
            if (w, h) != (width, height) {
                bail!(
                    "Frame size changed from {}x{} to {}x{}; call reset() to start a new session",
                    w,
                    h,
                    width,
                    height
                );
            }
        }

        let gray = rgba_to_gray(rgba, width, height);
        if self.dimensions.is_none() {
            info!(width, height, "Session started");
            self.dimensions = Some((width, height));
        }

        let frame_index = self.frames_processed;
        self.frames_processed += 1;
        let (outcome, metrics) = self.tracker.process(gray, frame_index);

        Ok(FrameOutput {
            frame_index,
            pose: self.tracker.pose().clone(),
            map: self.tracker.map(),
            state: self.tracker.status(),
            outcome,
            metrics,
        })
    }

    pub fn process_image(&mut self, image: &RgbaImage) -> Result<FrameOutput<'_>> {
        self.process_frame(image.as_raw(), image.width(), image.height())
    }

    /// World-to-camera pose of the latest accepted frame.
    pub fn pose(&self) -> &SE3 {
        self.tracker.pose()
    }

    pub fn map_points(&self) -> &[MapPoint] {
        self.tracker.map()
    }

    pub fn state(&self) -> TrackingStatus {
        self.tracker.status()
    }

    /// Intrinsics in use; `None` until the first frame when none were configured.
    pub fn camera(&self) -> Option<&CameraIntrinsics> {
        self.tracker.camera()
    }

    /// Features the next frame will be tracked from, in pixel coordinates.
    pub fn tracked_features(&self) -> &[FeaturePoint] {
        self.tracker.features()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    /// Drop all session state. The next frame may have a different size.
    pub fn reset(&mut self) {
        info!(frames = self.frames_processed, points = self.map_points().len(), "Session reset");
        self.tracker = Tracker::new(self.config.clone());
        self.dimensions = None;
        self.frames_processed = 0;
    }
}
