//! Runtime configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it
//! overrides:
//!
//! ```yaml
//! detector:
//!   max_corners: 500
//! pipeline:
//!   composition: legacy_additive
//! ```

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::geometry::{CameraIntrinsics, EssentialConfig, TriangulationConfig};
use crate::map::PoseComposition;
use crate::tracking::{DetectorConfig, OpticalFlowConfig};

/// State-machine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Below this many tracked points the frame is re-detected instead of
    /// used for motion estimation.
    pub min_tracked: usize,
    /// Motion estimates with fewer inliers are not applied.
    pub min_inliers: usize,
    pub composition: PoseComposition,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_tracked: 16,
            min_inliers: 12,
            composition: PoseComposition::Rigid,
        }
    }
}

/// How recorded frames are prepared before they reach the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Integer shrink factor applied to every decoded frame.
    pub downscale: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { downscale: 2 }
    }
}

/// Top-level configuration of a [`crate::SlamSystem`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    /// Fixed intrinsics. When absent they are approximated from the frame size.
    pub camera: Option<CameraIntrinsics>,
    pub detector: DetectorConfig,
    pub optical_flow: OpticalFlowConfig,
    pub essential: EssentialConfig,
    pub triangulation: TriangulationConfig,
    pub pipeline: PipelineConfig,
    pub input: InputConfig,
}

impl SlamConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the algorithms cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.optical_flow.window_size < 3 || self.optical_flow.window_size % 2 == 0 {
            bail!(
                "optical_flow.window_size must be odd and >= 3, got {}",
                self.optical_flow.window_size
            );
        }
        if !(0.0..1.0).contains(&self.essential.confidence) {
            bail!("essential.confidence must be in [0, 1), got {}", self.essential.confidence);
        }
        if self.essential.threshold_px <= 0.0 {
            bail!("essential.threshold_px must be positive");
        }
        if self.pipeline.min_tracked < crate::geometry::essential::MIN_CORRESPONDENCES {
            bail!(
                "pipeline.min_tracked must be at least {}",
                crate::geometry::essential::MIN_CORRESPONDENCES
            );
        }
        if self.input.downscale == 0 {
            bail!("input.downscale must be at least 1");
        }
        if let Some(cam) = &self.camera {
            if cam.fx <= 0.0 || cam.fy <= 0.0 {
                bail!("camera focal lengths must be positive");
            }
        }
        Ok(())
    }
}
