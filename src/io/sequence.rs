//! Recorded monocular sequences and result export.
//!
//! Sequences follow the EuRoC layout for a single camera:
//!
//! ```text
//! <root>/cam0/data.csv      #timestamp [ns],filename
//! <root>/cam0/data/*.png
//! <root>/cam0/sensor.yaml   optional, `intrinsics: [fx, fy, cx, cy]`
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, Writer};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{CameraIntrinsics, SE3};
use crate::map::MapPoint;
use crate::tracking::FrameOutcome;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub timestamp_ns: u64,
    pub filename: String,
}

#[derive(Debug)]
pub struct MonoSequence {
    root: PathBuf,
    pub entries: Vec<ImageEntry>,
    /// Calibration at native resolution, if the sequence ships one.
    pub camera: Option<CameraIntrinsics>,
}

impl MonoSequence {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = load_image_list(&root.join("cam0/data.csv"))?;
        if entries.is_empty() {
            bail!("No frames listed in {}", root.join("cam0/data.csv").display());
        }

        let sensor_yaml = root.join("cam0/sensor.yaml");
        let camera = if sensor_yaml.exists() {
            Some(load_intrinsics(&sensor_yaml)?)
        } else {
            debug!("No sensor.yaml, intrinsics will be approximated");
            None
        };

        Ok(Self {
            root,
            entries,
            camera,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn frame_timestamp(&self, idx: usize) -> Option<u64> {
        self.entries.get(idx).map(|e| e.timestamp_ns)
    }

    /// Decode frame `idx` as RGBA, shrunk by an integer `downscale` factor.
    pub fn frame(&self, idx: usize, downscale: u32) -> Result<RgbaImage> {
        let entry = self
            .entries
            .get(idx)
            .with_context(|| format!("No frame at index {}", idx))?;
        let path = self.root.join("cam0/data").join(&entry.filename);

        let rgba = image::open(&path)
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .to_rgba8();
        Ok(downscale_image(rgba, downscale))
    }

    /// Intrinsics matching frames returned by [`Self::frame`] with the same factor.
    pub fn camera_at(&self, downscale: u32) -> Option<CameraIntrinsics> {
        let s = downscale.max(1) as f64;
        self.camera
            .map(|c| CameraIntrinsics::new(c.fx / s, c.fy / s, c.cx / s, c.cy / s))
    }
}

/// Shrink by an integer factor. Factors of 0 and 1 return the input.
pub fn downscale_image(rgba: RgbaImage, factor: u32) -> RgbaImage {
    if factor <= 1 {
        return rgba;
    }
    let (w, h) = rgba.dimensions();
    let (nw, nh) = ((w / factor).max(1), (h / factor).max(1));
    imageops::resize(&rgba, nw, nh, FilterType::Triangle)
}

fn load_image_list(csv_path: &Path) -> Result<Vec<ImageEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let ts: u64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("Bad timestamp {:?} in {}", &rec[0], csv_path.display()))?;
        entries.push(ImageEntry {
            timestamp_ns: ts,
            filename: rec[1].trim().to_string(),
        });
    }
    Ok(entries)
}

/// EuRoC camera sensor.yaml, intrinsics only.
#[derive(Debug, Deserialize)]
struct SensorYaml {
    /// [fx, fy, cx, cy]
    intrinsics: Vec<f64>,
}

fn load_intrinsics(path: &Path) -> Result<CameraIntrinsics> {
    let sensor: SensorYaml = serde_yaml::from_reader(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    )
    .with_context(|| format!("Failed to parse {}", path.display()))?;

    match sensor.intrinsics.as_slice() {
        &[fx, fy, cx, cy] => Ok(CameraIntrinsics::new(fx, fy, cx, cy)),
        other => bail!(
            "Expected 4 intrinsics [fx, fy, cx, cy], got {}",
            other.len()
        ),
    }
}

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    timestamp_ns: u64,
    frame: u64,
    outcome: &'static str,
    /// Camera centre in world coordinates.
    x: f64,
    y: f64,
    z: f64,
    /// World-to-camera rotation.
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

/// Streams one CSV row per processed frame.
pub struct TrajectoryWriter {
    writer: Writer<File>,
}

impl TrajectoryWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let writer = Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, timestamp_ns: u64, frame: u64, outcome: FrameOutcome, pose: &SE3) -> Result<()> {
        let c = pose.camera_center();
        let q = pose.rotation.quaternion();
        self.writer.serialize(TrajectoryRow {
            timestamp_ns,
            frame,
            outcome: outcome.as_str(),
            x: c.x,
            y: c.y,
            z: c.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
        })?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MapPointRow {
    id: u64,
    frame: u64,
    x: f64,
    y: f64,
    z: f64,
}

pub fn write_map_points<P: AsRef<Path>>(path: P, points: &[MapPoint]) -> Result<()> {
    let path = path.as_ref();
    let mut writer =
        Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut skipped = 0usize;
    for p in points {
        if !p.position.iter().all(|v| v.is_finite()) {
            skipped += 1;
            continue;
        }
        writer.serialize(MapPointRow {
            id: p.id.0,
            frame: p.frame_index,
            x: p.position.x,
            y: p.position.y,
            z: p.position.z,
        })?;
    }
    writer.flush()?;
    if skipped > 0 {
        warn!(skipped, "Skipped non-finite map points");
    }
    Ok(())
}
