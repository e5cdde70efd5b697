use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slam_lite::config::SlamConfig;
use slam_lite::io::{MonoSequence, TrajectoryWriter, write_map_points};
use slam_lite::system::SlamSystem;
use slam_lite::tracking::FrameOutcome;

const USAGE: &str = "usage: slam-lite <sequence_dir> [config.yaml] [output_dir]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slam_lite=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(sequence_dir) = args.next() else {
        bail!(USAGE);
    };
    let mut config = match args.next() {
        Some(path) => SlamConfig::from_yaml_file(&path)?,
        None => SlamConfig::default(),
    };
    let output_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let sequence = MonoSequence::open(&sequence_dir)?;
    let downscale = config.input.downscale;
    if config.camera.is_none() {
        config.camera = sequence.camera_at(downscale);
    }
    info!(
        path = %sequence_dir,
        frames = sequence.len(),
        downscale,
        calibrated = config.camera.is_some(),
        "Loaded sequence"
    );

    let mut slam = SlamSystem::new(config)?;
    let mut trajectory = TrajectoryWriter::create(output_dir.join("trajectory.csv"))?;

    let mut n_updated = 0usize;
    let mut n_redetected = 0usize;
    let mut n_rejected = 0usize;
    let mut total_ms = 0.0;

    for (idx, entry) in sequence.entries.iter().enumerate() {
        let frame = match sequence.frame(idx, downscale) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping frame {}: {:#}", idx, e);
                continue;
            }
        };

        let out = slam.process_image(&frame)?;
        trajectory.write(entry.timestamp_ns, out.frame_index, out.outcome, &out.pose)?;

        match out.outcome {
            FrameOutcome::Updated => n_updated += 1,
            FrameOutcome::Redetected => n_redetected += 1,
            FrameOutcome::MotionRejected => n_rejected += 1,
            FrameOutcome::Initialized => {}
        }
        total_ms += out.metrics.elapsed_ms;

        if idx % 50 == 0 {
            let c = out.pose.camera_center();
            info!(
                frame = idx,
                state = %out.state,
                outcome = out.outcome.as_str(),
                tracked = out.metrics.n_tracked,
                inliers = out.metrics.n_inliers,
                map_points = out.map.len(),
                "Camera at [{:.3}, {:.3}, {:.3}]",
                c.x,
                c.y,
                c.z
            );
        }
    }

    trajectory.finish()?;
    write_map_points(output_dir.join("map_points.csv"), slam.map_points())?;

    if let Some(cam) = slam.camera() {
        info!(fx = cam.fx, fy = cam.fy, cx = cam.cx, cy = cam.cy, "Intrinsics used");
    }
    let processed = slam.frames_processed();
    info!(
        frames = processed,
        updated = n_updated,
        redetected = n_redetected,
        rejected = n_rejected,
        map_points = slam.map_points().len(),
        mean_ms = if processed > 0 { total_ms / processed as f64 } else { 0.0 },
        "Finished; results written to {}",
        output_dir.display()
    );
    Ok(())
}
