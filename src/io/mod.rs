//! Dataset input and result export for the offline driver.

pub mod sequence;

pub use sequence::{ImageEntry, MonoSequence, TrajectoryWriter, downscale_image, write_map_points};
