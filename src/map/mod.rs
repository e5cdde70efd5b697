//! Map storage and pose accumulation.

pub mod accumulator;
pub mod map_point;

pub use accumulator::{PoseAccumulator, PoseComposition};
pub use map_point::{MapPoint, MapPointId, PointMap};
