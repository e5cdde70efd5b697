//! Session orchestration.
//!
//! `SlamSystem` owns the tracker and enforces the per-session frame
//! contract (fixed, non-zero frame size).

mod slam_system;

pub use slam_system::SlamSystem;
