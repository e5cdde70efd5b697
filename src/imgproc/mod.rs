//! Low-level image utilities shared by detection and tracking.

pub mod grayscale;
pub mod pyramid;

pub use grayscale::rgba_to_gray;
pub use pyramid::{FloatImage, ImagePyramid};
