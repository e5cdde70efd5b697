//! RGBA → 8-bit luma conversion.

use image::{GrayImage, Luma};

/// BT.601 luma weights, identical to the classic `RGBA2GRAY` conversion.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Convert a packed RGBA buffer (4 bytes per pixel, row-major) into a
/// single-channel intensity image of the same dimensions.
///
/// Alpha is ignored. The buffer length must be exactly `width * height * 4`;
/// anything else is a caller bug and panics.
pub fn rgba_to_gray(rgba: &[u8], width: u32, height: u32) -> GrayImage {
    let n_pixels = width as usize * height as usize;
    assert_eq!(
        rgba.len(),
        n_pixels * 4,
        "RGBA buffer of {} bytes does not match {}x{}",
        rgba.len(),
        width,
        height
    );

    let stride = width as usize * 4;
    GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * stride + x as usize * 4;
        Luma([luma(&rgba[i..i + 4])])
    })
}

#[inline]
fn luma(px: &[u8]) -> u8 {
    let y = LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
    y.round().clamp(0.0, 255.0) as u8
}
