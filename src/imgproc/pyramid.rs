//! Floating-point image planes and Gaussian pyramids for optical flow.

use image::GrayImage;

/// Single-channel `f32` image with intensities normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Pixel lookup with coordinates clamped to the image border.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let xc = x.clamp(0, self.width as isize - 1) as usize;
        let yc = y.clamp(0, self.height as isize - 1) as usize;
        self.get(xc, yc)
    }

    /// Bilinear interpolation at a sub-pixel location (border replicated).
    #[inline]
    pub fn interpolate(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let ax = x - x0;
        let ay = y - y0;
        let (xi, yi) = (x0 as isize, y0 as isize);

        let p00 = self.get_clamped(xi, yi);
        let p10 = self.get_clamped(xi + 1, yi);
        let p01 = self.get_clamped(xi, yi + 1);
        let p11 = self.get_clamped(xi + 1, yi + 1);

        (1.0 - ay) * ((1.0 - ax) * p00 + ax * p10) + ay * ((1.0 - ax) * p01 + ax * p11)
    }

    /// Blur with the 5-tap binomial kernel and keep every second pixel.
    pub fn pyr_down(&self) -> Self {
        const K: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

        // Horizontal pass at full height, decimated width.
        let w2 = self.width.div_ceil(2);
        let h2 = self.height.div_ceil(2);
        let mut tmp = FloatImage::new(w2, self.height);
        for y in 0..self.height {
            for x2 in 0..w2 {
                let cx = (2 * x2) as isize;
                let mut acc = 0.0;
                for (k, w) in K.iter().enumerate() {
                    acc += w * self.get_clamped(cx + k as isize - 2, y as isize);
                }
                tmp.set(x2, y, acc);
            }
        }

        let mut out = FloatImage::new(w2, h2);
        for y2 in 0..h2 {
            let cy = (2 * y2) as isize;
            for x2 in 0..w2 {
                let mut acc = 0.0;
                for (k, w) in K.iter().enumerate() {
                    acc += w * tmp.get_clamped(x2 as isize, cy + k as isize - 2);
                }
                out.set(x2, y2, acc);
            }
        }
        out
    }
}

/// Coarse-to-fine image pyramid. Level 0 is full resolution.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    pub levels: Vec<FloatImage>,
}

impl ImagePyramid {
    /// Build levels `0..=max_level`, stopping early once a level would be
    /// smaller than `min_size` pixels on either side.
    pub fn build(gray: &GrayImage, max_level: usize, min_size: usize) -> Self {
        let mut levels = vec![FloatImage::from_gray(gray)];
        while levels.len() <= max_level {
            let last = &levels[levels.len() - 1];
            if last.width().div_ceil(2) < min_size || last.height().div_ceil(2) < min_size {
                break;
            }
            let next = last.pyr_down();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn test_interpolate_midpoint() {
        let mut gray = GrayImage::new(2, 2);
        gray.put_pixel(0, 0, Luma([0]));
        gray.put_pixel(1, 0, Luma([255]));
        gray.put_pixel(0, 1, Luma([0]));
        gray.put_pixel(1, 1, Luma([255]));
        let img = FloatImage::from_gray(&gray);

        assert_relative_eq!(img.interpolate(0.5, 0.5), 0.5, epsilon = 1e-6);
        assert_relative_eq!(img.interpolate(1.0, 0.0), 1.0, epsilon = 1e-6);
        // Outside the image the border is replicated.
        assert_relative_eq!(img.interpolate(5.0, -3.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pyr_down_preserves_constant_image() {
        let gray = GrayImage::from_pixel(17, 9, Luma([128]));
        let down = FloatImage::from_gray(&gray).pyr_down();

        assert_eq!((down.width(), down.height()), (9, 5));
        for y in 0..down.height() {
            for x in 0..down.width() {
                assert_relative_eq!(down.get(x, y), 128.0 / 255.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_pyramid_level_count() {
        let gray = GrayImage::new(320, 240);
        assert_eq!(ImagePyramid::build(&gray, 3, 21).num_levels(), 4);

        // 40x30 cannot be halved again without dropping below a 21px window.
        let small = GrayImage::new(80, 60);
        assert_eq!(ImagePyramid::build(&small, 3, 21).num_levels(), 2);
    }
}
