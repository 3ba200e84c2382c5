//! Raw buffer conversion to RGB and dark-frame detection.

use image::RgbImage;

/// A captured full-resolution RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let n = (self.image.width() * self.image.height()) as usize;
        if n == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0)).sum::<f32>() / n as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// BT.601 luma of an RGB pixel.
fn luma([r, g, b]: [u8; 3]) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Convert packed YUYV 4:2:2 to RGB (BT.601, limited range).
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = grey[(y * width + x) as usize];
        image::Rgb([v, v, v])
    }))
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

/// Whether more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let n = (image.width() * image.height()) as usize;
    if n == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p.0) < 32.0).count();
    (dark as f32 / n as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_grey() {
        // Y=126, U=V=128 → mid grey on both pixels.
        let img = yuyv_to_rgb(&[126, 128, 126, 128], 2, 1).unwrap();
        assert_eq!(img.dimensions(), (2, 1));
        let p = img.get_pixel(1, 0).0;
        assert!(p.iter().all(|&c| (127..=129).contains(&c)), "{p:?}");
    }

    #[test]
    fn test_yuyv_black_and_white_clamp() {
        let img = yuyv_to_rgb(&[0, 128, 255, 128], 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant_with_high_v() {
        let img = yuyv_to_rgb(&[82, 90, 82, 240], 2, 1).unwrap();
        let [r, g, b] = img.get_pixel(0, 0).0;
        assert!(r > 200 && g < 60 && b < 60, "{:?}", [r, g, b]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let img = grey_to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(img.get_pixel(1, 0).0, [200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_detection() {
        let black = RgbImage::new(10, 10);
        assert!(is_dark_frame(&black, 0.95));

        let lit = RgbImage::from_pixel(10, 10, image::Rgb([128, 128, 128]));
        assert!(!is_dark_frame(&lit, 0.95));

        // 94% dark, 6% bright → not dark.
        let mut mixed = RgbImage::new(10, 10);
        for i in 0..6 {
            mixed.put_pixel(i, 0, image::Rgb([200, 200, 200]));
        }
        assert!(!is_dark_frame(&mixed, 0.95));

        assert!(is_dark_frame(&RgbImage::new(0, 0), 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            image: RgbImage::from_pixel(4, 4, image::Rgb([100, 100, 100])),
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 100.0).abs() < 0.01);
    }
}
