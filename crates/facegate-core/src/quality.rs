//! Single-frame image quality heuristics.
//!
//! Scores focus (Laplacian variance), exposure (mean intensity) and contrast
//! (intensity standard deviation). The combined `is_live` flag is a coarse
//! proxy for "a real, well-lit face in front of the camera"; it is not an
//! anti-spoofing check.

use crate::types::QualityReport;
use image::{DynamicImage, GrayImage};

const MIN_SHARPNESS: f64 = 100.0;
const MIN_BRIGHTNESS: f64 = 40.0;
const MAX_BRIGHTNESS: f64 = 220.0;
const MIN_CONTRAST: f64 = 30.0;

/// Assess a decoded color image.
pub fn assess(image: &DynamicImage) -> QualityReport {
    assess_gray(&image.to_luma8())
}

/// Assess an already gray-scale image.
pub fn assess_gray(gray: &GrayImage) -> QualityReport {
    let (brightness, contrast) = mean_and_stddev(gray.as_raw());
    let sharpness = laplacian_variance(gray);

    QualityReport {
        sharpness,
        brightness,
        contrast,
        is_live: passes_gate(sharpness, brightness, contrast),
    }
}

/// All limits are strict.
fn passes_gate(sharpness: f64, brightness: f64, contrast: f64) -> bool {
    sharpness > MIN_SHARPNESS
        && brightness > MIN_BRIGHTNESS
        && brightness < MAX_BRIGHTNESS
        && contrast > MIN_CONTRAST
}

/// Population mean and standard deviation of pixel intensities.
fn mean_and_stddev(pixels: &[u8]) -> (f64, f64) {
    if pixels.is_empty() {
        return (0.0, 0.0);
    }

    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = pixels
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    (mean, variance.sqrt())
}

/// Variance of the 4-neighbour Laplacian `[0,1,0; 1,-4,1; 0,1,0]`.
///
/// Every pixel contributes; borders are mirrored without repeating the edge
/// pixel (reflect-101). Images smaller than 3x3 score 0.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let data = gray.as_raw();
    let at = |x: usize, y: usize| data[y * w + x] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 0..h {
        let up = reflect101(y as isize - 1, h);
        let down = reflect101(y as isize + 1, h);
        for x in 0..w {
            let left = reflect101(x as isize - 1, w);
            let right = reflect101(x as isize + 1, w);

            let response =
                at(x, up) + at(x, down) + at(left, y) + at(right, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn reflect101(i: isize, len: usize) -> usize {
    let last = len as isize - 1;
    if i < 0 {
        (-i) as usize
    } else if i > last {
        (2 * last - i) as usize
    } else {
        i as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, dark: u8, light: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([dark])
            } else {
                Luma([light])
            }
        })
    }

    #[test]
    fn test_uniform_image_is_flat() {
        let gray = GrayImage::from_pixel(64, 64, Luma([128]));
        let report = assess_gray(&gray);
        assert_eq!(report.sharpness, 0.0);
        assert!((report.brightness - 128.0).abs() < 1e-9);
        assert_eq!(report.contrast, 0.0);
        assert!(!report.is_live);
    }

    #[test]
    fn test_checkerboard_is_sharp_and_live() {
        let report = assess_gray(&checkerboard(64, 0, 255));
        // Every pixel responds with +/-1020.
        assert!((report.sharpness - 1020.0 * 1020.0).abs() < 1e-3);
        assert!((report.brightness - 127.5).abs() < 1e-9);
        assert!((report.contrast - 127.5).abs() < 1e-9);
        assert!(report.is_live);
    }

    #[test]
    fn test_dark_image_is_not_live() {
        let report = assess_gray(&checkerboard(64, 0, 40));
        assert!(report.sharpness > MIN_SHARPNESS);
        assert!((report.brightness - 20.0).abs() < 1e-9);
        assert!(!report.is_live);
    }

    #[test]
    fn test_overexposed_image_is_not_live() {
        let report = assess_gray(&checkerboard(64, 200, 255));
        assert!(report.brightness > MAX_BRIGHTNESS);
        assert!(!report.is_live);
    }

    #[test]
    fn test_low_contrast_alone_is_not_live() {
        let report = assess_gray(&checkerboard(64, 100, 150));
        assert!((report.sharpness - 40000.0).abs() < 1e-6);
        assert!((report.brightness - 125.0).abs() < 1e-9);
        assert!((report.contrast - 25.0).abs() < 1e-9);
        assert!(!report.is_live);
    }

    #[test]
    fn test_brightness_limits_are_exclusive() {
        let at_min = assess_gray(&checkerboard(64, 0, 80));
        assert_eq!(at_min.brightness, 40.0);
        assert!(at_min.sharpness > MIN_SHARPNESS && at_min.contrast > MIN_CONTRAST);
        assert!(!at_min.is_live);

        let at_max = assess_gray(&checkerboard(64, 185, 255));
        assert_eq!(at_max.brightness, 220.0);
        assert!(at_max.sharpness > MIN_SHARPNESS && at_max.contrast > MIN_CONTRAST);
        assert!(!at_max.is_live);

        assert!(assess_gray(&checkerboard(64, 1, 81)).is_live);
    }

    #[test]
    fn test_gate_limits() {
        assert!(passes_gate(100.5, 128.0, 60.0));
        assert!(!passes_gate(100.0, 128.0, 60.0));
        assert!(!passes_gate(500.0, 128.0, 30.0));
        assert!(passes_gate(500.0, 128.0, 30.5));
        assert!(!passes_gate(500.0, 40.0, 60.0));
        assert!(!passes_gate(500.0, 220.0, 60.0));
    }

    #[test]
    fn test_tiny_image_has_zero_sharpness() {
        let gray = GrayImage::from_pixel(2, 2, Luma([10]));
        assert_eq!(assess_gray(&gray).sharpness, 0.0);
    }

    #[test]
    fn test_empty_image() {
        let gray = GrayImage::new(0, 0);
        let report = assess_gray(&gray);
        assert_eq!(report.brightness, 0.0);
        assert!(!report.is_live);
    }

    #[test]
    fn test_assess_color_image() {
        let gray = checkerboard(32, 0, 255);
        let color = DynamicImage::ImageLuma8(gray).to_rgb8();
        let report = assess(&DynamicImage::ImageRgb8(color));
        assert!(report.is_live);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
    }
}
