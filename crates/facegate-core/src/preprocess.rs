//! Gray-scale preprocessing applied before face localization.

use image::GrayImage;

/// Global histogram equalization, in place.
///
/// Builds the intensity CDF, then remaps each pixel so the output spreads
/// across 0–255. Single-intensity images are left unchanged.
pub fn equalize_histogram(gray: &mut GrayImage) {
    let total = gray.as_raw().len();
    if total == 0 {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in gray.as_raw() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    cdf[0] = hist[0];
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
    }

    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = total as f32 - cdf_min as f32;
    if denom <= 0.0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let scaled = (cdf[i].saturating_sub(cdf_min)) as f32 / denom * 255.0;
        *entry = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }

    #[test]
    fn test_equalize_stretches_low_contrast() {
        // All pixels between 100 and 110
        let mut gray = GrayImage::from_fn(16, 16, |x, y| Luma([100 + ((x + y * 16) % 11) as u8]));
        let before = stddev(gray.as_raw());
        equalize_histogram(&mut gray);
        let after = stddev(gray.as_raw());
        assert!(after > before, "equalization should increase contrast: {before} -> {after}");
        assert_eq!(gray.as_raw().iter().copied().max(), Some(255));
        assert_eq!(gray.as_raw().iter().copied().min(), Some(0));
    }

    #[test]
    fn test_equalize_uniform_unchanged() {
        let mut gray = GrayImage::from_pixel(8, 8, Luma([77]));
        equalize_histogram(&mut gray);
        assert!(gray.as_raw().iter().all(|&p| p == 77));
    }

    #[test]
    fn test_equalize_preserves_order() {
        let mut gray = GrayImage::from_fn(4, 1, |x, _| Luma([50 + x as u8 * 10]));
        equalize_histogram(&mut gray);
        let raw = gray.as_raw();
        assert!(raw.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_equalize_empty() {
        let mut gray = GrayImage::new(0, 0);
        equalize_histogram(&mut gray);
        assert!(gray.as_raw().is_empty());
    }
}
