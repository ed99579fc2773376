use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp the box to a `width` x `height` image and return integer pixel
    /// bounds `(x, y, w, h)`, or `None` if nothing is left inside the image.
    pub fn clamped_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).min(width as f32).ceil().max(0.0)) as u32;
        let y1 = ((self.y + self.height).min(height as f32).ceil().max(0.0)) as u32;
        let x1 = x1.min(width);
        let y1 = y1.min(height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Fixed-length face descriptor produced by a [`FeatureExtractor`](crate::extractor::FeatureExtractor).
///
/// Immutable once produced: the values are only exposed as a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another vector of the same length.
    ///
    /// Accumulates in `f64` so threshold comparisons near the boundary are not
    /// disturbed by `f32` rounding over thousands of dimensions.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Every enrolled identity and its stored vectors, ordered by identity.
pub type Gallery = BTreeMap<String, Vec<FeatureVector>>;

/// Advisory image-quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Variance of the Laplacian response; low values mean blur.
    pub sharpness: f64,
    /// Mean gray-scale intensity (0–255).
    pub brightness: f64,
    /// Standard deviation of gray-scale intensity.
    pub contrast: f64,
    pub is_live: bool,
}

/// Result of matching a probe vector against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub best_identity: Option<String>,
    /// Smallest Euclidean distance found, at full precision.
    pub best_distance: f64,
    pub accepted: bool,
    /// `max(0, 100 - best_distance / 5)`.
    pub confidence: f64,
    /// Threshold the decision was made against.
    pub threshold: f64,
}

/// Per-identity enrollment count, as reported by list operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub count: usize,
}
