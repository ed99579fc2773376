//! Feature extraction from a cropped face region.
//!
//! Two descriptors are available. They produce vectors of different lengths
//! and different scales, so a deployment picks exactly one through
//! [`ExtractorKind`] and keeps it for the lifetime of its gallery.

use crate::types::FeatureVector;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// --- HOG geometry ---
const HOG_WINDOW: u32 = 128;
const HOG_CELL: usize = 8;
const HOG_BLOCK_CELLS: usize = 2;
const HOG_BLOCK_STRIDE_CELLS: usize = 1;
const HOG_BINS: usize = 9;
const HOG_L2HYS_CLIP: f32 = 0.2;

// --- Histogram geometry ---
const HISTOGRAM_PATCH: u32 = 100;
const HISTOGRAM_BINS: usize = 256;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("face region is empty")]
    EmptyRegion,
    #[error("descriptor has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Maps a face region to a fixed-length vector.
pub trait FeatureExtractor: Send + Sync {
    /// Short stable name, reported by health checks.
    fn name(&self) -> &'static str;

    /// Length of every vector this extractor produces.
    fn dimension(&self) -> usize;

    /// Extract a descriptor. Deterministic for a given region.
    fn extract(&self, face: &DynamicImage) -> Result<FeatureVector, ExtractorError>;
}

/// Deployment-wide extractor choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Hog,
    Histogram,
}

impl ExtractorKind {
    pub fn build(self) -> Box<dyn FeatureExtractor> {
        match self {
            ExtractorKind::Hog => Box::new(HogExtractor::default()),
            ExtractorKind::Histogram => Box::new(HistogramExtractor),
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorKind::Hog => f.write_str("hog"),
            ExtractorKind::Histogram => f.write_str("histogram"),
        }
    }
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hog" => Ok(ExtractorKind::Hog),
            "histogram" | "hist" => Ok(ExtractorKind::Histogram),
            other => Err(format!("unknown extractor '{other}' (expected 'hog' or 'histogram')")),
        }
    }
}

/// Histogram of oriented gradients over a fixed 128x128 gray patch.
///
/// 8x8-pixel cells, 2x2-cell blocks sliding one cell at a time, 9 unsigned
/// orientation bins over 0–180°, L2-Hys block normalization. With the
/// default geometry that is 15 x 15 blocks x 36 values = 8100 dimensions.
#[derive(Debug, Clone)]
pub struct HogExtractor {
    window: u32,
}

impl Default for HogExtractor {
    fn default() -> Self {
        Self { window: HOG_WINDOW }
    }
}

impl HogExtractor {
    fn cells_per_side(&self) -> usize {
        self.window as usize / HOG_CELL
    }

    fn blocks_per_side(&self) -> usize {
        (self.cells_per_side() - HOG_BLOCK_CELLS) / HOG_BLOCK_STRIDE_CELLS + 1
    }

    fn block_len() -> usize {
        HOG_BLOCK_CELLS * HOG_BLOCK_CELLS * HOG_BINS
    }

    /// Per-cell orientation histograms, row-major by cell.
    fn cell_histograms(&self, gray: &GrayImage) -> Vec<[f32; HOG_BINS]> {
        let size = self.window as usize;
        let cells = self.cells_per_side();
        let data = gray.as_raw();
        let px = |x: usize, y: usize| data[y * size + x] as f32;
        let bin_width = 180.0 / HOG_BINS as f32;

        let mut hists = vec![[0.0f32; HOG_BINS]; cells * cells];

        for y in 0..size {
            let up = y.saturating_sub(1);
            let down = (y + 1).min(size - 1);
            for x in 0..size {
                let left = x.saturating_sub(1);
                let right = (x + 1).min(size - 1);

                let gx = px(right, y) - px(left, y);
                let gy = px(x, down) - px(x, up);
                let magnitude = (gx * gx + gy * gy).sqrt();
                if magnitude == 0.0 {
                    continue;
                }

                let mut angle = gy.atan2(gx).to_degrees();
                if angle < 0.0 {
                    angle += 180.0;
                }
                if angle >= 180.0 {
                    angle -= 180.0;
                }

                // Bin centers sit at 10°, 30°, ... ; split between the two nearest.
                let pos = angle / bin_width - 0.5;
                let lower = pos.floor();
                let frac = pos - lower;
                let b0 = (lower as i32).rem_euclid(HOG_BINS as i32) as usize;
                let b1 = (b0 + 1) % HOG_BINS;

                let hist = &mut hists[(y / HOG_CELL) * cells + x / HOG_CELL];
                hist[b0] += magnitude * (1.0 - frac);
                hist[b1] += magnitude * frac;
            }
        }

        hists
    }
}

impl FeatureExtractor for HogExtractor {
    fn name(&self) -> &'static str {
        "hog"
    }

    fn dimension(&self) -> usize {
        let blocks = self.blocks_per_side();
        blocks * blocks * Self::block_len()
    }

    fn extract(&self, face: &DynamicImage) -> Result<FeatureVector, ExtractorError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ExtractorError::EmptyRegion);
        }

        let gray = face
            .resize_exact(self.window, self.window, FilterType::Triangle)
            .to_luma8();
        let hists = self.cell_histograms(&gray);
        let cells = self.cells_per_side();
        let blocks = self.blocks_per_side();

        let mut values = Vec::with_capacity(self.dimension());
        let mut block = Vec::with_capacity(Self::block_len());

        for by in 0..blocks {
            for bx in 0..blocks {
                block.clear();
                let cy0 = by * HOG_BLOCK_STRIDE_CELLS;
                let cx0 = bx * HOG_BLOCK_STRIDE_CELLS;
                for cy in cy0..cy0 + HOG_BLOCK_CELLS {
                    for cx in cx0..cx0 + HOG_BLOCK_CELLS {
                        block.extend_from_slice(&hists[cy * cells + cx]);
                    }
                }
                l2_hys(&mut block);
                values.extend_from_slice(&block);
            }
        }

        check_dimension(self.dimension(), values)
    }
}

/// L2 normalize, clip, renormalize.
fn l2_hys(block: &mut [f32]) {
    let eps = 1e-3 * block.len() as f32;
    l2_normalize(block, eps);
    for v in block.iter_mut() {
        *v = v.min(HOG_L2HYS_CLIP);
    }
    l2_normalize(block, 1e-3);
}

fn l2_normalize(values: &mut [f32], eps: f32) {
    let norm = (values.iter().map(|v| v * v).sum::<f32>() + eps * eps).sqrt();
    for v in values.iter_mut() {
        *v /= norm;
    }
}

/// 256-bin gray-level histogram of a 100x100 patch, scaled to unit L2 norm.
///
/// Much weaker than HOG; useful on hardware where gradient detail is
/// unreliable (heavy compression, very low resolution).
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramExtractor;

impl FeatureExtractor for HistogramExtractor {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn dimension(&self) -> usize {
        HISTOGRAM_BINS
    }

    fn extract(&self, face: &DynamicImage) -> Result<FeatureVector, ExtractorError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ExtractorError::EmptyRegion);
        }

        let gray = face
            .resize_exact(HISTOGRAM_PATCH, HISTOGRAM_PATCH, FilterType::Triangle)
            .to_luma8();

        let mut hist = vec![0.0f32; HISTOGRAM_BINS];
        for &p in gray.as_raw() {
            hist[p as usize] += 1.0;
        }

        let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in hist.iter_mut() {
                *v /= norm;
            }
        }

        check_dimension(HISTOGRAM_BINS, hist)
    }
}

fn check_dimension(expected: usize, values: Vec<f32>) -> Result<FeatureVector, ExtractorError> {
    if values.len() != expected {
        return Err(ExtractorError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(FeatureVector::new(values))
}
