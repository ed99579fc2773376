//! Nearest-neighbour decision against the gallery.

use crate::types::{FeatureVector, Gallery, MatchResult};
use thiserror::Error;

/// Accept threshold tuned for the HOG descriptor. Must be retuned whenever the
/// extractor or its geometry changes; it is not a universal value.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 180.0;

/// Confidence drops by one point per this many distance units.
const CONFIDENCE_DISTANCE_SCALE: f64 = 5.0;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("gallery is empty — no identities enrolled")]
    EmptyGallery,
    #[error("probe has {probe} dimensions, gallery vectors for '{identity}' have {stored}")]
    DimensionMismatch {
        identity: String,
        probe: usize,
        stored: usize,
    },
}

/// Strategy for comparing a probe vector against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &FeatureVector, gallery: &Gallery) -> Result<MatchResult, MatchError>;
}

/// Minimum-Euclidean-distance matcher with an exclusive accept threshold.
///
/// An identity's score is the distance to the closest of its stored vectors,
/// so a probe only has to resemble one past enrollment. Identities are
/// visited in lexicographic order and only a strictly smaller distance
/// replaces the current best; ties therefore go to the first identity.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f64,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &FeatureVector, gallery: &Gallery) -> Result<MatchResult, MatchError> {
        let mut best: Option<(&str, f64)> = None;

        for (identity, vectors) in gallery {
            if vectors.is_empty() {
                continue;
            }

            let mut min_distance = f64::INFINITY;
            let mut sum_distance = 0.0f64;
            for stored in vectors {
                if stored.len() != probe.len() {
                    return Err(MatchError::DimensionMismatch {
                        identity: identity.clone(),
                        probe: probe.len(),
                        stored: stored.len(),
                    });
                }
                let d = probe.euclidean_distance(stored);
                sum_distance += d;
                min_distance = min_distance.min(d);
            }

            tracing::debug!(
                identity = %identity,
                min_distance,
                mean_distance = sum_distance / vectors.len() as f64,
                "candidate distance"
            );

            if best.map_or(true, |(_, d)| min_distance < d) {
                best = Some((identity.as_str(), min_distance));
            }
        }

        let (identity, best_distance) = best.ok_or(MatchError::EmptyGallery)?;
        let accepted = best_distance < self.threshold;

        tracing::debug!(
            best = identity,
            best_distance,
            threshold = self.threshold,
            accepted,
            "match decision"
        );

        Ok(MatchResult {
            best_identity: Some(identity.to_string()),
            best_distance,
            accepted,
            confidence: confidence(best_distance),
            threshold: self.threshold,
        })
    }
}

/// Map a distance to a 0–100 confidence score.
pub fn confidence(distance: f64) -> f64 {
    (100.0 - distance / CONFIDENCE_DISTANCE_SCALE).max(0.0)
}
