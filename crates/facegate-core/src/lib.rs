//! facegate-core — face enrollment and verification engine.
//!
//! Classical descriptors only: faces are located with SCRFD, described with
//! a histogram of oriented gradients, and matched by minimum Euclidean
//! distance against a per-identity sliding window of enrollments kept in
//! SQLite.

pub mod detector;
pub mod error;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod types;

pub use detector::{DetectionParams, FaceLocator, LocatorPolicy, ScrfdLocator};
pub use error::PipelineError;
pub use extractor::{ExtractorKind, FeatureExtractor, HistogramExtractor, HogExtractor};
pub use gallery::{GalleryStore, StoreError, GALLERY_WINDOW};
pub use matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_DISTANCE_THRESHOLD};
pub use pipeline::{decode_image, EnrollOutcome, FacePipeline, PipelinePolicy, RecognizeOutcome};
pub use types::{BoundingBox, FeatureVector, Gallery, IdentitySummary, MatchResult, QualityReport};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// Default directory for ONNX model files.
///
/// `$XDG_DATA_HOME/facegate/models`, falling back to
/// `$HOME/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Default gallery database path.
pub fn default_gallery_path() -> PathBuf {
    data_dir().join("gallery.db")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
