use crate::detector::DetectorError;
use crate::extractor::ExtractorError;
use crate::gallery::StoreError;
use crate::matcher::MatchError;
use crate::types::QualityReport;
use thiserror::Error;

/// Everything an enroll or recognize request can fail with.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face found in image")]
    NoFaceFound,
    #[error("ambiguous image: {0} faces detected, exactly one required")]
    AmbiguousFaces(usize),
    #[error(
        "image quality too low (sharpness {:.1}, brightness {:.1}, contrast {:.1})",
        .0.sharpness, .0.brightness, .0.contrast
    )]
    LowQuality(QualityReport),
    #[error("feature extraction failed: {0}")]
    Extraction(#[from] ExtractorError),
    #[error("no identities enrolled")]
    EmptyGallery,
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("vector has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("face locator: {0}")]
    Locator(#[from] DetectorError),
    #[error("gallery storage: {0}")]
    Storage(StoreError),
}

impl PipelineError {
    /// Errors the caller can fix by sending a different request.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_)
                | PipelineError::NoFaceFound
                | PipelineError::AmbiguousFaces(_)
                | PipelineError::LowQuality(_)
                | PipelineError::Extraction(_)
                | PipelineError::InvalidIdentity(_)
        )
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidIdentity(msg) => PipelineError::InvalidIdentity(msg),
            StoreError::DimensionMismatch { expected, actual } => {
                PipelineError::DimensionMismatch { expected, actual }
            }
            other => PipelineError::Storage(other),
        }
    }
}

impl From<MatchError> for PipelineError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::EmptyGallery => PipelineError::EmptyGallery,
            MatchError::DimensionMismatch { probe, stored, .. } => PipelineError::DimensionMismatch {
                expected: stored,
                actual: probe,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_classified() {
        let err: PipelineError = StoreError::InvalidIdentity("empty".into()).into();
        assert!(err.is_input_error());

        let err: PipelineError = StoreError::LockPoisoned.into();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_empty_gallery_is_not_an_input_error() {
        let err: PipelineError = MatchError::EmptyGallery.into();
        assert!(matches!(err, PipelineError::EmptyGallery));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_low_quality_message() {
        let err = PipelineError::LowQuality(QualityReport {
            sharpness: 12.0,
            brightness: 30.0,
            contrast: 5.0,
            is_live: false,
        });
        assert_eq!(
            err.to_string(),
            "image quality too low (sharpness 12.0, brightness 30.0, contrast 5.0)"
        );
    }
}
