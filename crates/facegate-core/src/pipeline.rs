//! Enrollment and recognition pipeline.
//!
//! decode → gray → quality gate → equalize → locate exactly one face →
//! crop → extract → gallery store (enroll) or matcher (recognize).

use crate::detector::{locate_single, FaceLocator, LocatorPolicy};
use crate::error::PipelineError;
use crate::extractor::FeatureExtractor;
use crate::gallery::{canonical_identity, GalleryStore};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_DISTANCE_THRESHOLD};
use crate::preprocess::equalize_histogram;
use crate::quality;
use crate::types::{FeatureVector, IdentitySummary, MatchResult, QualityReport};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Request-independent pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelinePolicy {
    /// Fail requests whose image does not pass the quality gate instead of
    /// only reporting the metrics.
    pub reject_on_low_quality: bool,
    /// Histogram-equalize the gray image before face localization.
    pub equalize: bool,
    pub locator: LocatorPolicy,
    pub distance_threshold: f64,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            reject_on_low_quality: false,
            equalize: true,
            locator: LocatorPolicy::default(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

/// Result of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollOutcome {
    pub identity: String,
    /// Vectors now stored for the identity.
    pub count: usize,
    pub quality: QualityReport,
}

/// Result of a recognition attempt that reached the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizeOutcome {
    pub result: MatchResult,
    pub quality: QualityReport,
}

/// Decode an encoded image (PNG, JPEG, ...) into a raster.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?)
}

pub struct FacePipeline {
    locator: Box<dyn FaceLocator>,
    extractor: Box<dyn FeatureExtractor>,
    store: GalleryStore,
    matcher: EuclideanMatcher,
    policy: PipelinePolicy,
}

impl FacePipeline {
    /// Assemble a pipeline. Fails if the gallery already holds vectors of a
    /// different dimensionality than `extractor` produces.
    pub fn new(
        locator: Box<dyn FaceLocator>,
        extractor: Box<dyn FeatureExtractor>,
        store: GalleryStore,
        policy: PipelinePolicy,
    ) -> Result<Self, PipelineError> {
        if let Some(stored) = store.dimension()? {
            if stored != extractor.dimension() {
                return Err(PipelineError::DimensionMismatch {
                    expected: stored,
                    actual: extractor.dimension(),
                });
            }
        }

        tracing::info!(
            extractor = extractor.name(),
            dimension = extractor.dimension(),
            threshold = policy.distance_threshold,
            reject_on_low_quality = policy.reject_on_low_quality,
            "pipeline ready"
        );

        Ok(Self {
            locator,
            extractor,
            store,
            matcher: EuclideanMatcher::new(policy.distance_threshold),
            policy,
        })
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// Enroll one face image under `identity`.
    pub fn enroll(
        &mut self,
        identity: &str,
        image: &DynamicImage,
    ) -> Result<EnrollOutcome, PipelineError> {
        let identity = canonical_identity(identity)?;
        let (vector, quality) = self.probe(image)?;
        let count = self.store.enroll(&identity, &vector)?;

        Ok(EnrollOutcome {
            identity,
            count,
            quality,
        })
    }

    /// Match one face image against every enrolled identity.
    pub fn recognize(&mut self, image: &DynamicImage) -> Result<RecognizeOutcome, PipelineError> {
        let (vector, quality) = self.probe(image)?;
        let gallery = self.store.load_all()?;
        let result = self.matcher.compare(&vector, &gallery)?;

        tracing::info!(
            identity = ?result.best_identity,
            distance = result.best_distance,
            accepted = result.accepted,
            "recognition finished"
        );

        Ok(RecognizeOutcome { result, quality })
    }

    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, PipelineError> {
        Ok(self.store.list()?)
    }

    /// `Ok(false)` if the identity was not enrolled.
    pub fn remove_identity(&self, identity: &str) -> Result<bool, PipelineError> {
        Ok(self.store.delete(identity)?)
    }

    /// Quality-gate, locate, crop and extract a single face.
    fn probe(&mut self, image: &DynamicImage) -> Result<(FeatureVector, QualityReport), PipelineError> {
        let mut gray = image.to_luma8();
        let quality = quality::assess_gray(&gray);

        if self.policy.equalize {
            equalize_histogram(&mut gray);
        }

        let face = locate_single(self.locator.as_mut(), &gray, &self.policy.locator)?;
        tracing::debug!(
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            confidence = face.confidence,
            "face located"
        );

        if !quality.is_live {
            if self.policy.reject_on_low_quality {
                return Err(PipelineError::LowQuality(quality));
            }
            tracing::warn!(
                sharpness = quality.sharpness,
                brightness = quality.brightness,
                contrast = quality.contrast,
                "quality gate failed; continuing"
            );
        }

        let (x, y, w, h) = face
            .clamped_rect(image.width(), image.height())
            .ok_or(PipelineError::NoFaceFound)?;
        let region = image.crop_imm(x, y, w, h);
        let vector = self.extractor.extract(&region)?;

        Ok((vector, quality))
    }
}
