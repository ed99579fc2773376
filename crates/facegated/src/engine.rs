use crate::config::Config;
use facegate_core::detector::DetectorError;
use facegate_core::{
    decode_image, EnrollOutcome, FacePipeline, GalleryStore, IdentitySummary, PipelineError,
    RecognizeOutcome, ScrfdLocator, StoreError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot reported by health checks.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub extractor: &'static str,
    pub dimension: usize,
    pub identities: usize,
    pub threshold: f64,
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: String,
        image: Vec<u8>,
        reply: Reply<EnrollOutcome>,
    },
    Recognize {
        image: Vec<u8>,
        reply: Reply<RecognizeOutcome>,
    },
    List {
        reply: Reply<Vec<IdentitySummary>>,
    },
    Remove {
        identity: String,
        reply: Reply<bool>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode `image`, extract one face and append it to `identity`.
    pub async fn enroll(&self, identity: String, image: Vec<u8>) -> Result<EnrollOutcome, EngineError> {
        self.call(|reply| EngineRequest::Enroll { identity, image, reply }).await
    }

    /// Decode `image`, extract one face and match it against the gallery.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognizeOutcome, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.call(|reply| EngineRequest::List { reply }).await
    }

    pub async fn remove(&self, identity: String) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Remove { identity, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the detector model and opens the gallery synchronously so the
/// daemon fails fast at startup if either is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let locator = ScrfdLocator::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD locator loaded");

    let store = GalleryStore::open(&config.db_path)?;
    let pipeline = FacePipeline::new(
        Box::new(locator),
        config.extractor.build(),
        store,
        config.pipeline_policy(),
    )?;

    spawn_pipeline(pipeline)
}

/// Run an already assembled pipeline on the engine thread.
pub fn spawn_pipeline(mut pipeline: FacePipeline) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut pipeline, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn handle_request(pipeline: &mut FacePipeline, req: EngineRequest) {
    match req {
        EngineRequest::Enroll {
            identity,
            image,
            reply,
        } => {
            let result = decode_image(&image).and_then(|img| pipeline.enroll(&identity, &img));
            log_failure("enroll", &result);
            let _ = reply.send(result);
        }
        EngineRequest::Recognize { image, reply } => {
            let result = decode_image(&image).and_then(|img| pipeline.recognize(&img));
            log_failure("recognize", &result);
            let _ = reply.send(result);
        }
        EngineRequest::List { reply } => {
            let _ = reply.send(pipeline.list_identities());
        }
        EngineRequest::Remove { identity, reply } => {
            let result = pipeline.remove_identity(&identity);
            log_failure("remove", &result);
            let _ = reply.send(result);
        }
        EngineRequest::Status { reply } => {
            let result = pipeline.list_identities().map(|ids| EngineStatus {
                extractor: pipeline.extractor().name(),
                dimension: pipeline.extractor().dimension(),
                identities: ids.len(),
                threshold: pipeline.policy().distance_threshold,
            });
            let _ = reply.send(result);
        }
    }
}

fn log_failure<T>(operation: &str, result: &Result<T, PipelineError>) {
    match result {
        Err(e) if e.is_input_error() => tracing::info!(operation, error = %e, "request rejected"),
        Err(PipelineError::EmptyGallery) => tracing::info!(operation, "gallery is empty"),
        Err(e) => tracing::error!(operation, error = %e, "request failed"),
        Ok(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::detector::{DetectionParams, FaceLocator};
    use facegate_core::{BoundingBox, ExtractorKind, PipelinePolicy};
    use image::{DynamicImage, GrayImage, Luma};

    struct FullFrameLocator;

    impl FaceLocator for FullFrameLocator {
        fn locate(
            &mut self,
            gray: &GrayImage,
            _params: &DetectionParams,
        ) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: gray.width() as f32,
                height: gray.height() as f32,
                confidence: 0.9,
            }])
        }
    }

    fn engine() -> EngineHandle {
        let pipeline = FacePipeline::new(
            Box::new(FullFrameLocator),
            ExtractorKind::Hog.build(),
            GalleryStore::open_in_memory().unwrap(),
            PipelinePolicy::default(),
        )
        .unwrap();
        spawn_pipeline(pipeline).unwrap()
    }

    fn png(period: u32) -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, _| {
            Luma([if (x / period) % 2 == 0 { 30 } else { 220 }])
        }));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[tokio::test]
    async fn test_enroll_recognize_roundtrip() {
        let engine = engine();
        let enrolled = engine.enroll("alice".into(), png(4)).await.unwrap();
        assert_eq!(enrolled.count, 1);

        let outcome = engine.recognize(png(4)).await.unwrap();
        assert_eq!(outcome.result.best_identity.as_deref(), Some("alice"));
        assert!(outcome.result.accepted);

        let status = engine.status().await.unwrap();
        assert_eq!(status.extractor, "hog");
        assert_eq!(status.identities, 1);
        assert_eq!(status.threshold, 180.0);
    }

    #[tokio::test]
    async fn test_decode_error_surfaces() {
        let engine = engine();
        let err = engine.enroll("alice".into(), b"nope".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::Decode(_))));
        assert!(engine.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_gallery_and_remove() {
        let engine = engine();
        let err = engine.recognize(png(3)).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::EmptyGallery)));
        assert!(!engine.remove("ghost".into()).await.unwrap());
    }
}
