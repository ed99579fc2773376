use crate::engine::{EngineError, EngineHandle};
use facegate_core::{EnrollOutcome, IdentitySummary, PipelineError, RecognizeOutcome, GALLERY_WINDOW};
use serde_json::{json, Value};
use zbus::interface;

pub const BUS_NAME: &str = "org.facegate.Facegate1";
pub const OBJECT_PATH: &str = "/org/facegate/Facegate1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Facegate1
/// Object path: /org/facegate/Facegate1
pub struct FacegateService {
    engine: EngineHandle,
}

impl FacegateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facegate.Facegate1")]
impl FacegateService {
    /// Enroll one encoded image (PNG, JPEG, ...) under `identity`.
    async fn register(&self, identity: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(identity, bytes = image.len(), "register requested");
        let outcome = self
            .engine
            .enroll(identity.to_string(), image)
            .await
            .map_err(to_fdo)?;
        Ok(register_json(&outcome).to_string())
    }

    /// Match one encoded image against every enrolled identity.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        match self.engine.recognize(image).await {
            Ok(outcome) => Ok(recognize_json(&outcome).to_string()),
            Err(EngineError::Pipeline(PipelineError::EmptyGallery)) => {
                Ok(empty_gallery_json().to_string())
            }
            Err(e) => Err(to_fdo(e)),
        }
    }

    /// List enrolled identities with their stored vector counts.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self.engine.list().await.map_err(to_fdo)?;
        Ok(users_json(&users).to_string())
    }

    /// Remove an identity. Returns false if it was not enrolled.
    async fn delete_user(&self, identity: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity, "delete_user requested");
        self.engine
            .remove(identity.to_string())
            .await
            .map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn health(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(json!({
            "status": "ok",
            "service": "facegated",
            "version": env!("CARGO_PKG_VERSION"),
            "extractor": status.extractor,
            "dimension": status.dimension,
            "identities": status.identities,
            "threshold": status.threshold,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
        .to_string())
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match &err {
        EngineError::Pipeline(e) if e.is_input_error() => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

/// Two-decimal rounding for presentation only.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn register_json(outcome: &EnrollOutcome) -> Value {
    json!({
        "identity": outcome.identity,
        "encodings_count": outcome.count,
        "capacity": GALLERY_WINDOW,
        "liveness_metrics": outcome.quality,
    })
}

fn recognize_json(outcome: &RecognizeOutcome) -> Value {
    let r = &outcome.result;
    json!({
        "accepted": r.accepted,
        "identity": r.best_identity,
        "distance": round2(r.best_distance),
        "confidence": round2(r.confidence),
        "threshold": r.threshold,
        "liveness_metrics": outcome.quality,
    })
}

fn empty_gallery_json() -> Value {
    json!({
        "accepted": false,
        "identity": null,
        "reason": "no identities enrolled",
    })
}

fn users_json(users: &[IdentitySummary]) -> Value {
    let entries: Vec<Value> = users
        .iter()
        .map(|u| json!({ "identity": u.identity, "encodings_count": u.count }))
        .collect();
    json!({ "users": entries, "count": users.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{MatchResult, QualityReport};

    fn quality() -> QualityReport {
        QualityReport {
            sharpness: 512.25,
            brightness: 120.0,
            contrast: 45.5,
            is_live: true,
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(179.996), 180.0);
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_recognize_json_rounds_for_display_only() {
        let outcome = RecognizeOutcome {
            result: MatchResult {
                best_identity: Some("alice".into()),
                best_distance: 179.996,
                accepted: true,
                confidence: 64.0008,
                threshold: 180.0,
            },
            quality: quality(),
        };
        let v = recognize_json(&outcome);
        assert_eq!(v["accepted"], true);
        assert_eq!(v["identity"], "alice");
        assert_eq!(v["distance"], 180.0);
        assert_eq!(v["confidence"], 64.0);
        assert_eq!(v["liveness_metrics"]["is_live"], true);
        // The decision itself was made at full precision.
        assert!(outcome.result.best_distance < outcome.result.threshold);
    }

    #[test]
    fn test_register_json() {
        let v = register_json(&EnrollOutcome {
            identity: "bob".into(),
            count: 3,
            quality: quality(),
        });
        assert_eq!(v["identity"], "bob");
        assert_eq!(v["encodings_count"], 3);
        assert_eq!(v["capacity"], 5);
        assert_eq!(v["liveness_metrics"]["sharpness"], 512.25);
    }

    #[test]
    fn test_users_json() {
        let v = users_json(&[
            IdentitySummary { identity: "alice".into(), count: 5 },
            IdentitySummary { identity: "bob".into(), count: 1 },
        ]);
        assert_eq!(v["count"], 2);
        assert_eq!(v["users"][1]["identity"], "bob");
        assert_eq!(v["users"][0]["encodings_count"], 5);
    }

    #[test]
    fn test_empty_gallery_json() {
        let v = empty_gallery_json();
        assert_eq!(v["accepted"], false);
        assert!(v["identity"].is_null());
    }

    #[test]
    fn test_input_errors_map_to_invalid_args() {
        let err = to_fdo(EngineError::Pipeline(PipelineError::NoFaceFound));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));

        let err = to_fdo(EngineError::ChannelClosed);
        assert!(matches!(err, zbus::fdo::Error::Failed(_)));
    }
}
