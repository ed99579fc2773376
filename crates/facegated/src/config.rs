use facegate_core::{DetectionParams, ExtractorKind, LocatorPolicy, PipelinePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `FACEGATE_CONFIG`,
/// then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Descriptor used for every vector in the gallery.
    pub extractor: ExtractorKind,
    /// Euclidean distance below which a probe is accepted.
    pub distance_threshold: f64,
    /// Reject images failing the quality gate instead of only reporting it.
    pub reject_on_low_quality: bool,
    /// Histogram-equalize before face detection.
    pub equalize: bool,
    /// Retry with `fallback_detection` when the first pass finds no face.
    pub detection_fallback: bool,
    pub detection: DetectionParams,
    pub fallback_detection: DetectionParams,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facegate_core::default_model_dir(),
            db_path: facegate_core::default_gallery_path(),
            extractor: ExtractorKind::default(),
            distance_threshold: facegate_core::DEFAULT_DISTANCE_THRESHOLD,
            reject_on_low_quality: false,
            equalize: true,
            detection_fallback: true,
            detection: DetectionParams::PRIMARY,
            fallback_detection: DetectionParams::PERMISSIVE,
            system_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loading config file");
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `FACEGATE_*` overrides; `lookup` returns a variable's value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_EXTRACTOR") {
            match v.parse() {
                Ok(kind) => self.extractor = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring FACEGATE_EXTRACTOR"),
            }
        }
        if let Some(v) = lookup("FACEGATE_DISTANCE_THRESHOLD") {
            match v.trim().parse() {
                Ok(threshold) => self.distance_threshold = threshold,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring FACEGATE_DISTANCE_THRESHOLD"),
            }
        }
        if let Some(v) = flag_var(&lookup, "FACEGATE_REJECT_LOW_QUALITY") {
            self.reject_on_low_quality = v;
        }
        if let Some(v) = flag_var(&lookup, "FACEGATE_EQUALIZE") {
            self.equalize = v;
        }
        if let Some(v) = flag_var(&lookup, "FACEGATE_DETECTION_FALLBACK") {
            self.detection_fallback = v;
        }
        if let Some(v) = flag_var(&lookup, "FACEGATE_SYSTEM_BUS") {
            self.system_bus = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.distance_threshold.is_finite() && self.distance_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "distance_threshold must be a positive number, got {}",
                self.distance_threshold
            )));
        }
        for (name, params) in [
            ("detection", &self.detection),
            ("fallback_detection", &self.fallback_detection),
        ] {
            if !(params.confidence_threshold > 0.0 && params.confidence_threshold <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name}.confidence_threshold must be in (0, 1], got {}",
                    params.confidence_threshold
                )));
            }
            if params.min_face_size < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.min_face_size must not be negative, got {}",
                    params.min_face_size
                )));
            }
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facegate_core::SCRFD_MODEL_FILE)
    }

    pub fn pipeline_policy(&self) -> PipelinePolicy {
        PipelinePolicy {
            reject_on_low_quality: self.reject_on_low_quality,
            equalize: self.equalize,
            locator: LocatorPolicy {
                primary: self.detection,
                fallback: self.detection_fallback.then_some(self.fallback_detection),
            },
            distance_threshold: self.distance_threshold,
        }
    }
}

/// Any value other than "0" (or "false") turns a flag on.
fn flag_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|v| {
        let v = v.trim();
        v != "0" && !v.eq_ignore_ascii_case("false")
    })
}
