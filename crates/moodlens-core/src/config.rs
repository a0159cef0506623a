use crate::cache::{
    ModelArtifact, ModelArtifacts, CASCADE_MODEL_FILE, CASCADE_MODEL_URL, DEFAULT_FETCH_TIMEOUT,
    FERPLUS_MODEL_FILE, FERPLUS_MODEL_URL, YUNET_MODEL_FILE, YUNET_MODEL_URL,
};
use crate::detector::{DetectorParams, DEFAULT_NMS_THRESHOLD, DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_K};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upload cap applied before decoding (5 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Pipeline configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding cached model files.
    pub model_dir: PathBuf,
    /// Timeout in seconds for a single model download.
    pub fetch_timeout_secs: u64,
    /// Remote location of the YuNet detector.
    pub detector_url: String,
    /// Remote location of the SeetaFace cascade.
    pub cascade_url: String,
    /// Remote location of the FER+ classifier.
    pub classifier_url: String,
    /// Minimum YuNet score for a candidate face.
    pub score_threshold: f32,
    /// IoU above which YuNet candidates are suppressed.
    pub nms_threshold: f32,
    /// Maximum YuNet candidates kept after NMS.
    pub top_k: usize,
    /// Larger submissions are rejected without decoding.
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            detector_url: YUNET_MODEL_URL.to_string(),
            cascade_url: CASCADE_MODEL_URL.to_string(),
            classifier_url: FERPLUS_MODEL_URL.to_string(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from `MOODLENS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            model_dir: get("MOODLENS_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            fetch_timeout_secs: parsed(get("MOODLENS_FETCH_TIMEOUT_SECS"))
                .unwrap_or(defaults.fetch_timeout_secs),
            detector_url: get("MOODLENS_DETECTOR_URL").unwrap_or(defaults.detector_url),
            cascade_url: get("MOODLENS_CASCADE_URL").unwrap_or(defaults.cascade_url),
            classifier_url: get("MOODLENS_CLASSIFIER_URL").unwrap_or(defaults.classifier_url),
            score_threshold: parsed(get("MOODLENS_SCORE_THRESHOLD")).unwrap_or(defaults.score_threshold),
            nms_threshold: parsed(get("MOODLENS_NMS_THRESHOLD")).unwrap_or(defaults.nms_threshold),
            top_k: parsed(get("MOODLENS_TOP_K")).unwrap_or(defaults.top_k),
            max_image_bytes: parsed(get("MOODLENS_MAX_IMAGE_BYTES")).unwrap_or(defaults.max_image_bytes),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn artifacts(&self) -> ModelArtifacts {
        let defaults = ModelArtifacts::default();
        ModelArtifacts {
            detector: ModelArtifact {
                url: self.detector_url.clone(),
                ..defaults.detector
            },
            cascade: ModelArtifact {
                url: self.cascade_url.clone(),
                ..defaults.cascade
            },
            classifier: ModelArtifact {
                url: self.classifier_url.clone(),
                ..defaults.classifier
            },
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            top_k: self.top_k,
        }
    }

    /// Path to the YuNet detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(YUNET_MODEL_FILE)
    }

    /// Path to the SeetaFace cascade model.
    pub fn cascade_model_path(&self) -> PathBuf {
        self.model_dir.join(CASCADE_MODEL_FILE)
    }

    /// Path to the FER+ classification model.
    pub fn classifier_model_path(&self) -> PathBuf {
        self.model_dir.join(FERPLUS_MODEL_FILE)
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// `$XDG_CACHE_HOME/moodlens/models`, else `$HOME/.cache/moodlens/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".cache")
        })
        .join("moodlens")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::from_lookup(lookup(&[]));
        assert_eq!(c.fetch_timeout(), Duration::from_secs(60));
        assert_eq!(c.detector_params(), DetectorParams::default());
        assert_eq!(c.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(c.artifacts().classifier.url, FERPLUS_MODEL_URL);
        assert!(c.model_dir.ends_with("moodlens/models"));
    }

    #[test]
    fn test_overrides() {
        let c = Config::from_lookup(lookup(&[
            ("MOODLENS_MODEL_DIR", "/srv/models"),
            ("MOODLENS_FETCH_TIMEOUT_SECS", "5"),
            ("MOODLENS_SCORE_THRESHOLD", "0.75"),
            ("MOODLENS_TOP_K", "10"),
            ("MOODLENS_CLASSIFIER_URL", "http://mirror.local/ferplus.onnx"),
        ]));
        assert_eq!(c.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(c.fetch_timeout_secs, 5);
        assert!((c.score_threshold - 0.75).abs() < 1e-6);
        assert_eq!(c.top_k, 10);

        let artifacts = c.artifacts();
        assert_eq!(artifacts.classifier.url, "http://mirror.local/ferplus.onnx");
        assert_eq!(artifacts.classifier.file_name, FERPLUS_MODEL_FILE);
        assert_eq!(artifacts.detector.url, YUNET_MODEL_URL);
        assert_eq!(c.classifier_model_path(), PathBuf::from("/srv/models").join(FERPLUS_MODEL_FILE));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let c = Config::from_lookup(lookup(&[
            ("MOODLENS_FETCH_TIMEOUT_SECS", "soon"),
            ("MOODLENS_NMS_THRESHOLD", ""),
        ]));
        assert_eq!(c.fetch_timeout_secs, 60);
        assert!((c.nms_threshold - DEFAULT_NMS_THRESHOLD).abs() < 1e-6);
    }
}
