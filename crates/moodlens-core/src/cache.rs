//! Local model artifact cache with download-on-miss.
//!
//! Artifacts live under a single directory. A file at the expected path is
//! trusted as-is; nothing checks size, digest or freshness.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default download timeout for model artifacts.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub const YUNET_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const YUNET_MODEL_URL: &str = "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx";
pub const CASCADE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";
pub const CASCADE_MODEL_URL: &str =
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin";
pub const FERPLUS_MODEL_FILE: &str = "emotion-ferplus-8.onnx";
pub const FERPLUS_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx";

#[derive(Error, Debug)]
pub enum ModelFetchError {
    #[error("failed to prepare cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("download of {name} from {url} failed: {reason}")]
    Request {
        name: String,
        url: String,
        reason: String,
    },
    #[error("download of {name} from {url} returned HTTP {status}")]
    Status {
        name: String,
        url: String,
        status: u16,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A model file identified by its cache file name and remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Human-readable name used in logs and errors.
    pub name: String,
    pub file_name: String,
    pub url: String,
}

impl ModelArtifact {
    pub fn new(name: &str, file_name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            file_name: file_name.to_string(),
            url: url.to_string(),
        }
    }
}

/// The three artifacts the pipeline needs.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub detector: ModelArtifact,
    pub cascade: ModelArtifact,
    pub classifier: ModelArtifact,
}

impl Default for ModelArtifacts {
    fn default() -> Self {
        Self {
            detector: ModelArtifact::new("YuNet face detector", YUNET_MODEL_FILE, YUNET_MODEL_URL),
            cascade: ModelArtifact::new("SeetaFace cascade", CASCADE_MODEL_FILE, CASCADE_MODEL_URL),
            classifier: ModelArtifact::new("FER+ emotion model", FERPLUS_MODEL_FILE, FERPLUS_MODEL_URL),
        }
    }
}

/// Source of artifact bytes on a cache miss.
pub trait ModelFetcher: Send + Sync {
    fn fetch(&self, artifact: &ModelArtifact) -> Result<Vec<u8>, ModelFetchError>;
}

/// Plain unauthenticated HTTP GET with a bounded timeout.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("moodlens/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ModelFetcher for HttpFetcher {
    fn fetch(&self, artifact: &ModelArtifact) -> Result<Vec<u8>, ModelFetchError> {
        let request_err = |e: reqwest::Error| ModelFetchError::Request {
            name: artifact.name.clone(),
            url: artifact.url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&artifact.url).send().map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModelFetchError::Status {
                name: artifact.name.clone(),
                url: artifact.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(request_err)?;
        Ok(body.to_vec())
    }
}

/// Directory of cached model files, filled on demand through a [`ModelFetcher`].
pub struct ModelCache {
    dir: PathBuf,
    fetcher: Box<dyn ModelFetcher>,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>, fetcher: impl ModelFetcher + 'static) -> Self {
        Self {
            dir: dir.into(),
            fetcher: Box::new(fetcher),
        }
    }

    /// Expected local path of an artifact, whether or not it exists yet.
    pub fn path_for(&self, artifact: &ModelArtifact) -> PathBuf {
        self.dir.join(&artifact.file_name)
    }

    /// Return the local path of `artifact`, downloading it first on a cache miss.
    ///
    /// The body is written to a `.part` sibling and renamed into place, so a
    /// failed or interrupted download never leaves a file at the final path.
    pub fn ensure(&self, artifact: &ModelArtifact) -> Result<PathBuf, ModelFetchError> {
        fs::create_dir_all(&self.dir).map_err(|source| ModelFetchError::CacheDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(artifact);
        if path.is_file() {
            tracing::debug!(name = %artifact.name, path = %path.display(), "model cache hit");
            return Ok(path);
        }

        tracing::info!(
            name = %artifact.name,
            url = %artifact.url,
            path = %path.display(),
            "downloading model"
        );
        let bytes = self.fetcher.fetch(artifact)?;

        let partial = path.with_extension("part");
        let write_err = |source| ModelFetchError::Write {
            path: partial.clone(),
            source,
        };
        let mut file = fs::File::create(&partial).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(&partial, &path).map_err(|source| {
            let _ = fs::remove_file(&partial);
            ModelFetchError::Write {
                path: path.clone(),
                source,
            }
        })?;

        tracing::info!(
            name = %artifact.name,
            bytes = bytes.len(),
            sha256 = %format!("{:x}", Sha256::digest(&bytes)),
            "model downloaded"
        );
        Ok(path)
    }
}
