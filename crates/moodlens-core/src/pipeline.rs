//! End-to-end analysis: bytes in, [`AnalysisResult`] out.
//!
//! decode → equalize → YuNet (cascade fallback) → largest-face crop →
//! CLAHE + 64×64 → FER+ → softmax → wellbeing.

use crate::cache::{HttpFetcher, ModelCache};
use crate::config::Config;
use crate::locator::{self, DetectionInput};
use crate::preprocess;
use crate::registry::{LoadedModels, ModelLoadError, ModelRegistry};
use crate::result::AnalysisResult;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult};
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("model unavailable: {0}")]
    Model(#[from] ModelLoadError),
    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Liveness payload. Independent of model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub fn health() -> HealthStatus {
    HealthStatus { status: "ok" }
}

/// Shared, thread-safe analyzer. One instance serves every request.
pub struct Analyzer {
    registry: ModelRegistry,
    max_image_bytes: usize,
}

impl Analyzer {
    /// Analyzer downloading models over HTTP into `config.model_dir` on first use.
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        let cache = ModelCache::new(config.model_dir.clone(), fetcher);
        let registry = ModelRegistry::new(cache, config.artifacts(), config.detector_params());

        tracing::debug!(
            model_dir = %config.model_dir.display(),
            max_image_bytes = config.max_image_bytes,
            "analyzer configured"
        );

        Ok(Self::with_registry(registry, config.max_image_bytes))
    }

    pub fn with_registry(registry: ModelRegistry, max_image_bytes: usize) -> Self {
        Self {
            registry,
            max_image_bytes,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Load every model now so the first request does not pay for it.
    pub fn warm_up(&self) -> Result<LoadedModels, PipelineError> {
        Ok(self.registry.warm_up()?)
    }

    /// Analyze one encoded image (JPEG, PNG, ...).
    ///
    /// Bad input, a missing face and classifier failures are reported inside
    /// the returned [`AnalysisResult`]. Detector problems only trigger the
    /// cascade fallback; `Err` means the classifier could not be fetched or
    /// loaded.
    pub fn analyze(&self, bytes: &[u8]) -> Result<AnalysisResult, PipelineError> {
        if bytes.len() > self.max_image_bytes {
            tracing::warn!(
                size = bytes.len(),
                limit = self.max_image_bytes,
                "rejecting oversized image"
            );
            return Ok(AnalysisResult::too_large());
        }

        let decoded = match decode_upright(bytes) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(error = %e, size = bytes.len(), "image decode failed");
                return Ok(AnalysisResult::invalid_image());
            }
        };
        let color = decoded.to_rgb8();
        tracing::debug!(width = color.width(), height = color.height(), "image decoded");

        let input = DetectionInput::new(&color);
        let primary = self.registry.detect_primary(&input);
        let Some(region) =
            locator::locate(&input, primary, || self.registry.detect_fallback(&input))
        else {
            tracing::info!("no face detected");
            return Ok(AnalysisResult::no_face());
        };

        let tensor = preprocess::preprocess(&region);
        let result = match self.registry.with_classifier(|model| model.classify(&tensor))? {
            Ok(scores) => AnalysisResult::from_scores(&scores),
            Err(e) => {
                tracing::error!(error = %e, "emotion classification failed");
                return Ok(AnalysisResult::classification_failed(e.to_string()));
            }
        };

        tracing::info!(
            dominant = result.dominant.as_deref().unwrap_or_default(),
            wellbeing = ?result.wellbeing,
            "analysis complete"
        );
        Ok(result)
    }
}

/// Decode an encoded image and apply its EXIF orientation, if any.
fn decode_upright(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}
