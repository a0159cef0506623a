//! Process-wide model handles, loaded lazily on first use.
//!
//! Each model sits in its own mutex-guarded slot. The first caller downloads
//! and loads it while holding the lock, so concurrent first requests trigger
//! a single load. A failed load leaves the slot empty and the next caller
//! retries. Calls into a model also run under its slot lock, which keeps the
//! detector's per-image input-size reconfiguration from racing.

use crate::cache::{ModelArtifacts, ModelCache, ModelFetchError};
use crate::cascade::{CascadeDetector, CascadeError};
use crate::classifier::{ClassifierError, EmotionClassifier, EmotionModel};
use crate::detector::{DetectorError, DetectorParams, FaceDetector};
use crate::locator::{Detection, DetectionInput, FaceFinder};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Failure to make a model available.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error(transparent)]
    Fetch(#[from] ModelFetchError),
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("cascade detector: {0}")]
    Cascade(#[from] CascadeError),
    #[error("emotion classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// A lazily initialized, mutex-guarded value.
pub(crate) struct LazySlot<T: ?Sized> {
    inner: Mutex<Option<Box<T>>>,
}

impl<T: ?Sized> LazySlot<T> {
    pub(crate) fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub(crate) fn filled(value: Box<T>) -> Self {
        Self {
            inner: Mutex::new(Some(value)),
        }
    }

    /// Run `f` on the value, initializing it with `init` first if needed.
    ///
    /// `init` and `f` both run under the slot lock.
    pub(crate) fn with<R, E>(
        &self,
        init: impl FnOnce() -> Result<Box<T>, E>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, E> {
        // A panic inside `f` must not brick the slot for the rest of the process.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match guard.take() {
            Some(value) => value,
            None => init()?,
        };
        let value = guard.insert(value);
        Ok(f(&mut **value))
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

type DetectorSlot = LazySlot<dyn FaceFinder + Send>;
type ClassifierSlot = LazySlot<dyn EmotionModel + Send>;

/// Which models are currently resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedModels {
    pub detector: bool,
    pub cascade: bool,
    pub classifier: bool,
}

/// Owner of the detector, cascade and classifier handles.
pub struct ModelRegistry {
    cache: ModelCache,
    artifacts: ModelArtifacts,
    params: DetectorParams,
    detector: DetectorSlot,
    cascade: DetectorSlot,
    classifier: ClassifierSlot,
}

impl ModelRegistry {
    /// Registry that loads models from `cache` on first use.
    pub fn new(cache: ModelCache, artifacts: ModelArtifacts, params: DetectorParams) -> Self {
        Self {
            cache,
            artifacts,
            params,
            detector: LazySlot::empty(),
            cascade: LazySlot::empty(),
            classifier: LazySlot::empty(),
        }
    }

    /// Registry with the detector and classifier already in place.
    ///
    /// The cascade is still loaded lazily from `cache` unless supplied.
    pub fn with_models(
        cache: ModelCache,
        detector: Box<dyn FaceFinder + Send>,
        cascade: Option<Box<dyn FaceFinder + Send>>,
        classifier: Box<dyn EmotionModel + Send>,
    ) -> Self {
        Self {
            cache,
            artifacts: ModelArtifacts::default(),
            params: DetectorParams::default(),
            detector: LazySlot::filled(detector),
            cascade: cascade.map(LazySlot::filled).unwrap_or_else(LazySlot::empty),
            classifier: LazySlot::filled(classifier),
        }
    }

    fn load_detector(&self) -> Result<Box<dyn FaceFinder + Send>, ModelLoadError> {
        let path = self.cache.ensure(&self.artifacts.detector)?;
        Ok(Box::new(FaceDetector::load(&path, self.params)?))
    }

    fn load_cascade(&self) -> Result<Box<dyn FaceFinder + Send>, ModelLoadError> {
        let path = self.cache.ensure(&self.artifacts.cascade)?;
        Ok(Box::new(CascadeDetector::load(&path)?))
    }

    /// Run the primary detector on `input`.
    ///
    /// Never fails: fetch, load and inference errors all become
    /// [`Detection::Failed`] so the caller falls back to the cascade. A failed
    /// load is retried on the next call.
    pub fn detect_primary(&self, input: &DetectionInput<'_>) -> Detection {
        self.detector
            .with(|| self.load_detector(), |detector| detector.find(input))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "primary detector unavailable");
                Detection::Failed(e.to_string())
            })
    }

    /// Run the cascade detector on `input`. Never fails: load errors become
    /// [`Detection::Failed`] and are retried on the next call.
    pub fn detect_fallback(&self, input: &DetectionInput<'_>) -> Detection {
        self.cascade
            .with(|| self.load_cascade(), |cascade| cascade.find(input))
            .unwrap_or_else(|e| Detection::Failed(e.to_string()))
    }

    /// Run `f` against the classifier, loading it first if needed.
    pub fn with_classifier<R>(
        &self,
        f: impl FnOnce(&mut dyn EmotionModel) -> R,
    ) -> Result<R, ModelLoadError> {
        self.classifier.with(
            || {
                let path = self.cache.ensure(&self.artifacts.classifier)?;
                let classifier = EmotionClassifier::load(&path)?;
                Ok::<_, ModelLoadError>(Box::new(classifier) as Box<dyn EmotionModel + Send>)
            },
            |model| f(model),
        )
    }

    /// Download and load every model now instead of on first request.
    ///
    /// The cascade is included; its failure is reported here even though
    /// request handling tolerates it.
    pub fn warm_up(&self) -> Result<LoadedModels, ModelLoadError> {
        self.detector.with(|| self.load_detector(), |_| ())?;
        self.cascade.with(|| self.load_cascade(), |_| ())?;
        self.with_classifier(|_| ())?;
        Ok(self.loaded())
    }

    pub fn loaded(&self) -> LoadedModels {
        LoadedModels {
            detector: self.detector.is_loaded(),
            cascade: self.cascade.is_loaded(),
            classifier: self.classifier.is_loaded(),
        }
    }
}
