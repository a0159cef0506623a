use moodlens_core::cache::{
    ModelArtifact, ModelArtifacts, ModelCache, ModelFetchError, ModelFetcher, CASCADE_MODEL_FILE,
    YUNET_MODEL_FILE,
};
use moodlens_core::classifier::{ClassifierError, EmotionModel};
use moodlens_core::detector::DetectorParams;
use moodlens_core::locator::{Detection, DetectionInput, FaceFinder};
use moodlens_core::types::EMOTION_COUNT;
use moodlens_core::{AnalysisResult, Analyzer, BoundingBox, ModelRegistry, PipelineError, Wellbeing};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const HAPPY: [f32; EMOTION_COUNT] = [1.0, 5.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
const SAD: [f32; EMOTION_COUNT] = [1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

struct Offline;

impl ModelFetcher for Offline {
    fn fetch(&self, artifact: &ModelArtifact) -> Result<Vec<u8>, ModelFetchError> {
        Err(ModelFetchError::Status {
            name: artifact.name.clone(),
            url: artifact.url.clone(),
            status: 503,
        })
    }
}

/// Returns a fixed outcome and counts invocations.
struct ScriptedFinder {
    outcome: Detection,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFinder {
    fn boxed(outcome: Detection) -> (Box<dyn FaceFinder + Send>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let finder = ScriptedFinder {
            outcome,
            calls: Arc::clone(&calls),
        };
        (Box::new(finder), calls)
    }
}

impl FaceFinder for ScriptedFinder {
    fn find(&mut self, _input: &DetectionInput<'_>) -> Detection {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

struct FixedModel(Result<[f32; EMOTION_COUNT], String>);

impl EmotionModel for FixedModel {
    fn logits(&mut self, input: &Array4<f32>) -> Result<[f32; EMOTION_COUNT], ClassifierError> {
        assert_eq!(input.shape(), &[1, 1, 64, 64]);
        self.0.clone().map_err(ClassifierError::InferenceFailed)
    }
}

fn face(x: f32, y: f32, size: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: size,
        height: size,
        confidence: 0.95,
        landmarks: None,
    }
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn analyzer(
    dir: &tempfile::TempDir,
    primary: Box<dyn FaceFinder + Send>,
    cascade: Option<Box<dyn FaceFinder + Send>>,
    logits: Result<[f32; EMOTION_COUNT], String>,
) -> Analyzer {
    let registry = ModelRegistry::with_models(
        ModelCache::new(dir.path(), Offline),
        primary,
        cascade,
        Box::new(FixedModel(logits)),
    );
    Analyzer::with_registry(registry, 5 * 1024 * 1024)
}

#[test]
fn happy_face_from_primary_detector() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::Found(face(40.0, 30.0, 100.0)));
    let (cascade, cascade_calls) = ScriptedFinder::boxed(Detection::NotFound);
    let a = analyzer(&dir, primary, Some(cascade), Ok(HAPPY));

    let r = a.analyze(&jpeg(200, 160)).unwrap();
    assert!(r.success && r.face_detected);
    assert_eq!(r.dominant.as_deref(), Some("happy"));
    assert_eq!(r.wellbeing, Some(Wellbeing::Positive));
    assert_eq!(r.emotions.len(), 8);
    assert!(r.message.is_none());
    assert_eq!(cascade_calls.load(Ordering::SeqCst), 0, "cascade must not run");
}

#[test]
fn cascade_used_when_primary_misses() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, primary_calls) = ScriptedFinder::boxed(Detection::NotFound);
    let (cascade, cascade_calls) = ScriptedFinder::boxed(Detection::Found(face(10.0, 10.0, 80.0)));
    let a = analyzer(&dir, primary, Some(cascade), Ok(SAD));

    let r = a.analyze(&jpeg(128, 128)).unwrap();
    assert_eq!(r.dominant.as_deref(), Some("sad"));
    assert_eq!(r.wellbeing, Some(Wellbeing::NeedsAttention));
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cascade_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cascade_used_when_primary_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::Failed("shape rejected".into()));
    let (cascade, _) = ScriptedFinder::boxed(Detection::Found(face(0.0, 0.0, 64.0)));
    let a = analyzer(&dir, primary, Some(cascade), Ok(HAPPY));

    let r = a.analyze(&jpeg(96, 96)).unwrap();
    assert!(r.face_detected);
    assert_eq!(r.dominant.as_deref(), Some("happy"));
}

#[test]
fn no_face_when_both_detectors_miss() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::NotFound);
    let (cascade, _) = ScriptedFinder::boxed(Detection::NotFound);
    let a = analyzer(&dir, primary, Some(cascade), Ok(HAPPY));

    let r = a.analyze(&jpeg(64, 64)).unwrap();
    assert_eq!(r, AnalysisResult::no_face());
    assert!(r.success);
}

#[test]
fn unavailable_cascade_reads_as_no_face() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::NotFound);
    let a = analyzer(&dir, primary, None, Ok(HAPPY));

    let r = a.analyze(&jpeg(64, 64)).unwrap();
    assert_eq!(r, AnalysisResult::no_face());
}

#[test]
fn classifier_error_is_reported_in_result() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::Found(face(8.0, 8.0, 48.0)));
    let a = analyzer(&dir, primary, None, Err("tensor mismatch".into()));

    let r = a.analyze(&jpeg(64, 64)).unwrap();
    assert!(!r.success);
    assert!(r.face_detected);
    assert!(r.emotions.is_empty());
    assert!(r.message.unwrap().contains("tensor mismatch"));
}

#[test]
fn undecodable_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, primary_calls) = ScriptedFinder::boxed(Detection::NotFound);
    let a = analyzer(&dir, primary, None, Ok(HAPPY));

    let r = a.analyze(&[0xff, 0xd8, 0x00, 0x01]).unwrap();
    assert_eq!(r, AnalysisResult::invalid_image());
    assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn oversized_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, _) = ScriptedFinder::boxed(Detection::NotFound);
    let registry = ModelRegistry::with_models(
        ModelCache::new(dir.path(), Offline),
        primary,
        None,
        Box::new(FixedModel(Ok(HAPPY))),
    );
    let a = Analyzer::with_registry(registry, 1024);

    let r = a.analyze(&jpeg(256, 256)).unwrap();
    assert_eq!(r.message.as_deref(), Some("Image too large"));
    assert!(!r.success);
}

/// Fails every download and records which files were asked for.
struct RecordingOffline(Arc<Mutex<Vec<String>>>);

impl ModelFetcher for RecordingOffline {
    fn fetch(&self, artifact: &ModelArtifact) -> Result<Vec<u8>, ModelFetchError> {
        self.0.lock().unwrap().push(artifact.file_name.clone());
        Offline.fetch(artifact)
    }
}

#[test]
fn detector_download_failure_still_tries_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let requested = Arc::new(Mutex::new(Vec::new()));
    let registry = ModelRegistry::new(
        ModelCache::new(dir.path(), RecordingOffline(Arc::clone(&requested))),
        ModelArtifacts::default(),
        DetectorParams::default(),
    );
    let a = Analyzer::with_registry(registry, 5 * 1024 * 1024);

    let r = a.analyze(&jpeg(64, 64)).unwrap();
    assert_eq!(r, AnalysisResult::no_face());
    assert_eq!(
        *requested.lock().unwrap(),
        [YUNET_MODEL_FILE, CASCADE_MODEL_FILE]
    );

    // Both slots stay empty and are retried.
    a.analyze(&jpeg(64, 64)).unwrap();
    assert_eq!(requested.lock().unwrap().len(), 4);
}

#[test]
fn warm_up_reports_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(
        ModelCache::new(dir.path(), Offline),
        ModelArtifacts::default(),
        DetectorParams::default(),
    );
    let a = Analyzer::with_registry(registry, 5 * 1024 * 1024);

    let err = a.warm_up().unwrap_err();
    assert!(matches!(err, PipelineError::Model(_)));
    assert!(err.to_string().contains("503"), "{err}");
}

#[test]
fn concurrent_requests_share_one_analyzer() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, primary_calls) = ScriptedFinder::boxed(Detection::Found(face(16.0, 16.0, 64.0)));
    let a = Arc::new(analyzer(&dir, primary, None, Ok(SAD)));
    let image = Arc::new(jpeg(100, 100));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let a = Arc::clone(&a);
            let image = Arc::clone(&image);
            std::thread::spawn(move || a.analyze(&image).unwrap())
        })
        .collect();

    for h in handles {
        let r = h.join().unwrap();
        assert_eq!(r.dominant.as_deref(), Some("sad"));
    }
    assert_eq!(primary_calls.load(Ordering::SeqCst), 6);
}
