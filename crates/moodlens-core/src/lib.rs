//! moodlens-core — facial emotion and wellbeing inference.
//!
//! Locates the largest face with YuNet (SeetaFace cascade as fallback),
//! classifies it with FER+ and maps the dominant emotion to a coarse
//! wellbeing bucket. Both networks run on ONNX Runtime on the CPU; model
//! files are downloaded into a local cache on first use.

pub mod cache;
pub mod cascade;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod enhance;
pub mod locator;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod result;
pub mod types;

pub use config::Config;
pub use pipeline::{health, Analyzer, HealthStatus, PipelineError};
pub use registry::{LoadedModels, ModelLoadError, ModelRegistry};
pub use result::{AnalysisResult, EmotionMap};
pub use types::{BoundingBox, Emotion, EmotionScores, Wellbeing};
