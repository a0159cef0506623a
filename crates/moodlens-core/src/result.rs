//! Response contract returned by [`Analyzer::analyze`](crate::pipeline::Analyzer::analyze).

use crate::types::{EmotionScores, Wellbeing};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const MSG_INVALID_IMAGE: &str = "Invalid image";
pub const MSG_IMAGE_TOO_LARGE: &str = "Image too large";
pub const MSG_NO_FACE: &str = "No face detected. Please ensure your face is visible.";

/// Outcome of analyzing one image.
///
/// Invariants: `face_detected == false` implies empty `emotions` and no
/// `dominant`/`wellbeing`; `success == false` implies a `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub success: bool,
    pub face_detected: bool,
    /// Display label → probability. Empty, or exactly 8 entries in FER+ order.
    pub emotions: EmotionMap,
    pub dominant: Option<String>,
    pub wellbeing: Option<Wellbeing>,
    pub message: Option<String>,
}

/// Label → probability pairs that serialize as a JSON object in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmotionMap(Vec<(String, f32)>);

impl EmotionMap {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.iter().find(|(k, _)| k == label).map(|&(_, p)| p)
    }

    pub fn contains_key(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, p)| (k.as_str(), *p))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.iter().map(|(_, p)| p)
    }
}

impl FromIterator<(String, f32)> for EmotionMap {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for EmotionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, p) in &self.0 {
            map.serialize_entry(label, p)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EmotionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EmotionMapVisitor;

        impl<'de> Visitor<'de> for EmotionMapVisitor {
            type Value = EmotionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of emotion label to probability")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<EmotionMap, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, p)) = access.next_entry::<String, f32>()? {
                    entries.push((label, p));
                }
                Ok(EmotionMap(entries))
            }
        }

        deserializer.deserialize_map(EmotionMapVisitor)
    }
}

impl AnalysisResult {
    fn failure(face_detected: bool, message: impl Into<String>) -> Self {
        Self {
            success: false,
            face_detected,
            emotions: EmotionMap::default(),
            dominant: None,
            wellbeing: None,
            message: Some(message.into()),
        }
    }

    /// Submitted bytes did not decode as an image.
    pub fn invalid_image() -> Self {
        Self::failure(false, MSG_INVALID_IMAGE)
    }

    /// Submitted bytes exceed the configured size cap.
    pub fn too_large() -> Self {
        Self::failure(false, MSG_IMAGE_TOO_LARGE)
    }

    /// Neither detector found a face. This is a successful outcome.
    pub fn no_face() -> Self {
        Self {
            success: true,
            face_detected: false,
            emotions: EmotionMap::default(),
            dominant: None,
            wellbeing: None,
            message: Some(MSG_NO_FACE.to_string()),
        }
    }

    /// A face was found but classification failed.
    pub fn classification_failed(message: impl Into<String>) -> Self {
        Self::failure(true, message)
    }

    /// Final result for a classified face.
    ///
    /// Wellbeing is keyed on the raw dominant label; keys and `dominant` use
    /// display labels.
    pub fn from_scores(scores: &EmotionScores) -> Self {
        let dominant = scores.dominant();
        let emotions = scores
            .iter()
            .map(|(emotion, p)| (emotion.display_label().to_string(), p))
            .collect();

        Self {
            success: true,
            face_detected: true,
            emotions,
            dominant: Some(dominant.display_label().to_string()),
            wellbeing: Some(dominant.wellbeing()),
            message: None,
        }
    }
}
