use serde::{Deserialize, Serialize};

/// Number of labels in the FER+ taxonomy.
pub const EMOTION_COUNT: usize = 8;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [right_eye, left_eye, nose, right_mouth, left_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box area in square pixels. Degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// FER+ emotion label, in classifier output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Happiness,
    Surprise,
    Sadness,
    Anger,
    Disgust,
    Fear,
    Contempt,
}

impl Emotion {
    /// All labels in the fixed classifier output order.
    pub const ALL: [Emotion; EMOTION_COUNT] = [
        Emotion::Neutral,
        Emotion::Happiness,
        Emotion::Surprise,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Contempt,
    ];

    /// Raw FER+ label.
    pub fn label(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happiness => "happiness",
            Emotion::Surprise => "surprise",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Contempt => "contempt",
        }
    }

    /// Label shown to clients. Only three labels are renamed.
    pub fn display_label(self) -> &'static str {
        match self {
            Emotion::Happiness => "happy",
            Emotion::Sadness => "sad",
            Emotion::Anger => "angry",
            other => other.label(),
        }
    }

    /// Coarse wellbeing category for a dominant emotion.
    pub fn wellbeing(self) -> Wellbeing {
        match self {
            Emotion::Happiness | Emotion::Surprise => Wellbeing::Positive,
            Emotion::Neutral => Wellbeing::Neutral,
            Emotion::Sadness
            | Emotion::Fear
            | Emotion::Anger
            | Emotion::Disgust
            | Emotion::Contempt => Wellbeing::NeedsAttention,
        }
    }

    /// Parse a raw FER+ label.
    pub fn from_label(label: &str) -> Option<Emotion> {
        Emotion::ALL.into_iter().find(|e| e.label() == label)
    }
}

/// Wellbeing category derived from the dominant emotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wellbeing {
    Positive,
    Neutral,
    NeedsAttention,
}

impl Wellbeing {
    pub fn as_str(self) -> &'static str {
        match self {
            Wellbeing::Positive => "positive",
            Wellbeing::Neutral => "neutral",
            Wellbeing::NeedsAttention => "needs_attention",
        }
    }
}

/// Wellbeing for a raw label string. Unrecognized labels map to `Neutral`.
pub fn wellbeing_for_label(label: &str) -> Wellbeing {
    Emotion::from_label(label)
        .map(Emotion::wellbeing)
        .unwrap_or(Wellbeing::Neutral)
}

/// Probability distribution over the FER+ labels, indexed by [`Emotion::ALL`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionScores {
    values: [f32; EMOTION_COUNT],
}

impl EmotionScores {
    /// Build a distribution from raw classifier logits.
    pub fn from_logits(logits: &[f32; EMOTION_COUNT]) -> Self {
        Self {
            values: softmax(logits),
        }
    }

    pub fn values(&self) -> &[f32; EMOTION_COUNT] {
        &self.values
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.values[emotion as usize]
    }

    /// Iterate `(label, probability)` pairs in fixed label order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.into_iter().zip(self.values.iter().copied())
    }

    /// Label with the highest probability. Ties go to the earliest label.
    pub fn dominant(&self) -> Emotion {
        let mut best = 0;
        for i in 1..EMOTION_COUNT {
            if self.values[i] > self.values[best] {
                best = i;
            }
        }
        Emotion::ALL[best]
    }
}

/// Numerically stable softmax: shift by the max logit before exponentiating.
pub fn softmax(logits: &[f32; EMOTION_COUNT]) -> [f32; EMOTION_COUNT] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out = [0.0f32; EMOTION_COUNT];
    let mut sum = 0.0f32;
    for (o, &l) in out.iter_mut().zip(logits.iter()) {
        *o = (l - max).exp();
        sum += *o;
    }
    // sum >= 1.0 because the max logit contributes exp(0).
    for o in out.iter_mut() {
        *o /= sum;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_distribution(p: &[f32; EMOTION_COUNT]) {
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)), "out of range: {p:?}");
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum = {sum}");
    }

    #[test]
    fn test_softmax_is_distribution() {
        let cases: [[f32; 8]; 5] = [
            [0.0; 8],
            [5.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            [-3.2, 7.9, 0.1, -0.4, 2.2, -11.0, 4.4, 0.0],
            [1000.0, 999.0, -1000.0, 0.0, 3.0, 2.0, 1.0, 0.5],
            [-500.0, -501.0, -502.0, -503.0, -504.0, -505.0, -506.0, -507.0],
        ];
        for logits in &cases {
            assert_distribution(&softmax(logits));
        }
    }

    #[test]
    fn test_softmax_large_logits_do_not_overflow() {
        let p = softmax(&[1.0e4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let logits = [0.3, -1.2, 2.5, 0.0, 1.1, -0.7, 0.9, 0.2];
        let base = softmax(&logits);
        for shift in [-100.0f32, -1.5, 3.0, 250.0] {
            let shifted = logits.map(|l| l + shift);
            let p = softmax(&shifted);
            for (a, b) in base.iter().zip(p.iter()) {
                assert!((a - b).abs() < 1e-5, "shift {shift}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_softmax_uniform() {
        let p = softmax(&[2.0; 8]);
        for v in p {
            assert!((v - 0.125).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dominant_tie_goes_to_earliest_label() {
        let scores = EmotionScores::from_logits(&[5.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(scores.dominant(), Emotion::Neutral);

        let scores = EmotionScores::from_logits(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 3.0]);
        assert_eq!(scores.dominant(), Emotion::Fear);
    }

    #[test]
    fn test_dominant_picks_max() {
        let scores = EmotionScores::from_logits(&[1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(scores.dominant(), Emotion::Sadness);
        assert!(scores.get(Emotion::Sadness) > scores.get(Emotion::Neutral));
    }

    #[test]
    fn test_wellbeing_table() {
        let expected = [
            ("neutral", Wellbeing::Neutral),
            ("happiness", Wellbeing::Positive),
            ("surprise", Wellbeing::Positive),
            ("sadness", Wellbeing::NeedsAttention),
            ("anger", Wellbeing::NeedsAttention),
            ("disgust", Wellbeing::NeedsAttention),
            ("fear", Wellbeing::NeedsAttention),
            ("contempt", Wellbeing::NeedsAttention),
        ];
        for (label, wellbeing) in expected {
            assert_eq!(wellbeing_for_label(label), wellbeing, "{label}");
        }
    }

    #[test]
    fn test_wellbeing_unknown_label_defaults_neutral() {
        assert_eq!(wellbeing_for_label("bored"), Wellbeing::Neutral);
        assert_eq!(wellbeing_for_label(""), Wellbeing::Neutral);
        // Display labels are not raw labels.
        assert_eq!(wellbeing_for_label("happy"), Wellbeing::Neutral);
    }

    #[test]
    fn test_display_labels() {
        let shown: Vec<&str> = Emotion::ALL.iter().map(|e| e.display_label()).collect();
        assert_eq!(
            shown,
            ["neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt"]
        );
    }

    #[test]
    fn test_label_roundtrip_and_order() {
        for (i, e) in Emotion::ALL.iter().enumerate() {
            assert_eq!(*e as usize, i);
            assert_eq!(Emotion::from_label(e.label()), Some(*e));
        }
        assert_eq!(Emotion::from_label("happy"), None);
    }

    #[test]
    fn test_wellbeing_serializes_snake_case() {
        let json = serde_json::to_string(&Wellbeing::NeedsAttention).unwrap();
        assert_eq!(json, "\"needs_attention\"");
        assert_eq!(Wellbeing::NeedsAttention.as_str(), "needs_attention");
    }

    #[test]
    fn test_bbox_area() {
        let b = BoundingBox {
            x: 0.0, y: 0.0, width: 10.0, height: 4.0, confidence: 0.9, landmarks: None,
        };
        assert_eq!(b.area(), 40.0);
        let degenerate = BoundingBox { width: -2.0, ..b };
        assert_eq!(degenerate.area(), 0.0);
    }
}
