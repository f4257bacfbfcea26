use serde::{Deserialize, Serialize};
use std::fmt;

/// Probability above which a response without a label is read as `Stroke`.
pub const STROKE_THRESHOLD: f64 = 0.55;

/// Reasoning used when the model omits its own.
pub const DEFAULT_REASONING: &str = "Analysis complete.";

/// Reasoning attached to the safe default returned when inference fails.
pub const FAILURE_REASONING: &str =
    "Analysis failed due to technical constraints. Defaulted to Healthy.";

/// Probability attached to the safe default returned when inference fails.
pub const FAILURE_PROBABILITY: f64 = 0.1;

/// Acoustic features describing a single voice sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcousticBiomarkers {
    /// Frequency instability (%)
    pub jitter: f64,
    /// Amplitude instability (%)
    pub shimmer: f64,
    /// Harmonics-to-noise ratio (dB)
    pub hnr: f64,
    /// Syllables per second
    pub speaking_rate: f64,
    /// Pauses per minute
    pub pause_frequency: f64,
}

impl AcousticBiomarkers {
    /// Substituted whole when a response carries no usable biomarker object.
    pub const fn canonical() -> Self {
        Self {
            jitter: 0.5,
            shimmer: 2.1,
            hnr: 24.5,
            speaking_rate: 4.2,
            pause_frequency: 8.0,
        }
    }

    /// Attached to the failure default.
    pub const fn failure() -> Self {
        Self {
            jitter: 0.4,
            shimmer: 1.8,
            hnr: 26.0,
            speaking_rate: 4.5,
            pause_frequency: 5.0,
        }
    }
}

/// Binary classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Stroke,
    Healthy,
}

impl Label {
    /// Label implied by a probability under the fixed decision threshold.
    pub fn from_probability(probability: f64) -> Self {
        if probability > STROKE_THRESHOLD {
            Label::Stroke
        } else {
            Label::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Stroke => "Stroke",
            Label::Healthy => "Healthy",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated output of one classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub stroke_probability: f64,
    pub predicted_label: Label,
    pub biomarkers: AcousticBiomarkers,
    pub reasoning: String,
}

impl InferenceResult {
    /// Low-risk result returned whenever the inference service cannot be used.
    pub fn failure_default() -> Self {
        Self {
            stroke_probability: FAILURE_PROBABILITY,
            predicted_label: Label::Healthy,
            biomarkers: AcousticBiomarkers::failure(),
            reasoning: FAILURE_REASONING.to_string(),
        }
    }
}
