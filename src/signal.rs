//! Core data model shared by the rule matcher, the fusion scorer, and the
//! detection engine: one source's opinion (`Signal`) and the fused verdict
//! for a detection point (`FusionResult`).

use serde::{Deserialize, Serialize};

/// Which detector produced a signal (or, for a fused result, which signal's
/// evidence was selected as the representative quote).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Rule,
    Vector,
    Llm,
    None,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Rule => "rule",
            SignalSource::Vector => "vector",
            SignalSource::Llm => "llm",
            SignalSource::None => "none",
        }
    }
}

/// One source's opinion about a detection point.
///
/// `confidence` is clamped to `[0, 1]` at construction; `evidence` may be
/// empty (a hit without a quotable snippet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    pub hit: bool,
    pub confidence: f32,
    pub evidence: String,
}

impl Signal {
    pub fn new(source: SignalSource, hit: bool, confidence: f32, evidence: String) -> Self {
        Self {
            source,
            hit,
            confidence: clamp01(confidence),
            evidence,
        }
    }

    /// The well-defined "nothing found" signal for a source.
    pub fn miss(source: SignalSource) -> Self {
        Self {
            source,
            hit: false,
            confidence: 0.0,
            evidence: String::new(),
        }
    }
}

/// Raw per-source values and the weights used, kept on every fused result
/// for downstream explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionSignals {
    pub rule_confidence: f32,
    pub vector_similarity: f32,
    pub llm_confidence: f32,
    pub rule_weight: f32,
    pub vector_weight: f32,
    pub llm_weight: f32,
    pub final_confidence: f32,
    pub threshold: f32,
    /// Sources whose (sanitized) confidence was positive.
    pub contributors: Vec<SignalSource>,
}

/// Fused decision for one detection point. Owned by the caller once
/// returned; the engine never mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub hit: bool,
    pub confidence: f32,
    pub evidence: String,
    pub evidence_source: SignalSource,
    pub signals: FusionSignals,
}

/// Clamp to [0.0, 1.0].
pub fn clamp01(x: f32) -> f32 {
    if x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_signal_clamps_confidence() {
        let s = Signal::new(SignalSource::Rule, true, 1.7, "ev".into());
        assert!((s.confidence - 1.0).abs() < f32::EPSILON);
        let s = Signal::new(SignalSource::Llm, false, -0.3, String::new());
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn miss_is_zeroed() {
        let s = Signal::miss(SignalSource::Vector);
        assert!(!s.hit);
        assert_eq!(s.confidence, 0.0);
        assert!(s.evidence.is_empty());
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SignalSource::Llm).unwrap(),
            "\"llm\""
        );
        assert_eq!(SignalSource::Vector.as_str(), "vector");
    }
}
