//! # Fusion scorer
//! Pure, testable logic that merges the rule, vector, and LLM signals for
//! one detection point into a single `FusionResult`. No I/O, suitable for
//! unit tests and offline evaluation.
//!
//! Policy: fixed per-source weights over the signals that actually carry a
//! positive confidence; a threshold decides the hit; a rule-only floor
//! protects legitimate rule matches when the downstream services stayed
//! silent; a final zero-signal guard keeps the "nothing found" case exact.

use crate::evidence::{char_len, truncate_quote};
use crate::signal::{clamp01, FusionResult, FusionSignals, Signal, SignalSource};

pub const RULE_WEIGHT: f32 = 0.4;
pub const VECTOR_WEIGHT: f32 = 0.3;
pub const LLM_WEIGHT: f32 = 0.3;

/// Tunables passed into [`fuse`]; see the engine config for the defaults
/// each dimension runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuseParams {
    pub threshold: f32,
    pub max_evidence_length: usize,
    pub rule_floor: f32,
}

impl Default for FuseParams {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_evidence_length: 200,
            rule_floor: 0.6,
        }
    }
}

/// Placeholder strings an LLM validator returns instead of a real quote.
/// A claim without quotable evidence must not contribute confidence.
const PLACEHOLDER_TOKENS: [&str; 13] = [
    "无",
    "n/a",
    "na",
    "未知",
    "none",
    "null",
    "不适用",
    "无证据",
    "无法提供",
    "空",
    "不可用",
    "not applicable",
    "no evidence",
];

/// True when the (trimmed, lowercased) evidence is empty or one of the
/// known placeholder forms.
pub fn is_placeholder_evidence(evidence: &str) -> bool {
    let ev = evidence.trim().to_lowercase();
    ev.is_empty()
        || PLACEHOLDER_TOKENS.contains(&ev.as_str())
        || ev.starts_with("不适用")
        || ev.contains("无证据")
        || ev.contains("无法提供")
}

/// Merge up to three signals into one decision. Missing vector/LLM signals
/// are the normal "feature disabled" case; malformed confidences are
/// clamped, never rejected. This function never fails.
pub fn fuse(
    rule: &Signal,
    vector: Option<&Signal>,
    llm: Option<&Signal>,
    params: &FuseParams,
) -> FusionResult {
    let rule_conf = clamp01(rule.confidence);
    let vec_sim = vector.map(|v| clamp01(v.confidence)).unwrap_or(0.0);

    // LLM evidence sanitation: an unsupported claim contributes nothing,
    // whatever numeric confidence the validator reported.
    let llm_conf = match llm {
        Some(l) if !is_placeholder_evidence(&l.evidence) => clamp01(l.confidence),
        _ => 0.0,
    };

    // Weighted sum over the signals that are actually present.
    let mut total_confidence = 0.0_f32;
    let mut total_weight = 0.0_f32;
    if rule_conf > 0.0 {
        total_confidence += rule_conf * RULE_WEIGHT;
        total_weight += RULE_WEIGHT;
    }
    if vec_sim > 0.0 {
        total_confidence += vec_sim * VECTOR_WEIGHT;
        total_weight += VECTOR_WEIGHT;
    }
    if llm_conf > 0.0 {
        total_confidence += llm_conf * LLM_WEIGHT;
        total_weight += LLM_WEIGHT;
    }

    let mut final_confidence = if total_weight > 0.0 {
        clamp01(total_confidence / total_weight)
    } else {
        0.0
    };
    let mut hit = final_confidence >= params.threshold;

    // Rule floor: a positive rule match must not be suppressed just
    // because the downstream services were silent. The gate looks at the
    // *reported* side-signal confidences, sanitized or not, so a
    // placeholder-backed LLM claim still counts as "the service answered".
    let side_signal_present = vector.map_or(false, |v| v.confidence > 0.0)
        || llm.map_or(false, |l| l.confidence > 0.0);
    if rule.hit && !side_signal_present {
        hit = true;
        final_confidence = final_confidence.max(params.rule_floor);
    }

    // Evidence selection: highest contribution wins, longer string breaks
    // ties, rule > llm > vector on exact ties.
    let llm_evidence = llm.map(|l| l.evidence.as_str()).unwrap_or("");
    let vec_evidence = vector.map(|v| v.evidence.as_str()).unwrap_or("");
    let candidates = [
        (
            contribution(rule_conf, RULE_WEIGHT, &rule.evidence),
            char_len(&rule.evidence),
            SignalSource::Rule,
            rule.evidence.as_str(),
        ),
        (
            contribution(llm_conf, LLM_WEIGHT, llm_evidence),
            char_len(llm_evidence),
            SignalSource::Llm,
            llm_evidence,
        ),
        (
            contribution(vec_sim, VECTOR_WEIGHT, vec_evidence),
            char_len(vec_evidence),
            SignalSource::Vector,
            vec_evidence,
        ),
    ];
    let mut best = candidates[0];
    for c in &candidates[1..] {
        if (c.0, c.1) > (best.0, best.1) {
            best = *c;
        }
    }
    let (best_contrib, best_len, mut evidence_source, best_evidence) = best;
    let mut evidence = if best_len == 0 && best_contrib == 0.0 {
        evidence_source = SignalSource::None;
        String::new()
    } else {
        best_evidence.to_string()
    };
    evidence = truncate_quote(&evidence, params.max_evidence_length);

    let mut contributors = Vec::new();
    if rule_conf > 0.0 {
        contributors.push(SignalSource::Rule);
    }
    if vec_sim > 0.0 {
        contributors.push(SignalSource::Vector);
    }
    if llm_conf > 0.0 {
        contributors.push(SignalSource::Llm);
    }

    let signals = FusionSignals {
        rule_confidence: rule_conf,
        vector_similarity: vec_sim,
        llm_confidence: llm_conf,
        rule_weight: RULE_WEIGHT,
        vector_weight: VECTOR_WEIGHT,
        llm_weight: LLM_WEIGHT,
        final_confidence,
        threshold: params.threshold,
        contributors,
    };

    // Zero-signal guard: all raw confidences gone, or no usable evidence,
    // means "not found". This runs last and overrides the floor.
    if (rule_conf <= 0.0 && vec_sim <= 0.0 && llm_conf <= 0.0)
        || evidence_source == SignalSource::None
    {
        hit = false;
        final_confidence = 0.0;
    }

    FusionResult {
        hit,
        confidence: final_confidence,
        evidence,
        evidence_source,
        signals,
    }
}

fn contribution(confidence: f32, weight: f32, evidence: &str) -> f32 {
    if evidence.is_empty() {
        0.0
    } else {
        confidence * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(hit: bool, confidence: f32, evidence: &str) -> Signal {
        Signal::new(SignalSource::Rule, hit, confidence, evidence.to_string())
    }
    fn vec_sig(similarity: f32, document: &str) -> Signal {
        Signal::new(
            SignalSource::Vector,
            similarity > 0.0,
            similarity,
            document.to_string(),
        )
    }
    fn llm_sig(confidence: f32, evidence: &str) -> Signal {
        Signal::new(SignalSource::Llm, confidence > 0.0, confidence, evidence.to_string())
    }

    #[test]
    fn pure_rule_signal_passes_through() {
        let p = FuseParams {
            threshold: 0.6,
            ..Default::default()
        };
        let r = fuse(&rule(true, 0.9, "我是益盟操盘手专员"), None, None, &p);
        assert!(r.hit);
        assert!((r.confidence - 0.9).abs() < 1e-6);
        assert_eq!(r.evidence_source, SignalSource::Rule);
        assert_eq!(r.signals.contributors, vec![SignalSource::Rule]);
    }

    #[test]
    fn rule_floor_rescues_lonely_rule_hit() {
        let p = FuseParams::default(); // threshold 0.7, floor 0.6
        let r = fuse(&rule(true, 0.5, "免费讲解"), None, None, &p);
        assert!(r.hit, "floor must apply when no side signal exists");
        assert!((r.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn vector_only_signal_scores_without_floor() {
        let p = FuseParams {
            threshold: 0.5,
            ..Default::default()
        };
        let r = fuse(
            &rule(false, 0.0, ""),
            Some(&vec_sig(0.2, "相似示例文本")),
            Some(&llm_sig(0.0, "无")),
            &p,
        );
        assert!(!r.hit);
        assert!((r.confidence - 0.2).abs() < 1e-6);
        assert_eq!(r.evidence_source, SignalSource::Vector);
    }

    #[test]
    fn vector_without_document_collapses_to_none() {
        let p = FuseParams {
            threshold: 0.5,
            ..Default::default()
        };
        let r = fuse(&rule(false, 0.0, ""), Some(&vec_sig(0.2, "")), None, &p);
        assert_eq!(r.evidence_source, SignalSource::None);
        assert!(!r.hit);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn weighted_blend_stays_below_threshold() {
        let p = FuseParams::default(); // threshold 0.7
        let r = fuse(
            &rule(true, 0.5, "规则证据"),
            None,
            Some(&llm_sig(0.9, "具体证据文本")),
            &p,
        );
        // (0.5*0.4 + 0.9*0.3) / 0.7 ≈ 0.671
        assert!(!r.hit);
        assert!((r.confidence - 0.671_428_5).abs() < 1e-4);
        // llm contribution 0.27 beats rule 0.20.
        assert_eq!(r.evidence_source, SignalSource::Llm);
    }

    #[test]
    fn placeholder_evidence_zeroes_llm_contribution() {
        let p = FuseParams {
            threshold: 0.5,
            ..Default::default()
        };
        for placeholder in ["无", "N/A", " none ", "不适用：原文缺失", "文中无证据"] {
            let with = fuse(
                &rule(true, 0.5, "规则证据"),
                None,
                Some(&llm_sig(0.95, placeholder)),
                &p,
            );
            let without = fuse(&rule(true, 0.5, "规则证据"), None, None, &p);
            assert_eq!(
                with.signals.llm_confidence, 0.0,
                "placeholder {placeholder:?} must not contribute"
            );
            // The reported 0.95 still counts as "the validator answered",
            // so the rule floor stays off and the weighted score stands.
            assert!((with.confidence - 0.5).abs() < 1e-6);
            assert!((without.confidence - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn all_zero_signals_yield_exact_zero() {
        let r = fuse(
            &rule(false, 0.0, ""),
            Some(&vec_sig(0.0, "")),
            Some(&llm_sig(0.0, "")),
            &FuseParams::default(),
        );
        assert!(!r.hit);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.evidence_source, SignalSource::None);
        assert!(r.evidence.is_empty());
        assert!(r.signals.contributors.is_empty());
    }

    #[test]
    fn guard_overrides_floor_when_rule_hit_carries_zero_confidence() {
        // Defensive case: hit=true with confidence 0 and no evidence.
        let r = fuse(&rule(true, 0.0, ""), None, None, &FuseParams::default());
        assert!(!r.hit);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.evidence_source, SignalSource::None);
    }

    #[test]
    fn evidence_is_truncated_to_limit() {
        let long: String = "证".repeat(350);
        let p = FuseParams {
            threshold: 0.5,
            max_evidence_length: 200,
            rule_floor: 0.6,
        };
        let r = fuse(&rule(true, 0.9, &long), None, None, &p);
        assert_eq!(char_len(&r.evidence), 200);
    }

    #[test]
    fn out_of_range_confidences_are_clamped() {
        let r = fuse(
            &rule(true, 3.5, "规则证据"),
            Some(&vec_sig(-2.0, "doc")),
            Some(&llm_sig(1.8, "证据")),
            &FuseParams::default(),
        );
        assert!(r.confidence <= 1.0);
        assert_eq!(r.signals.rule_confidence, 1.0);
        assert_eq!(r.signals.vector_similarity, 0.0);
        assert_eq!(r.signals.llm_confidence, 1.0);
    }

    #[test]
    fn confidence_always_in_unit_interval() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..500 {
            let r = fuse(
                &rule(rng.random_bool(0.5), rng.random_range(-2.0..3.0), "ev"),
                Some(&vec_sig(rng.random_range(-2.0..3.0), "doc")),
                Some(&llm_sig(rng.random_range(-2.0..3.0), "证据")),
                &FuseParams::default(),
            );
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }
}
