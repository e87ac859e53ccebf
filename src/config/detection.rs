// src/config/detection.rs
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::signal::clamp01;

fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_max_evidence_length() -> usize {
    200
}
fn default_rule_floor() -> f32 {
    0.6
}
fn default_true() -> bool {
    true
}
fn default_min_cache_confidence() -> f32 {
    0.3
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_rule_cache_evict_fraction() -> f32 {
    0.5
}
fn default_fusion_cache_evict_fraction() -> f32 {
    0.1
}

/// Engine configuration. Every field has a serde default, so a partial
/// JSON file (or none at all) is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Fused confidence at or above this counts as a hit.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Evidence snippets are truncated to this many characters.
    #[serde(default = "default_max_evidence_length")]
    pub max_evidence_length: usize,
    /// Minimum confidence guaranteed for a rule-only hit.
    #[serde(default = "default_rule_floor")]
    pub rule_floor: f32,
    #[serde(default = "default_true")]
    pub enable_vector_search: bool,
    #[serde(default = "default_true")]
    pub enable_llm_validation: bool,
    /// Results below this confidence are never cached.
    #[serde(default = "default_min_cache_confidence")]
    pub min_cache_confidence: f32,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Fraction of the rule cache dropped per eviction sweep.
    #[serde(default = "default_rule_cache_evict_fraction")]
    pub rule_cache_evict_fraction: f32,
    /// The fusion cache historically sweeps a smaller fraction; both stay
    /// configurable per instance.
    #[serde(default = "default_fusion_cache_evict_fraction")]
    pub fusion_cache_evict_fraction: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_evidence_length: default_max_evidence_length(),
            rule_floor: default_rule_floor(),
            enable_vector_search: true,
            enable_llm_validation: true,
            min_cache_confidence: default_min_cache_confidence(),
            cache_capacity: default_cache_capacity(),
            rule_cache_evict_fraction: default_rule_cache_evict_fraction(),
            fusion_cache_evict_fraction: default_fusion_cache_evict_fraction(),
        }
    }
}

impl DetectionConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: DetectionConfig = serde_json::from_str(&data)?;
        Ok(cfg.sanitized())
    }

    /// Clamp out-of-range values instead of rejecting them.
    pub fn sanitized(mut self) -> Self {
        self.confidence_threshold = clamp01(self.confidence_threshold);
        self.rule_floor = clamp01(self.rule_floor);
        self.min_cache_confidence = clamp01(self.min_cache_confidence);
        self.rule_cache_evict_fraction = self.rule_cache_evict_fraction.clamp(0.01, 1.0);
        self.fusion_cache_evict_fraction = self.fusion_cache_evict_fraction.clamp(0.01, 1.0);
        self.cache_capacity = self.cache_capacity.max(1);
        self.max_evidence_length = self.max_evidence_length.max(1);
        self
    }

    /// Short tag baked into fusion-cache keys so results fused under a
    /// different threshold/limit never collide.
    pub fn fingerprint(&self) -> String {
        format!(
            "t{:.2}-e{}-f{:.2}-v{}-l{}",
            self.confidence_threshold,
            self.max_evidence_length,
            self.rule_floor,
            self.enable_vector_search as u8,
            self.enable_llm_validation as u8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = DetectionConfig::default();
        assert!((c.confidence_threshold - 0.7).abs() < 1e-6);
        assert_eq!(c.max_evidence_length, 200);
        assert!((c.rule_floor - 0.6).abs() < 1e-6);
        assert!(c.enable_vector_search && c.enable_llm_validation);
        assert_eq!(c.cache_capacity, 1000);
        assert!((c.min_cache_confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let c: DetectionConfig =
            serde_json::from_str(r#"{"confidence_threshold": 0.6}"#).unwrap();
        assert!((c.confidence_threshold - 0.6).abs() < 1e-6);
        assert_eq!(c.max_evidence_length, 200);
    }

    #[test]
    fn sanitize_clamps_out_of_range() {
        let c = DetectionConfig {
            confidence_threshold: 1.8,
            rule_floor: -0.2,
            rule_cache_evict_fraction: 0.0,
            cache_capacity: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(c.confidence_threshold, 1.0);
        assert_eq!(c.rule_floor, 0.0);
        assert!(c.rule_cache_evict_fraction >= 0.01);
        assert_eq!(c.cache_capacity, 1);
    }

    #[test]
    fn fingerprint_changes_with_threshold() {
        let a = DetectionConfig::default();
        let b = DetectionConfig {
            confidence_threshold: 0.6,
            ..Default::default()
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
