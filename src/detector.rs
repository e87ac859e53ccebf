//! # Detection engine
//! Thin per-dimension driver tying the pieces together: rule matcher
//! first, then the optional vector and LLM collaborators, then the fusion
//! scorer. One engine instance serves every detection point of every
//! dimension; the fan-out across a dimension's points runs concurrently.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::cache::{self, BulkEvictCache, Cache};
use crate::config::{points, DetectionConfig};
use crate::fusion::{fuse, FuseParams};
use crate::llm::{parse_validator_reply, DynGenerator};
use crate::matcher::{RuleMatcher, RuleOutcome};
use crate::metrics;
use crate::rules::RuleStore;
use crate::signal::{FusionResult, Signal, SignalSource};
use crate::vector::{DynVectorSearch, VectorHit};

/// Rule confidence above which the side collaborators are skipped
/// entirely. An optimization, not a correctness requirement.
const RULE_SHORT_CIRCUIT: f32 = 0.8;

const VALIDATOR_MAX_TOKENS: u32 = 300;
const VALIDATOR_TEMPERATURE: f32 = 0.1;

/// Failure of one point's detection task. Isolated per task; siblings
/// keep running.
#[derive(Debug)]
pub enum DetectionError {
    TaskFailed { point: String, detail: String },
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::TaskFailed { point, detail } => {
                write!(f, "detection task for point '{point}' failed: {detail}")
            }
        }
    }
}

impl std::error::Error for DetectionError {}

#[derive(Debug, Clone, Serialize)]
pub struct PointResult {
    pub point: String,
    pub result: FusionResult,
}

/// Outcome of one dimension's fan-out: a result for every configured
/// point (failures degrade to the zero result), plus the warnings those
/// failures produced.
#[derive(Debug, Clone, Serialize)]
pub struct DimensionReport {
    pub category: String,
    pub results: Vec<PointResult>,
    pub warnings: Vec<String>,
}

impl DimensionReport {
    pub fn hits(&self) -> usize {
        self.results.iter().filter(|r| r.result.hit).count()
    }
}

pub struct DetectionEngine {
    rules: Arc<RuleStore>,
    matcher: RuleMatcher,
    fusion_cache: BulkEvictCache<FusionResult>,
    vector: DynVectorSearch,
    generator: DynGenerator,
    config: DetectionConfig,
    fingerprint: String,
}

impl DetectionEngine {
    pub fn new(
        rules: Arc<RuleStore>,
        vector: DynVectorSearch,
        generator: DynGenerator,
        config: DetectionConfig,
    ) -> Self {
        let config = config.sanitized();
        let matcher = RuleMatcher::new(
            Arc::clone(&rules),
            config.cache_capacity,
            config.rule_cache_evict_fraction,
        )
        .with_min_cache_confidence(config.min_cache_confidence);
        let fusion_cache =
            BulkEvictCache::new(config.cache_capacity, config.fusion_cache_evict_fraction);
        let fingerprint = config.fingerprint();
        Self {
            rules,
            matcher,
            fusion_cache,
            vector,
            generator,
            config,
            fingerprint,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    fn fuse_params(&self) -> FuseParams {
        FuseParams {
            threshold: self.config.confidence_threshold,
            max_evidence_length: self.config.max_evidence_length,
            rule_floor: self.config.rule_floor,
        }
    }

    /// Detect a single point in `text`. Always yields a result; every
    /// failure mode inside degrades to an absent signal or the zero
    /// result, so callers never need null-handling.
    pub async fn detect(&self, category: &str, point: &str, text: &str) -> FusionResult {
        let params = self.fuse_params();
        let key = cache::result_key_with_hint(category, point, text, &self.fingerprint);
        if let Some(cached) = self.fusion_cache.get(&key) {
            metrics::cache_hit("fusion");
            return cached;
        }
        metrics::cache_miss("fusion");

        let outcome = self.matcher.matches(category, point, text);
        debug!(
            category,
            point,
            rule_type = %outcome.rule_type,
            rule_confidence = outcome.signal.confidence,
            "rule matcher done"
        );

        // Confident rule hit: skip the slow collaborators.
        let result = if outcome.signal.hit && outcome.signal.confidence > RULE_SHORT_CIRCUIT {
            fuse(&outcome.signal, None, None, &params)
        } else {
            let vector_signal = if self.config.enable_vector_search {
                self.vector_signal(category, point, text).await
            } else {
                None
            };
            let llm_signal = if self.config.enable_llm_validation {
                self.llm_signal(category, point, text, &outcome, vector_signal.as_ref())
                    .await
            } else {
                None
            };
            fuse(
                &outcome.signal,
                vector_signal.as_ref(),
                llm_signal.as_ref(),
                &params,
            )
        };

        if result.confidence >= self.config.min_cache_confidence {
            self.fusion_cache.put(key, result.clone());
        }
        metrics::detection_completed(category);
        result
    }

    /// Fan out across every point of a dimension concurrently. A panicked
    /// task is converted to the zero result plus a warning; it never
    /// fails siblings. Dropping the returned future aborts in-flight
    /// point tasks (cooperative cancellation), and nothing partial is
    /// cached beyond the per-point entries already written.
    pub async fn detect_dimension(self: &Arc<Self>, category: &str, text: &str) -> DimensionReport {
        let Some(dim) = points::dimension(category) else {
            return DimensionReport {
                category: category.to_string(),
                results: Vec::new(),
                warnings: vec![format!("unknown dimension '{category}'")],
            };
        };

        let mut set = JoinSet::new();
        for point in dim.points {
            let engine = Arc::clone(self);
            let category = category.to_string();
            let text = text.to_string();
            let name = point.name;
            set.spawn(async move { (name, engine.detect(&category, name, &text).await) });
        }

        let mut finished: Vec<(&'static str, FusionResult)> = Vec::new();
        let mut errors: Vec<DetectionError> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, result)) => finished.push((name, result)),
                Err(e) => {
                    // Point name is lost with the task; record the detail
                    // and let the reassembly below fill the gap.
                    metrics::detection_failed(category);
                    errors.push(DetectionError::TaskFailed {
                        point: "<unknown>".to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }

        // Reassemble in catalog order; any point a failed task left
        // behind gets the well-defined zero result.
        let params = self.fuse_params();
        let mut warnings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        let results = dim
            .points
            .iter()
            .map(|p| {
                let result = finished
                    .iter()
                    .find(|(name, _)| *name == p.name)
                    .map(|(_, r)| r.clone())
                    .unwrap_or_else(|| {
                        let msg = format!("no result for point '{}', defaulting to miss", p.name);
                        error!(category, point = p.name, "{msg}");
                        warnings.push(msg);
                        fuse(&Signal::miss(SignalSource::Rule), None, None, &params)
                    });
                PointResult {
                    point: p.name.to_string(),
                    result,
                }
            })
            .collect();

        DimensionReport {
            category: category.to_string(),
            results,
            warnings,
        }
    }

    /// Administrative rule update. Appends and recompiles, then drops the
    /// affected cache entries so new matches see the updated rule.
    pub fn add_rule(
        &self,
        category: &str,
        point: &str,
        keywords: &[String],
        patterns: &[String],
    ) -> bool {
        if !self.rules.add_rule(category, point, keywords, patterns) {
            return false;
        }
        self.matcher.invalidate(category, point);
        self.fusion_cache
            .invalidate_prefix(&cache::point_prefix(category, point));
        true
    }

    /// One-off smoke test of the generator; logs the outcome, never
    /// panics. Useful at service startup.
    pub async fn probe_generator(&self) {
        match self
            .generator
            .generate("请回答：健康检查", 10, 0.0)
            .await
        {
            Ok(reply) => debug!(provider = self.generator.provider_name(), %reply, "generator probe ok"),
            Err(e) => warn!(provider = self.generator.provider_name(), error = %e, "generator probe failed"),
        }
    }

    async fn vector_signal(&self, category: &str, point: &str, text: &str) -> Option<Signal> {
        let label = points::dimension(category)
            .map(|d| d.label)
            .unwrap_or(category);
        let query = format!("{label}{point}");
        let hit: VectorHit = self.vector.search_similar(&query, text, category).await?;
        if hit.similarity <= 0.0 {
            return None;
        }
        Some(Signal::new(
            SignalSource::Vector,
            hit.similarity > 0.0,
            hit.similarity,
            hit.document,
        ))
    }

    /// Ask the validator about one point. Generation failures (after the
    /// wrapper's retries) mean "no signal"; an unparseable reply becomes
    /// the zero-confidence miss rather than a guess.
    async fn llm_signal(
        &self,
        category: &str,
        point: &str,
        text: &str,
        rule: &RuleOutcome,
        vector: Option<&Signal>,
    ) -> Option<Signal> {
        let description = points::point_description(category, point).unwrap_or(point);
        let prompt = validation_prompt(description, text, rule, vector);
        match self
            .generator
            .generate(&prompt, VALIDATOR_MAX_TOKENS, VALIDATOR_TEMPERATURE)
            .await
        {
            Ok(reply) => match parse_validator_reply(&reply) {
                Ok(parsed) => Some(Signal::new(
                    SignalSource::Llm,
                    parsed.hit,
                    parsed.confidence,
                    parsed.evidence,
                )),
                Err(e) => {
                    warn!(category, point, error = %e, "validator reply unusable");
                    Some(Signal::miss(SignalSource::Llm))
                }
            },
            Err(e) => {
                warn!(category, point, error = %e, "validator unavailable, no LLM signal");
                None
            }
        }
    }
}

/// Prompt for the validator: the point's question, the candidate text,
/// the required reply format, and the other signals for context. Replies
/// must quote the original text; placeholder "evidence" is rejected
/// downstream either way.
fn validation_prompt(
    description: &str,
    text: &str,
    rule: &RuleOutcome,
    vector: Option<&Signal>,
) -> String {
    let vector_line = vector
        .map(|v| format!("{:.2}", v.confidence))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "请分析以下销售对话文本，判断是否包含指定的检测要点。\n\
         \n\
         要点：{description}\n\
         \n\
         销售对话文本：\n{text}\n\
         \n\
         请按以下格式回答：\n\
         判定结果：是/否\n\
         置信度：0.0-1.0之间的数值\n\
         证据片段：如果判定为是，请提供具体的证据文本片段（不超过100字）\n\
         重要要求：证据片段必须直接摘自“销售对话文本”的原文，且不可为空，\
         也不可使用“无/N/A/NA/未知”等占位词；若无法给出原文证据，请返回“判定结果：否”。\n\
         理由：简要说明判定理由\n\
         \n\
         规则引擎结果：{} (置信度: {:.2})\n\
         向量检索结果：{vector_line}\n",
        rule.signal.hit, rule.signal.confidence,
    )
}
