//! Rule matcher: scores a candidate text against a point's keywords and
//! regex patterns independently, then merges the two into one rule signal.
//! Pure string work over a read-only rule snapshot; safe to call
//! concurrently for different points on the same text.

use std::sync::Arc;

use crate::cache::{self, BulkEvictCache, Cache};
use crate::evidence::{byte_span_window, char_len, char_window, truncate_quote};
use crate::metrics;
use crate::rules::{DetectionRule, RuleStore};
use crate::signal::{clamp01, Signal, SignalSource};

/// Context padding, in characters, around a matched keyword.
const KEYWORD_PAD: usize = 20;
/// Patterns get a wider window; a regex match usually spans a phrase.
const PATTERN_PAD: usize = 30;
/// Merged rule evidence is capped before fusion-level truncation.
const MAX_RULE_EVIDENCE: usize = 200;

/// A rule signal plus diagnostics: which matcher side(s) contributed and
/// the exact terms/patterns that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub signal: Signal,
    /// "keyword", "pattern", "keyword+pattern", "none", or "no_rule".
    pub rule_type: String,
    pub matched: Vec<String>,
}

impl RuleOutcome {
    fn no_rule() -> Self {
        Self {
            signal: Signal::miss(SignalSource::Rule),
            rule_type: "no_rule".to_string(),
            matched: Vec::new(),
        }
    }
}

/// One side's (keyword or pattern) raw score before merging.
#[derive(Debug, Clone, Default)]
struct SideScore {
    hit: bool,
    confidence: f32,
    evidence: String,
    matched: Vec<String>,
    label: &'static str,
}

pub struct RuleMatcher {
    store: Arc<RuleStore>,
    cache: BulkEvictCache<RuleOutcome>,
    min_cache_confidence: f32,
}

impl RuleMatcher {
    pub fn new(store: Arc<RuleStore>, cache_capacity: usize, evict_fraction: f32) -> Self {
        Self {
            store,
            cache: BulkEvictCache::new(cache_capacity, evict_fraction),
            min_cache_confidence: 0.3,
        }
    }

    pub fn with_min_cache_confidence(mut self, min: f32) -> Self {
        self.min_cache_confidence = clamp01(min);
        self
    }

    /// Score `text` against the rule for (category, point). A missing or
    /// empty rule yields the zeroed "no_rule" outcome, never an error.
    pub fn matches(&self, category: &str, point: &str, text: &str) -> RuleOutcome {
        let key = cache::result_key(category, point, text);
        if let Some(cached) = self.cache.get(&key) {
            metrics::cache_hit("rule");
            return cached;
        }
        metrics::cache_miss("rule");

        let rule = match self.store.get(category, point) {
            Some(r) if !r.is_empty() => r,
            _ => return RuleOutcome::no_rule(),
        };

        let keyword_score = score_keywords(text, &rule.keywords);
        let pattern_score = score_patterns(text, &rule);
        let outcome = merge_sides(keyword_score, pattern_score);

        // Only sufficiently confident results are worth remembering.
        if outcome.signal.confidence >= self.min_cache_confidence {
            self.cache.put(key, outcome.clone());
        }
        outcome
    }

    /// Drop cached results for one (category, point); called after the
    /// point's rule changes.
    pub fn invalidate(&self, category: &str, point: &str) {
        self.cache
            .invalidate_prefix(&cache::point_prefix(category, point));
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Case-insensitive substring scan for each keyword. Confidence scales
/// with the fraction of the keyword list that matched, boosted by 1.5.
fn score_keywords(text: &str, keywords: &[String]) -> SideScore {
    let mut score = SideScore {
        label: "keyword",
        ..Default::default()
    };
    if keywords.is_empty() {
        return score;
    }

    let text_chars: Vec<char> = text.chars().collect();
    let lowered: Vec<char> = text_chars.iter().map(|c| lower_char(*c)).collect();

    let mut evidences: Vec<String> = Vec::new();
    for keyword in keywords {
        let needle: Vec<char> = keyword.chars().map(lower_char).collect();
        if needle.is_empty() {
            continue;
        }
        if let Some(start) = find_chars(&lowered, &needle) {
            score.matched.push(keyword.clone());
            evidences.push(char_window(
                &text_chars,
                start,
                start + needle.len(),
                KEYWORD_PAD,
            ));
        }
    }

    if !score.matched.is_empty() {
        score.hit = true;
        score.confidence =
            (score.matched.len() as f32 / keywords.len() as f32 * 1.5).min(1.0);
        score.evidence = longest(evidences);
    }
    score
}

/// Whole-text regex matching. Every occurrence counts, so confidence can
/// saturate from a single repeated pattern; the 2.0 boost reflects that a
/// pattern hit is stronger evidence than a lone keyword.
fn score_patterns(text: &str, rule: &DetectionRule) -> SideScore {
    let mut score = SideScore {
        label: "pattern",
        ..Default::default()
    };
    if rule.patterns.is_empty() {
        return score;
    }

    let mut evidences: Vec<String> = Vec::new();
    for pattern in &rule.patterns {
        for m in pattern.regex.find_iter(text) {
            score.matched.push(pattern.raw.clone());
            evidences.push(byte_span_window(text, m.start(), m.end(), PATTERN_PAD));
        }
    }

    if !score.matched.is_empty() {
        score.hit = true;
        score.confidence =
            (score.matched.len() as f32 / rule.patterns.len() as f32 * 2.0).min(1.0);
        score.evidence = longest(evidences);
    }
    score
}

/// Merge the keyword and pattern sides: the higher-confidence side is
/// primary; when both hit, confidence blends 0.7/0.3 and the longer
/// evidence wins.
fn merge_sides(keyword: SideScore, pattern: SideScore) -> RuleOutcome {
    if !keyword.hit && !pattern.hit {
        return RuleOutcome {
            signal: Signal::miss(SignalSource::Rule),
            rule_type: "none".to_string(),
            matched: Vec::new(),
        };
    }

    let (primary, secondary) = if keyword.confidence >= pattern.confidence {
        (keyword, pattern)
    } else {
        (pattern, keyword)
    };

    let confidence = if secondary.hit {
        primary.confidence * 0.7 + secondary.confidence * 0.3
    } else {
        primary.confidence
    };

    let evidence = if char_len(&secondary.evidence) > char_len(&primary.evidence) {
        secondary.evidence.clone()
    } else {
        primary.evidence.clone()
    };

    let rule_type = if secondary.hit {
        format!("{}+{}", primary.label, secondary.label)
    } else {
        primary.label.to_string()
    };

    let mut matched = primary.matched;
    for m in secondary.matched {
        if !matched.contains(&m) {
            matched.push(m);
        }
    }

    RuleOutcome {
        signal: Signal::new(
            SignalSource::Rule,
            true,
            confidence.min(1.0),
            truncate_quote(&evidence, MAX_RULE_EVIDENCE),
        ),
        rule_type,
        matched,
    }
}

/// Per-char lowercasing that keeps a 1:1 char mapping, so match offsets in
/// the lowered text line up with the original.
fn lower_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn longest(candidates: Vec<String>) -> String {
    candidates
        .into_iter()
        .max_by_key(|e| char_len(e))
        .unwrap_or_default()
}
