//! # Detection rule store
//!
//! Maps `(category, point)` to a compiled set of keywords and regex
//! patterns. Rules load once from JSON and are shared read-only across
//! concurrent detections; the only mutation path is the administrative
//! [`RuleStore::add_rule`], which appends, recompiles, and swaps the
//! point's rule under a write lock.
//!
//! - Loads from a JSON config file; falls back to `default_seed()`.
//! - Malformed regex syntax is skipped with a warning, never fatal.
//! - Lookup hands out `Arc<DetectionRule>` snapshots, so in-flight
//!   matches keep working across an `add_rule`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

/// One regex pattern kept alongside its source text (diagnostics report
/// the source, matching uses the compiled form).
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub regex: Regex,
    pub raw: String,
}

/// Configuration for one (category, point): keyword list plus compiled
/// patterns. Immutable once built; `add_rule` replaces the whole value.
#[derive(Debug, Clone, Default)]
pub struct DetectionRule {
    pub keywords: Vec<String>,
    pub patterns: Vec<CompiledPattern>,
}

impl DetectionRule {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.patterns.is_empty()
    }
}

/// On-disk shape: `{ category: { point: { keywords, patterns } } }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

type RuleFileSpec = HashMap<String, HashMap<String, RuleSpec>>;

/// Aggregate counts over the loaded ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RuleStats {
    pub categories: usize,
    pub points: usize,
    pub keywords: usize,
    pub patterns: usize,
}

#[derive(Debug, Default)]
pub struct RuleStore {
    inner: RwLock<HashMap<String, HashMap<String, Arc<DetectionRule>>>>,
}

impl RuleStore {
    /// Load from a JSON file. Falls back to the built-in seed when the
    /// file is missing or unparseable (matching the config-or-seed
    /// behavior of the rest of the engine's config surface).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<RuleFileSpec>(&s) {
                Ok(spec) => Self::from_spec(spec),
                Err(e) => {
                    warn!(error = %e, "detection rules file unparseable, using seed");
                    Self::default_seed()
                }
            },
            Err(_) => Self::default_seed(),
        }
    }

    /// Build a store from a parsed spec, compiling patterns and skipping
    /// the malformed ones.
    pub fn from_spec(spec: RuleFileSpec) -> Self {
        let mut categories = HashMap::new();
        for (category, points) in spec {
            let mut compiled_points = HashMap::new();
            for (point, rule) in points {
                compiled_points.insert(point, Arc::new(compile_rule(&rule)));
            }
            categories.insert(category, compiled_points);
        }
        let store = Self {
            inner: RwLock::new(categories),
        };
        let stats = store.statistics();
        info!(
            categories = stats.categories,
            points = stats.points,
            keywords = stats.keywords,
            patterns = stats.patterns,
            "rule store ready"
        );
        store
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of the rule for a (category, point), if configured.
    pub fn get(&self, category: &str, point: &str) -> Option<Arc<DetectionRule>> {
        let g = self.inner.read().expect("rule store lock poisoned");
        g.get(category).and_then(|pts| pts.get(point)).cloned()
    }

    /// Append keywords/patterns to a point's rule, creating it on first
    /// use. Invalid patterns are skipped with a warning; the remaining
    /// additions still land. Callers must invalidate result caches for
    /// the point afterwards.
    pub fn add_rule(
        &self,
        category: &str,
        point: &str,
        keywords: &[String],
        patterns: &[String],
    ) -> bool {
        let mut g = match self.inner.write() {
            Ok(g) => g,
            Err(_) => {
                warn!(category, point, "rule store lock poisoned, add_rule refused");
                return false;
            }
        };
        let points = g.entry(category.to_string()).or_default();
        let current = points
            .get(point)
            .map(|r| r.as_ref().clone())
            .unwrap_or_default();

        let mut next = current;
        next.keywords.extend(keywords.iter().cloned());
        for raw in patterns {
            match compile_pattern(raw) {
                Some(p) => next.patterns.push(p),
                None => continue,
            }
        }
        points.insert(point.to_string(), Arc::new(next));
        info!(category, point, "rule updated");
        true
    }

    pub fn statistics(&self) -> RuleStats {
        let g = self.inner.read().expect("rule store lock poisoned");
        let mut stats = RuleStats {
            categories: g.len(),
            points: 0,
            keywords: 0,
            patterns: 0,
        };
        for points in g.values() {
            stats.points += points.len();
            for rule in points.values() {
                stats.keywords += rule.keywords.len();
                stats.patterns += rule.patterns.len();
            }
        }
        stats
    }

    /// Built-in ruleset for the icebreak and feature-deduction dimensions.
    /// Used as fallback when no rules file is present.
    pub fn default_seed() -> Self {
        let mut spec: RuleFileSpec = HashMap::new();

        let mut icebreak = HashMap::new();
        icebreak.insert(
            "professional_identity".to_string(),
            rule_spec(
                &[
                    "我是益盟操盘手",
                    "专员",
                    "老师",
                    "顾问",
                    "分析师",
                    "投资顾问",
                    "股票老师",
                    "操盘手",
                    "专业分析师",
                ],
                &[
                    r"我是.{0,10}(益盟|操盘手|专员|老师|顾问|分析师)",
                    r"(专业|资深).{0,5}(投资|股票|分析)",
                ],
            ),
        );
        icebreak.insert(
            "value_help".to_string(),
            rule_spec(
                &[
                    "帮您",
                    "帮助您",
                    "为您",
                    "给您",
                    "解决问题",
                    "带来收益",
                    "提升收益",
                    "把握机会",
                    "规避风险",
                    "获利",
                    "赚钱",
                ],
                &[
                    r"(帮您|帮助您|为您|给您).{0,20}(解决|提升|把握|获得|赚)",
                    r"让您.{0,15}(收益|获利|赚钱|盈利)",
                ],
            ),
        );
        icebreak.insert(
            "time_notice".to_string(),
            rule_spec(
                &[
                    "耽误您",
                    "占用您",
                    "打扰您",
                    "几分钟",
                    "两分钟",
                    "三分钟",
                    "一会儿",
                    "不会太久",
                    "很快",
                ],
                &[
                    r"(耽误|占用|打扰).{0,5}您.{0,10}(分钟|时间)",
                    r"(几|两|三|五).{0,2}分钟",
                ],
            ),
        );
        icebreak.insert(
            "company_background".to_string(),
            rule_spec(
                &[
                    "腾讯投资",
                    "上市公司",
                    "大公司",
                    "知名企业",
                    "行业领先",
                    "专业机构",
                    "权威平台",
                    "品牌",
                ],
                &[
                    r"腾讯.{0,5}投资.{0,5}(的|上市|公司)",
                    r"(上市|知名|大型).{0,5}公司",
                ],
            ),
        );
        icebreak.insert(
            "free_teach".to_string(),
            rule_spec(
                &[
                    "免费",
                    "不收费",
                    "不要钱",
                    "义务",
                    "公益",
                    "免费讲解",
                    "免费分析",
                    "免费指导",
                    "免费服务",
                ],
                &[
                    r"免费.{0,10}(讲解|分析|指导|服务|教学)",
                    r"(不收费|不要钱|义务).{0,5}(讲|教|指导)",
                ],
            ),
        );
        spec.insert("icebreak".to_string(), icebreak);

        let mut deduction = HashMap::new();
        deduction.insert(
            "bs_explained".to_string(),
            rule_spec(
                &[
                    "B点",
                    "S点",
                    "买卖点",
                    "操盘线",
                    "趋势信号",
                    "买入信号",
                    "卖出信号",
                    "买点",
                    "卖点",
                    "交易信号",
                ],
                &[
                    r"[BS]点.{0,20}(信号|提示|买|卖)",
                    r"(买卖点|操盘线|趋势信号|交易信号)",
                ],
            ),
        );
        deduction.insert(
            "period_resonance_explained".to_string(),
            rule_spec(
                &[
                    "周期",
                    "共振",
                    "时间级别",
                    "日线",
                    "周线",
                    "月线",
                    "短期",
                    "中期",
                    "长期",
                    "多周期",
                    "时段",
                ],
                &[
                    r"(周期|共振).{0,15}(分析|研判|配合)",
                    r"(日|周|月)线.{0,10}(配合|共振|分析)",
                    r"(短|中|长)期.{0,10}(趋势|周期)",
                ],
            ),
        );
        deduction.insert(
            "control_funds_explained".to_string(),
            rule_spec(
                &[
                    "主力资金",
                    "控盘资金",
                    "筹码分布",
                    "资金流向",
                    "大资金",
                    "机构资金",
                    "庄家",
                    "主力",
                    "热钱",
                ],
                &[
                    r"(主力|控盘|机构).{0,5}资金",
                    r"筹码.{0,10}(分布|集中|分散)",
                    r"资金.{0,10}(流向|进出|动向)",
                ],
            ),
        );
        deduction.insert(
            "bubugao_explained".to_string(),
            rule_spec(
                &[
                    "步步高",
                    "VIP",
                    "专属指标",
                    "高级功能",
                    "付费功能",
                    "会员功能",
                    "特色指标",
                ],
                &[
                    r"步步高.{0,20}(功能|指标|信号)",
                    r"VIP.{0,10}(专属|功能|指标)",
                    r"(会员|付费).{0,10}(功能|指标)",
                ],
            ),
        );
        deduction.insert(
            "value_quantify_explained".to_string(),
            rule_spec(
                &[
                    "量化价值",
                    "实盘",
                    "真实案例",
                    "历史回测",
                    "收益率",
                    "成功率",
                    "胜率",
                    "盈亏比",
                    "实际效果",
                    "数据证明",
                ],
                &[
                    r"(实盘|真实).{0,10}(案例|效果|收益)",
                    r"(成功率|胜率|收益率).{0,5}\d+%",
                    r"(历史|过往).{0,10}(数据|表现|收益)",
                ],
            ),
        );
        deduction.insert(
            "customer_stock_explained".to_string(),
            rule_spec(
                &[
                    "您的股票",
                    "您持有的",
                    "咱们看看",
                    "分析一下",
                    "您的持仓",
                    "这只股票",
                    "您买的",
                    "您关注的",
                ],
                &[
                    r"(您的|您持有的|您买的).{0,10}股票",
                    r"(咱们|我们).{0,5}(看|分析).{0,5}(您的|这只)",
                    r"您.{0,5}(持仓|关注的).{0,10}股票",
                ],
            ),
        );
        spec.insert("deduction".to_string(), deduction);

        Self::from_spec(spec)
    }
}

fn rule_spec(keywords: &[&str], patterns: &[&str]) -> RuleSpec {
    RuleSpec {
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        patterns: patterns.iter().map(|s| s.to_string()).collect(),
    }
}

fn compile_rule(spec: &RuleSpec) -> DetectionRule {
    DetectionRule {
        keywords: spec.keywords.clone(),
        patterns: spec.patterns.iter().filter_map(|p| compile_pattern(p)).collect(),
    }
}

/// Compile one pattern, case-insensitive. Returns `None` (with a warning)
/// on invalid syntax so the rest of the ruleset keeps working.
fn compile_pattern(raw: &str) -> Option<CompiledPattern> {
    match Regex::new(&format!("(?i){raw}")) {
        Ok(regex) => Some(CompiledPattern {
            regex,
            raw: raw.to_string(),
        }),
        Err(e) => {
            warn!(pattern = raw, error = %e, "skipping malformed rule pattern");
            None
        }
    }
}
