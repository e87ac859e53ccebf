// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod cache;
pub mod config;
pub mod detector;
pub mod evidence;
pub mod fusion;
pub mod llm;
pub mod matcher;
pub mod metrics;
pub mod rules;
pub mod signal;
pub mod vector;

// ---- Re-exports for stable public API ----
pub use crate::config::DetectionConfig;
pub use crate::detector::{DetectionEngine, DimensionReport, PointResult};
pub use crate::fusion::{fuse, FuseParams};
pub use crate::signal::{FusionResult, Signal, SignalSource};

use std::sync::Arc;

use crate::llm::{DisabledGenerator, GatedGenerator, OpenAiCompatProvider};
use crate::rules::RuleStore;
use crate::vector::DisabledVectorSearch;

/// Build an engine from the built-in rule seed, with both side
/// collaborators disabled. Good enough for rule-only audits, demos,
/// and tests; production callers wire their own services via
/// [`DetectionEngine::new`].
pub fn offline_engine(config: DetectionConfig) -> Arc<DetectionEngine> {
    let config = DetectionConfig {
        enable_vector_search: false,
        enable_llm_validation: false,
        ..config
    };
    Arc::new(DetectionEngine::new(
        Arc::new(RuleStore::default_seed()),
        Arc::new(DisabledVectorSearch),
        Arc::new(DisabledGenerator),
        config,
    ))
}

/// Build an engine with the built-in rule seed and the gated
/// OpenAI-compatible validator. Reads `OPENAI_API_KEY` and
/// `OPENAI_BASE_URL` from the environment; vector search stays off until
/// a real service is wired in.
pub fn engine_with_validator(config: DetectionConfig) -> Arc<DetectionEngine> {
    Arc::new(DetectionEngine::new(
        Arc::new(RuleStore::default_seed()),
        Arc::new(DisabledVectorSearch),
        Arc::new(GatedGenerator::new(OpenAiCompatProvider::new(None))),
        config,
    ))
}
