//! Vector-search collaborator contract. The retrieval internals are
//! opaque to this engine; it only consumes the best-matching document and
//! its similarity. Implementations apply their own similarity threshold:
//! anything below it comes back as `None`, which the engine treats exactly
//! like "vector search disabled".

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Best match returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub document: String,
    pub similarity: f32,
}

#[async_trait]
pub trait VectorSearchService: Send + Sync {
    /// Search for text similar to `query` within `text`, scoped to a rule
    /// category. `None` means no result above the service's threshold.
    async fn search_similar(&self, query: &str, text: &str, category: &str) -> Option<VectorHit>;
}

pub type DynVectorSearch = Arc<dyn VectorSearchService>;

/// Always empty; used when vector search is disabled.
pub struct DisabledVectorSearch;

#[async_trait]
impl VectorSearchService for DisabledVectorSearch {
    async fn search_similar(&self, _query: &str, _text: &str, _category: &str) -> Option<VectorHit> {
        None
    }
}

/// Fixed-answer service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct FixtureVectorSearch {
    pub hit: Option<VectorHit>,
}

impl FixtureVectorSearch {
    pub fn with_hit(document: &str, similarity: f32) -> Self {
        Self {
            hit: Some(VectorHit {
                document: document.to_string(),
                similarity,
            }),
        }
    }
}

#[async_trait]
impl VectorSearchService for FixtureVectorSearch {
    async fn search_similar(&self, _query: &str, _text: &str, _category: &str) -> Option<VectorHit> {
        self.hit.clone()
    }
}
