//! Query fusion: combining ranked candidates from the vector index, the
//! episodic buffer, and a pluggable semantic ranker into one response.

/// The fusion coordinator.
pub mod coordinator;

use crate::config;
use crate::error::{EngineError, Result};

pub use coordinator::QueryCoordinator;

/// Which store produced a fused result.
///
/// Priority order for tie-breaking is vector, then semantic, then episodic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Vector,
    Semantic,
    Episodic,
}

impl ResultSource {
    /// Tie-break rank; lower wins.
    pub(crate) fn priority(&self) -> u8 {
        match self {
            ResultSource::Vector => 0,
            ResultSource::Semantic => 1,
            ResultSource::Episodic => 2,
        }
    }

    /// Wire name for the source tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Vector => "vector",
            ResultSource::Semantic => "semantic",
            ResultSource::Episodic => "episodic",
        }
    }
}

/// One entry in a fused ranking.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    /// The content under which sources were merged.
    pub content: String,
    /// Fused score in `[0, 1]`.
    pub score: f32,
    /// Highest-priority source that contributed this content.
    pub source: ResultSource,
}

/// Per-source weights for linear fusion.
///
/// Weights are non-negative and are normalized to sum to 1 before use, so
/// fused scores and the overall confidence stay in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector_weight: f32,
    pub episodic_weight: f32,
    pub semantic_weight: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector_weight: config::DEFAULT_VECTOR_WEIGHT,
            episodic_weight: config::DEFAULT_EPISODIC_WEIGHT,
            semantic_weight: config::DEFAULT_SEMANTIC_WEIGHT,
        }
    }
}

impl FusionWeights {
    /// Scale the weights to sum to 1. Negative or all-zero weights fail.
    pub fn normalized(&self) -> Result<FusionWeights> {
        if self.vector_weight < 0.0 || self.episodic_weight < 0.0 || self.semantic_weight < 0.0 {
            return Err(EngineError::InvalidParameter(
                "fusion weights must be non-negative".to_string(),
            ));
        }
        let sum = self.vector_weight + self.episodic_weight + self.semantic_weight;
        if sum <= f32::EPSILON {
            return Err(EngineError::InvalidParameter(
                "fusion weights must not all be zero".to_string(),
            ));
        }
        Ok(FusionWeights {
            vector_weight: self.vector_weight / sum,
            episodic_weight: self.episodic_weight / sum,
            semantic_weight: self.semantic_weight / sum,
        })
    }

    pub(crate) fn for_source(&self, source: ResultSource) -> f32 {
        match source {
            ResultSource::Vector => self.vector_weight,
            ResultSource::Semantic => self.semantic_weight,
            ResultSource::Episodic => self.episodic_weight,
        }
    }
}

/// Per-query options for [`QueryCoordinator::process_query`].
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Consult the episodic buffer.
    pub use_episodic: bool,
    /// Consult the semantic ranker, if one is attached.
    pub use_semantic: bool,
    /// Flag responses whose confidence falls below the threshold.
    pub check_hallucination: bool,
    /// Number of fused results to return.
    pub top_k_results: usize,
    /// Confidence floor for the hallucination flag.
    pub hallucination_threshold: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            use_episodic: true,
            use_semantic: true,
            check_hallucination: true,
            top_k_results: config::DEFAULT_TOP_K_RESULTS,
            hallucination_threshold: config::DEFAULT_HALLUCINATION_THRESHOLD,
        }
    }
}

/// The fused answer to a query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// The query text as asked.
    pub query: String,
    /// Top fused content; empty when nothing matched.
    pub response: String,
    /// Fused ranking, best first.
    pub results: Vec<ScoredResult>,
    /// Mean fused score of the returned results, in `[0, 1]`.
    pub overall_confidence: f32,
    /// Set when hallucination checking is on and confidence fell below the
    /// threshold. The results are still returned.
    pub low_confidence: bool,
}

/// Third ranker consulted during fusion.
///
/// Implementations may be backed by a concept graph, a second vector
/// index, or rules. Errors degrade gracefully: the coordinator logs them
/// and treats the source as having returned nothing.
pub trait SemanticRanker: Send + Sync {
    /// Ranked `(content, similarity)` pairs for the query embedding.
    fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>>;
}
