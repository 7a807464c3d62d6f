//! The query fusion coordinator.
//!
//! Fans a query out to the vector index, the episodic buffer, and an
//! optional semantic ranker on scoped threads, rescales each source's
//! scores by that source's maximum, merges them under a shared content key
//! with weighted linear fusion, and emits a confidence-annotated response.
//! A failing episodic or semantic source contributes nothing; a failing
//! vector source fails the query.

use crate::error::Result;
use crate::fusion::{
    FusionWeights, QueryConfig, QueryResponse, ResultSource, ScoredResult, SemanticRanker,
};
use crate::index::IndexManager;
use crate::memory::EpisodicBuffer;
use std::collections::HashMap;
use std::sync::Arc;

/// Fuses ranked candidates from the three stores into a single ranking.
pub struct QueryCoordinator {
    manager: Arc<IndexManager>,
    episodic: Arc<EpisodicBuffer>,
    semantic: Option<Arc<dyn SemanticRanker>>,
    weights: FusionWeights,
}

impl QueryCoordinator {
    /// Create a coordinator over the given stores.
    ///
    /// Weights are validated here and normalized to sum to 1 before every
    /// fusion.
    pub fn new(
        manager: Arc<IndexManager>,
        episodic: Arc<EpisodicBuffer>,
        semantic: Option<Arc<dyn SemanticRanker>>,
        weights: FusionWeights,
    ) -> Result<Self> {
        weights.normalized()?;
        Ok(Self {
            manager,
            episodic,
            semantic,
            weights,
        })
    }

    /// Record an interaction in the episodic buffer.
    pub fn add_episode(
        &self,
        query: &str,
        response: &str,
        query_embedding: &[f32],
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.episodic
            .add_episode(query, response, query_embedding, metadata)
    }

    /// Answer a query by fusing all enabled sources.
    pub fn process_query(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        config: &QueryConfig,
    ) -> Result<QueryResponse> {
        let weights = self.weights.normalized()?;
        let k = config.top_k_results.max(1);

        // Fan out. The vector search is mandatory and its error is fatal;
        // the other sources degrade to empty contributions.
        let (vector, episodic, semantic) = std::thread::scope(|scope| {
            let vector_handle = scope.spawn(|| {
                self.manager
                    .search(query_embedding, k, 0.0)
                    .map(|hits| {
                        hits.into_iter()
                            .map(|r| (r.content, r.similarity))
                            .collect::<Vec<_>>()
                    })
            });
            let episodic_handle = config.use_episodic.then(|| {
                scope.spawn(|| {
                    self.episodic.search(query_embedding, k).map(|hits| {
                        hits.into_iter()
                            .map(|(episode, score)| (episode.response.clone(), score))
                            .collect::<Vec<_>>()
                    })
                })
            });
            let semantic_handle = (config.use_semantic && self.semantic.is_some()).then(|| {
                let ranker = self.semantic.as_ref().expect("checked is_some");
                scope.spawn(move || ranker.search(query_embedding, k))
            });

            let vector = vector_handle.join().expect("vector search panicked");
            let episodic = episodic_handle
                .map(|h| h.join().expect("episodic search panicked"))
                .unwrap_or_else(|| Ok(Vec::new()));
            let semantic = semantic_handle
                .map(|h| h.join().expect("semantic search panicked"))
                .unwrap_or_else(|| Ok(Vec::new()));
            (vector, episodic, semantic)
        });

        let vector = vector?;
        let episodic = episodic.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "episodic source failed; contributing nothing");
            Vec::new()
        });
        let semantic = semantic.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "semantic source failed; contributing nothing");
            Vec::new()
        });

        let sources = [
            (ResultSource::Vector, rescale_by_max(vector)),
            (ResultSource::Semantic, rescale_by_max(semantic)),
            (ResultSource::Episodic, rescale_by_max(episodic)),
        ];
        let mut results = fuse(&sources, &weights);
        results.truncate(config.top_k_results);

        let overall_confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32
        };
        let low_confidence =
            config.check_hallucination && overall_confidence < config.hallucination_threshold;
        if low_confidence {
            tracing::debug!(
                confidence = overall_confidence,
                threshold = config.hallucination_threshold,
                "response flagged as low confidence"
            );
        }

        Ok(QueryResponse {
            query: query_text.to_string(),
            response: results.first().map(|r| r.content.clone()).unwrap_or_default(),
            results,
            overall_confidence,
            low_confidence,
        })
    }
}

/// Rescale a source's scores to `[0, 1]` by dividing by its maximum.
fn rescale_by_max(mut hits: Vec<(String, f32)>) -> Vec<(String, f32)> {
    let max = hits.iter().map(|&(_, s)| s).fold(0.0f32, f32::max);
    if max > 0.0 {
        for (_, s) in hits.iter_mut() {
            *s = (*s / max).clamp(0.0, 1.0);
        }
    }
    hits
}

/// Weighted linear merge of per-source rankings under a shared content key.
///
/// Scores are assumed already rescaled to `[0, 1]`. Contents appearing in
/// several sources sum `weight x score` over the contributors; absent
/// sources contribute zero. Ordering is fused score descending, then
/// source priority (vector before semantic before episodic), then the
/// contributing source's original rank.
pub(crate) fn fuse(
    sources: &[(ResultSource, Vec<(String, f32)>)],
    weights: &FusionWeights,
) -> Vec<ScoredResult> {
    struct Merged {
        fused: f32,
        priority: u8,
        rank: usize,
        source: ResultSource,
    }

    let mut merged: HashMap<&str, Merged> = HashMap::new();
    for (source, hits) in sources {
        let weight = weights.for_source(*source);
        for (rank, (content, score)) in hits.iter().enumerate() {
            let contribution = weight * score;
            merged
                .entry(content.as_str())
                .and_modify(|m| {
                    m.fused += contribution;
                    if (source.priority(), rank) < (m.priority, m.rank) {
                        m.priority = source.priority();
                        m.rank = rank;
                        m.source = *source;
                    }
                })
                .or_insert(Merged {
                    fused: contribution,
                    priority: source.priority(),
                    rank,
                    source: *source,
                });
        }
    }

    let mut out: Vec<(Merged, String)> = merged
        .into_iter()
        .map(|(content, m)| (m, content.to_string()))
        .collect();
    out.sort_unstable_by(|a, b| {
        b.0.fused
            .partial_cmp(&a.0.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.priority.cmp(&b.0.priority))
            .then_with(|| a.0.rank.cmp(&b.0.rank))
            .then_with(|| a.1.cmp(&b.1))
    });
    out.into_iter()
        .map(|(m, content)| ScoredResult {
            content,
            score: m.fused.clamp(0.0, 1.0),
            source: m.source,
        })
        .collect()
}
