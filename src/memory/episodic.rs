//! Bounded episodic memory over past query/response interactions.
//!
//! A fixed-capacity FIFO: the oldest episode is evicted when a new one
//! would overflow. Retrieval is a brute-force cosine scan over the stored
//! query embeddings with a top-k partial sort; the buffer is small, so a
//! linear pass beats maintaining a graph. The buffer has its own mutex and
//! never touches the index manager's lock.

use crate::config;
use crate::document::unix_now;
use crate::error::{EngineError, Result};
use crate::hnsw::distance::cosine;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

/// One remembered interaction.
#[derive(Debug, Clone)]
pub struct Episode {
    /// The query text as asked.
    pub query: String,
    /// The response that was produced.
    pub response: String,
    /// Embedding of the query, used for retrieval.
    pub embedding: Vec<f32>,
    /// Free-form annotations.
    pub metadata: HashMap<String, String>,
    /// Unix seconds at insertion.
    pub timestamp: u64,
    /// Monotonic insertion counter; newer episodes win similarity ties.
    pub sequence: u64,
}

/// Fixed-capacity FIFO of episodes with vector-similarity lookup.
pub struct EpisodicBuffer {
    dimension: usize,
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    episodes: VecDeque<Arc<Episode>>,
    next_sequence: u64,
}

impl EpisodicBuffer {
    /// Create a buffer holding at most `capacity` episodes of
    /// `dimension`-length embeddings.
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                episodes: VecDeque::with_capacity(capacity.max(1)),
                next_sequence: 0,
            }),
        }
    }

    /// Create a buffer with the default capacity.
    pub fn with_default_capacity(dimension: usize) -> Self {
        Self::new(dimension, config::DEFAULT_EPISODIC_CAPACITY)
    }

    /// Append an interaction, evicting the oldest episode on overflow.
    pub fn add_episode(
        &self,
        query: &str,
        response: &str,
        embedding: &[f32],
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        let mut inner = self.inner.lock();
        if inner.episodes.len() >= self.capacity {
            inner.episodes.pop_front();
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.episodes.push_back(Arc::new(Episode {
            query: query.to_string(),
            response: response.to_string(),
            embedding: embedding.to_vec(),
            metadata,
            timestamp: unix_now(),
            sequence,
        }));
        Ok(())
    }

    /// Top-k episodes by cosine similarity to `query_embedding`, most
    /// similar first; ties go to the more recent episode.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<(Arc<Episode>, f32)>> {
        if query_embedding.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: query_embedding.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock();

        // Partial sort: min-heap of size k over (score, sequence).
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, u64, usize)>> =
            BinaryHeap::with_capacity(k + 1);
        for (idx, episode) in inner.episodes.iter().enumerate() {
            let score = cosine(query_embedding, &episode.embedding);
            heap.push(Reverse((OrderedFloat(score), episode.sequence, idx)));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut hits: Vec<(Arc<Episode>, f32)> = heap
            .into_iter()
            .map(|Reverse((score, _, idx))| (Arc::clone(&inner.episodes[idx]), score.0))
            .collect();
        hits.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.sequence.cmp(&a.0.sequence))
        });
        Ok(hits)
    }

    /// Number of episodes currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().episodes.len()
    }

    /// Returns `true` if no episodes are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of episodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every episode. The sequence counter keeps counting.
    pub fn clear(&self) {
        self.inner.lock().episodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(buffer: &EpisodicBuffer, query: &str, embedding: &[f32]) {
        buffer
            .add_episode(query, "response", embedding, HashMap::new())
            .unwrap();
    }

    #[test]
    fn test_add_and_len() {
        let buffer = EpisodicBuffer::new(2, 10);
        assert!(buffer.is_empty());
        add(&buffer, "q1", &[1.0, 0.0]);
        add(&buffer, "q2", &[0.0, 1.0]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_fifo_eviction() {
        let buffer = EpisodicBuffer::new(2, 3);
        for i in 0..5 {
            add(&buffer, &format!("q{i}"), &[1.0, i as f32]);
        }
        assert_eq!(buffer.len(), 3);
        // the earliest two are gone, the latest three remain
        let hits = buffer.search(&[1.0, 0.0], 10).unwrap();
        let queries: Vec<&str> = hits.iter().map(|(e, _)| e.query.as_str()).collect();
        assert!(!queries.contains(&"q0"));
        assert!(!queries.contains(&"q1"));
        for q in ["q2", "q3", "q4"] {
            assert!(queries.contains(&q), "missing {q}");
        }
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let buffer = EpisodicBuffer::new(2, 10);
        add(&buffer, "aligned", &[1.0, 0.0]);
        add(&buffer, "diagonal", &[1.0, 1.0]);
        add(&buffer, "orthogonal", &[0.0, 1.0]);

        let hits = buffer.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].0.query, "aligned");
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].0.query, "diagonal");
        assert_eq!(hits[2].0.query, "orthogonal");
    }

    #[test]
    fn test_search_truncates_to_k() {
        let buffer = EpisodicBuffer::new(2, 10);
        for i in 0..6 {
            add(&buffer, &format!("q{i}"), &[1.0, i as f32 * 0.1]);
        }
        assert_eq!(buffer.search(&[1.0, 0.0], 4).unwrap().len(), 4);
        assert!(buffer.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_tie_breaks_more_recent_first() {
        let buffer = EpisodicBuffer::new(2, 10);
        add(&buffer, "older", &[1.0, 0.0]);
        add(&buffer, "newer", &[1.0, 0.0]);
        let hits = buffer.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0.query, "newer");
        assert_eq!(hits[1].0.query, "older");
    }

    #[test]
    fn test_dimension_mismatch() {
        let buffer = EpisodicBuffer::new(3, 10);
        assert!(matches!(
            buffer.add_episode("q", "r", &[1.0, 0.0], HashMap::new()),
            Err(EngineError::DimensionMismatch { .. })
        ));
        assert!(buffer.search(&[1.0], 5).is_err());
    }

    #[test]
    fn test_clear() {
        let buffer = EpisodicBuffer::new(2, 10);
        add(&buffer, "q", &[1.0, 0.0]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_default_capacity() {
        let buffer = EpisodicBuffer::with_default_capacity(8);
        assert_eq!(buffer.capacity(), 128);
    }

    #[test]
    fn test_capacity_floor() {
        let buffer = EpisodicBuffer::new(2, 0);
        assert_eq!(buffer.capacity(), 1);
        add(&buffer, "a", &[1.0, 0.0]);
        add(&buffer, "b", &[0.0, 1.0]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_metadata_preserved() {
        let buffer = EpisodicBuffer::new(2, 4);
        let mut meta = HashMap::new();
        meta.insert("channel".to_string(), "chat".to_string());
        buffer
            .add_episode("q", "r", &[1.0, 0.0], meta)
            .unwrap();
        let hits = buffer.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].0.metadata["channel"], "chat");
        assert_eq!(hits[0].0.response, "r");
    }
}
