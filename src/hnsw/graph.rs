//! HNSW graph structure and tuning parameters.
//!
//! [`HnswParams`] defines connectivity and beam widths; [`HnswIndex`] stores
//! the graph with a contiguous vector arena and per-node neighbor lists.
//! Nodes are addressed by dense internal ids assigned in insertion order;
//! ids are never reused, so a logically deleted node keeps its slot and
//! stays navigable while being excluded from results.

use crate::config;
use crate::error::{EngineError, Result};
use crate::hnsw::distance::SpaceType;

/// Tuning parameters for an HNSW index.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HnswParams {
    /// Number of bidirectional links per node above layer 0.
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Hard ceiling on graph layers.
    pub max_layers: usize,
    /// Upper bound on the number of nodes; inserts beyond this fail.
    pub max_elements: usize,
    /// Vector space for distance computation.
    pub space: SpaceType,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_MAX_LAYERS,
            max_elements: config::DEFAULT_MAX_ELEMENTS,
            space: SpaceType::InnerProduct,
        }
    }
}

/// Multi-layer navigable small-world graph over fixed-dimension vectors.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) params: HnswParams,
    pub(crate) dimension: usize,
    /// Vector arena: `node_count * dimension` floats, contiguous.
    pub(crate) vectors: Vec<f32>,
    /// Top layer of each node.
    pub(crate) layers: Vec<u8>,
    /// Adjacency: `neighbors[node][layer]` lists neighbor ids at that layer.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Tombstone bits; deleted nodes navigate but never surface.
    pub(crate) deleted: Vec<bool>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    pub(crate) node_count: u32,
}

impl HnswIndex {
    /// Creates an empty index over `dimension`-length vectors.
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            params,
            dimension,
            vectors: Vec::new(),
            layers: Vec::new(),
            neighbors: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
            node_count: 0,
        }
    }

    /// Number of live (non-deleted) nodes.
    pub fn len(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    /// Returns `true` if the index holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total nodes ever inserted, including tombstones.
    pub fn total_nodes(&self) -> usize {
        self.node_count as usize
    }

    /// Vector dimension this index was created with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Current tuning parameters.
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Adjust the search beam width for subsequent queries.
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    /// Sample a layer for a new node: `⌊-ln(U) / ln(M)⌋`, capped at one
    /// above the current top layer and by the hard layer ceiling.
    pub(crate) fn random_level(&self) -> usize {
        let ml = 1.0 / (self.params.m as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level
            .min(self.max_layer + 1)
            .min(self.params.max_layers.saturating_sub(1))
    }

    /// Vector slice for a node. O(1) into the contiguous arena.
    #[inline]
    pub(crate) fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Distance from `query` to the stored vector of `id`.
    #[inline]
    pub(crate) fn distance_to(&self, query: &[f32], id: u32) -> f32 {
        self.params.space.distance(query, self.vector(id))
    }

    #[inline]
    pub(crate) fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Flip the tombstone bit for a node. Returns `false` if out of bounds.
    pub(crate) fn mark_deleted(&mut self, internal_id: u64) -> bool {
        match self.deleted.get_mut(internal_id as usize) {
            Some(slot) => {
                *slot = true;
                true
            }
            None => false,
        }
    }

    /// Validate that `embedding` matches this index's dimension.
    #[inline]
    pub(crate) fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Validate structural invariants, used after deserializing a snapshot.
    ///
    /// Checks arena and per-node array lengths, neighbor and entry-point
    /// bounds, and per-node layer consistency.
    pub(crate) fn validate(&self) -> Result<()> {
        let nc = self.node_count as usize;
        if self.vectors.len() != nc * self.dimension {
            return Err(EngineError::Corrupt(format!(
                "vector arena holds {} floats, expected {} nodes x {} dims",
                self.vectors.len(),
                nc,
                self.dimension
            )));
        }
        if self.layers.len() != nc || self.neighbors.len() != nc || self.deleted.len() != nc {
            return Err(EngineError::Corrupt(format!(
                "per-node arrays inconsistent with node count {nc}"
            )));
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= nc {
                return Err(EngineError::Corrupt(format!(
                    "entry point {ep} out of bounds (node count {nc})"
                )));
            }
        } else if nc > 0 {
            return Err(EngineError::Corrupt(
                "nonempty graph without entry point".to_string(),
            ));
        }
        for (id, lists) in self.neighbors.iter().enumerate() {
            if lists.len() != self.layers[id] as usize + 1 {
                return Err(EngineError::Corrupt(format!(
                    "node {id} has {} neighbor lists but layer {}",
                    lists.len(),
                    self.layers[id]
                )));
            }
            for list in lists {
                for &n in list {
                    if n as usize >= nc {
                        return Err(EngineError::Corrupt(format!(
                            "node {id} references neighbor {n} out of bounds"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_index() {
        let idx = HnswIndex::new(8, HnswParams::default());
        assert_eq!(idx.dimension(), 8);
        assert_eq!(idx.total_nodes(), 0);
        assert!(idx.is_empty());
        assert!(idx.entry_point.is_none());
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_default_params() {
        let p = HnswParams::default();
        assert_eq!(p.m, 16);
        assert_eq!(p.m_max0, 32);
        assert_eq!(p.ef_construction, 200);
        assert_eq!(p.ef_search, 50);
        assert_eq!(p.space, SpaceType::InnerProduct);
    }

    #[test]
    fn test_random_level_caps_at_one_above_current_max() {
        let idx = HnswIndex::new(4, HnswParams::default());
        for _ in 0..200 {
            assert!(idx.random_level() <= idx.max_layer + 1);
        }
    }

    #[test]
    fn test_set_ef_search_floors_at_one() {
        let mut idx = HnswIndex::new(4, HnswParams::default());
        idx.set_ef_search(0);
        assert_eq!(idx.params().ef_search, 1);
        idx.set_ef_search(120);
        assert_eq!(idx.params().ef_search, 120);
    }

    #[test]
    fn test_check_dimension() {
        let idx = HnswIndex::new(4, HnswParams::default());
        assert!(idx.check_dimension(&[0.0; 4]).is_ok());
        assert!(matches!(
            idx.check_dimension(&[0.0; 3]),
            Err(EngineError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_mark_deleted_bounds() {
        let mut idx = HnswIndex::new(2, HnswParams::default());
        idx.insert(0, &[1.0, 0.0]).unwrap();
        assert!(idx.mark_deleted(0));
        assert!(idx.is_deleted(0));
        assert_eq!(idx.len(), 0);
        assert_eq!(idx.total_nodes(), 1);
        assert!(!idx.mark_deleted(7));
    }
}
