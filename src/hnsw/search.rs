//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! Traversal keeps two priority queues — candidates ordered by closeness and
//! results ordered by farness — and terminates once the best remaining
//! candidate is farther than the worst kept result. Tombstoned nodes are
//! traversed for navigation but never emitted. Ties on distance are broken
//! toward the lower internal id so results are reproducible across reloads.

use crate::error::Result;
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Frontier entry: max-heap on negative distance = min-heap on distance.
/// Equal distances pop the lower id first.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Kept result: max-heap on distance, so `peek()` is the current worst.
/// Equal distances rank the higher id as worse.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search within a single layer.
///
/// Returns up to `ef` live nodes closest to `query`, ascending by distance.
/// `visited` is reset at the start of each call and must cover the index's
/// node count.
pub(crate) fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst kept distance, refreshed when the result heap changes.
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.visit(ep) {
            let dist = index.distance_to(query, ep);
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            if !index.is_deleted(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let node = candidate.id as usize;
        let Some(neighbor_list) = index.neighbors[node].get(layer) else {
            continue;
        };
        for &neighbor_id in neighbor_list {
            if !visited.visit(neighbor_id) {
                continue;
            }
            let dist = index.distance_to(query, neighbor_id);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                if !index.is_deleted(neighbor_id) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

impl HnswIndex {
    /// k-nearest-neighbor search.
    ///
    /// Returns at most `k` `(internal_id, similarity)` pairs ordered by
    /// decreasing similarity; ties go to the lower id. The beam width at
    /// layer 0 is `max(ef, k)`. An empty graph yields an empty list. Fails
    /// on dimension mismatch without touching graph state.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(u64, f32)>> {
        self.check_dimension(query)?;
        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut visited = VisitedSet::with_capacity(self.node_count as usize);
        let mut current_ep = entry_point;

        // Greedy descent: single-best-neighbor from the top layer down to 1.
        for layer in (1..=self.max_layer).rev() {
            let nearest = search_layer(
                self,
                query,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, id)) = nearest.first() {
                current_ep = id;
            }
        }

        let beam = ef.max(k).max(1);
        let mut found = search_layer(
            self,
            query,
            std::slice::from_ref(&current_ep),
            beam,
            0,
            &mut visited,
        );
        found.truncate(k);

        Ok(found
            .into_iter()
            .map(|(dist, id)| (id as u64, self.params.space.similarity(dist)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::hnsw::distance::SpaceType;
    use crate::hnsw::graph::HnswParams;

    fn unit(xs: &[f32]) -> Vec<f32> {
        let norm: f32 = xs.iter().map(|x| x * x).sum::<f32>().sqrt();
        xs.iter().map(|x| x / norm).collect()
    }

    fn small_index() -> HnswIndex {
        let mut idx = HnswIndex::new(2, HnswParams::default());
        idx.insert(0, &unit(&[1.0, 0.0])).unwrap();
        idx.insert(1, &unit(&[0.9, 0.436])).unwrap();
        idx.insert(2, &unit(&[0.0, 1.0])).unwrap();
        idx
    }

    #[test]
    fn test_search_empty_graph() {
        let idx = HnswIndex::new(4, HnswParams::default());
        assert!(idx.search(&[0.0; 4], 5, 50).unwrap().is_empty());
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let idx = small_index();
        assert!(matches!(
            idx.search(&[1.0, 0.0, 0.0], 1, 50),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_search_rank_order() {
        let idx = small_index();
        let results = idx.search(&unit(&[1.0, 0.0]), 3, 50).unwrap();
        let ids: Vec<u64> = results.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert!((results[1].1 - 0.9).abs() < 0.01);
        assert!(results[2].1 < 1e-5);
    }

    #[test]
    fn test_search_k_truncation() {
        let idx = small_index();
        let results = idx.search(&unit(&[1.0, 0.0]), 2, 50).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_k_zero() {
        let idx = small_index();
        assert!(idx.search(&unit(&[1.0, 0.0]), 0, 50).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_nodes_excluded_but_navigable() {
        let mut idx = small_index();
        idx.mark_deleted(0);
        let results = idx.search(&unit(&[1.0, 0.0]), 3, 50).unwrap();
        let ids: Vec<u64> = results.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_tie_break_prefers_lower_id() {
        let mut idx = HnswIndex::new(2, HnswParams::default());
        // Two identical vectors: equal similarity, id 0 must come first.
        idx.insert(0, &[1.0, 0.0]).unwrap();
        idx.insert(1, &[1.0, 0.0]).unwrap();
        idx.insert(2, &[0.0, 1.0]).unwrap();
        let results = idx.search(&[1.0, 0.0], 3, 50).unwrap();
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 1);
    }

    #[test]
    fn test_candidate_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            neg_distance: OrderedFloat(-0.5),
            id: 7,
        });
        heap.push(Candidate {
            neg_distance: OrderedFloat(-0.5),
            id: 3,
        });
        heap.push(Candidate {
            neg_distance: OrderedFloat(-0.1),
            id: 9,
        });
        // closest first; equal distances pop the lower id first
        assert_eq!(heap.pop().unwrap().id, 9);
        assert_eq!(heap.pop().unwrap().id, 3);
        assert_eq!(heap.pop().unwrap().id, 7);
    }

    #[test]
    fn test_result_entry_worst_on_top() {
        let mut heap = BinaryHeap::new();
        heap.push(ResultEntry {
            distance: OrderedFloat(0.2),
            id: 1,
        });
        heap.push(ResultEntry {
            distance: OrderedFloat(0.9),
            id: 2,
        });
        assert_eq!(heap.peek().unwrap().id, 2);
    }

    #[test]
    fn test_l2_space_search() {
        let mut params = HnswParams::default();
        params.space = SpaceType::L2;
        let mut idx = HnswIndex::new(2, params);
        idx.insert(0, &[0.0, 0.0]).unwrap();
        idx.insert(1, &[3.0, 4.0]).unwrap();
        let results = idx.search(&[0.0, 0.0], 2, 50).unwrap();
        assert_eq!(results[0].0, 0);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        // distance 5 -> similarity 1/6
        assert!((results[1].1 - 1.0 / 6.0).abs() < 1e-5);
    }
}
