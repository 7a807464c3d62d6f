//! HNSW insertion: greedy descent, per-layer beam search, heuristic
//! neighbor selection, and bidirectional wiring with re-pruning.

use crate::error::{EngineError, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use std::cell::RefCell;

thread_local! {
    /// Reusable visited set for inserts; avoids a per-insert allocation.
    static INSERT_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

impl HnswIndex {
    /// Insert a vector under the given internal id.
    ///
    /// Ids are assigned by the caller in strictly increasing dense order;
    /// a duplicate or out-of-sequence id, a dimension mismatch, or a full
    /// index all fail before any mutation. The entry point moves to the new
    /// node when its sampled layer reaches the current top layer.
    pub fn insert(&mut self, internal_id: u64, embedding: &[f32]) -> Result<()> {
        self.check_dimension(embedding)?;
        if self.node_count as usize >= self.params.max_elements {
            return Err(EngineError::CapacityExhausted {
                max_elements: self.params.max_elements,
            });
        }
        let next = self.node_count as u64;
        if internal_id < next {
            return Err(EngineError::InvalidParameter(format!(
                "internal id {internal_id} already present"
            )));
        }
        if internal_id > next {
            return Err(EngineError::InvalidParameter(format!(
                "internal id {internal_id} out of sequence (expected {next})"
            )));
        }
        let id = internal_id as u32;
        let level = self.random_level();

        // First node: install as entry point and return.
        let Some(entry_point) = self.entry_point else {
            self.push_node(embedding, level, vec![Vec::new(); level + 1]);
            self.entry_point = Some(id);
            self.max_layer = level;
            return Ok(());
        };

        let top = level.min(self.max_layer);
        let node_neighbors = INSERT_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.grow(self.node_count as usize);

            // Phase 1: greedy descent from the top layer to level + 1.
            let mut current_ep = entry_point;
            for layer in (level + 1..=self.max_layer).rev() {
                let nearest = search_layer(
                    self,
                    embedding,
                    std::slice::from_ref(&current_ep),
                    1,
                    layer,
                    &mut visited,
                );
                if let Some(&(_, id)) = nearest.first() {
                    current_ep = id;
                }
            }

            // Phase 2: beam search each layer from `top` down to 0 and pick
            // the new node's neighbors; the candidates seed the next layer.
            let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
            let mut layer_eps: Vec<u32> = vec![current_ep];
            for layer in (0..=top).rev() {
                let candidates = search_layer(
                    self,
                    embedding,
                    &layer_eps,
                    self.params.ef_construction,
                    layer,
                    &mut visited,
                );
                let m_max = self.m_max_at(layer);
                let selected = select_neighbors_heuristic(self, &candidates, m_max);
                node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

                layer_eps.clear();
                layer_eps.extend(candidates.iter().map(|&(_, id)| id));
                if layer_eps.is_empty() {
                    layer_eps.push(entry_point);
                }
            }
            node_neighbors
        });

        self.push_node(embedding, level, node_neighbors);

        // Phase 3: wire back-edges and re-prune any overfull neighbor.
        for layer in 0..=top {
            let m_max = self.m_max_at(layer);
            let my_neighbors = self.neighbors[id as usize][layer].clone();
            for neighbor_id in my_neighbors {
                let nid = neighbor_id as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base = neighbor_id;
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (self.distance_between(base, cid), cid))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }

        // The newest node wins layer ties for the entry point.
        if level >= self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    fn push_node(&mut self, embedding: &[f32], level: usize, neighbors: Vec<Vec<u32>>) {
        self.vectors.extend_from_slice(embedding);
        self.layers.push(level as u8);
        self.neighbors.push(neighbors);
        self.deleted.push(false);
        self.node_count += 1;
    }

    #[inline]
    fn m_max_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    #[inline]
    fn distance_between(&self, a: u32, b: u32) -> f32 {
        self.params.space.distance(self.vector(a), self.vector(b))
    }
}

/// Diversifying neighbor selection.
///
/// Walks candidates in ascending distance and keeps one only if it is
/// closer to the base point than to every neighbor already kept; leftover
/// slots are backfilled with the closest rejected candidates so sparse
/// regions still reach full connectivity.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let diverse = selected.iter().all(|&(_, sid)| {
            dist_to_base <= index.params.space.distance(index.vector(cid), index.vector(sid))
        });
        if diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, sid)| sid == cid) {
                selected.push((dist, cid));
            }
        }
    }
    selected
}
