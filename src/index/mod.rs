//! Document index management: configuration, statistics, batch results,
//! and the thread-safe [`IndexManager`] over the HNSW graph.

/// The manager itself.
pub mod manager;

use crate::config;
use crate::error::{EngineError, Result};
use crate::hnsw::{HnswParams, SpaceType};
use std::path::PathBuf;
use std::time::Duration;

pub use manager::IndexManager;

/// Construction-time configuration for an [`IndexManager`].
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Embedding dimension, fixed for the manager's lifetime.
    pub embedding_dim: usize,
    /// Upper bound on insertions (tombstones included).
    pub max_elements: usize,
    /// HNSW connectivity.
    pub m: usize,
    /// HNSW construction beam width.
    pub ef_construction: usize,
    /// HNSW search beam width; adjustable at runtime.
    pub ef_search: usize,
    /// Vector space. Inner product stores unit-normalized vectors.
    pub space: SpaceType,
    /// Default snapshot location; `None` disables persistence.
    pub index_path: Option<PathBuf>,
    /// Snapshot automatically after `save_interval` of mutations.
    pub auto_save: bool,
    /// Minimum interval between automatic snapshots.
    pub save_interval: Duration,
    /// Documents ingested per write-lock acquisition in `add_batch`.
    pub batch_size: usize,
    /// Worker threads used by `search_batch`.
    pub num_threads: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_dim: config::DEFAULT_EMBEDDING_DIM,
            max_elements: config::DEFAULT_MAX_ELEMENTS,
            m: config::HNSW_DEFAULT_M,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            space: SpaceType::InnerProduct,
            index_path: None,
            auto_save: true,
            save_interval: Duration::from_secs(config::DEFAULT_SAVE_INTERVAL_SECS),
            batch_size: config::DEFAULT_BATCH_SIZE,
            num_threads: config::DEFAULT_NUM_THREADS,
        }
    }
}

impl IndexConfig {
    /// Check parameter ranges before constructing a manager.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 || self.embedding_dim > config::MAX_DIMENSION {
            return Err(EngineError::InvalidParameter(format!(
                "embedding_dim must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                self.embedding_dim
            )));
        }
        if self.max_elements == 0 {
            return Err(EngineError::InvalidParameter(
                "max_elements must be positive".to_string(),
            ));
        }
        if self.m < 2 {
            return Err(EngineError::InvalidParameter(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(EngineError::InvalidParameter(
                "ef_construction and ef_search must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 || self.num_threads == 0 {
            return Err(EngineError::InvalidParameter(
                "batch_size and num_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Derive graph parameters from this configuration.
    pub(crate) fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.m,
            m_max0: self.m * 2,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            max_layers: config::HNSW_MAX_LAYERS,
            max_elements: self.max_elements,
            space: self.space,
        }
    }
}

/// Point-in-time statistics for a manager.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Live documents (tombstones excluded).
    pub total_documents: usize,
    /// Graph nodes, tombstones included.
    pub total_vectors: usize,
    /// Estimated index memory: `total_vectors x dim x 4`.
    pub index_size_bytes: usize,
    /// Unix seconds of the most recent successful mutation.
    pub last_update: Option<u64>,
    /// Unix seconds the manager (or loaded snapshot) was created.
    pub created_at: u64,
}

/// Outcome of a batch ingest. Batches are not atomic: per-item failures are
/// reported here and earlier successes are kept.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// One message per failed item.
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl BatchResult {
    /// Fraction of items ingested successfully; 0 for an empty batch.
    pub fn success_rate(&self) -> f32 {
        if self.total > 0 {
            self.successful as f32 / self.total as f32
        } else {
            0.0
        }
    }
}
