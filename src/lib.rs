//! # engram
//!
//! Embeddable cognitive retrieval engine: documents are ingested as dense
//! vector embeddings with metadata, and similarity queries are answered by
//! fusing three stores — an HNSW approximate nearest-neighbor index, a
//! bounded episodic memory of past interactions, and a pluggable semantic
//! ranker — under weighted linear score fusion.
//!
//! This is a synchronous core library with no async dependencies, suitable
//! for embedding directly in Rust or behind language bindings. All public
//! operations are safe to call from concurrent threads.

/// Global constants: limits, defaults, and tuning parameters.
pub mod config;
/// Stored document entries and search result types.
pub mod document;
/// Crate-level error type.
pub mod error;
/// Query fusion: weighted merging of ranked candidates from all stores.
pub mod fusion;
/// HNSW approximate nearest neighbor index.
pub mod hnsw;
/// Document index management: metadata, concurrency, persistence.
pub mod index;
/// Short-history memory structures.
pub mod memory;
/// Durable snapshots: binary graph codec plus JSON metadata sidecar.
pub mod storage;

pub use document::{DocumentEntry, SearchResult};
pub use error::{EngineError, Result};
pub use fusion::{
    FusionWeights, QueryConfig, QueryCoordinator, QueryResponse, ResultSource, ScoredResult,
    SemanticRanker,
};
pub use hnsw::{HnswIndex, HnswParams, SpaceType};
pub use index::{BatchResult, IndexConfig, IndexManager, IndexStats};
pub use memory::{Episode, EpisodicBuffer};
