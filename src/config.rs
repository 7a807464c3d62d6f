//! Global configuration constants for engram.
//!
//! Tuning parameters, input validation limits, and persistence defaults are
//! defined here. Runtime configuration is handled via [`crate::index::IndexConfig`].

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Hard ceiling on the number of layers in the HNSW graph.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Default embedding dimension.
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Default upper bound on the number of vectors in one index.
pub const DEFAULT_MAX_ELEMENTS: usize = 100_000;

/// Default interval between automatic snapshots.
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;

/// Default number of documents ingested per write-lock acquisition in a batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default number of worker threads for batch search.
pub const DEFAULT_NUM_THREADS: usize = 4;

/// Default capacity of the episodic buffer.
pub const DEFAULT_EPISODIC_CAPACITY: usize = 128;

/// Default fusion weight for the vector source.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.4;

/// Default fusion weight for the episodic source.
pub const DEFAULT_EPISODIC_WEIGHT: f32 = 0.3;

/// Default fusion weight for the semantic source.
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.3;

/// Default number of fused results returned per query.
pub const DEFAULT_TOP_K_RESULTS: usize = 10;

/// Default confidence floor below which a response is flagged.
pub const DEFAULT_HALLUCINATION_THRESHOLD: f32 = 0.3;

/// Tolerance when re-checking that a stored vector is unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-6;
