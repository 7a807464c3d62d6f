//! Thread-safe document index manager.
//!
//! Wraps the HNSW graph with external document ids, metadata records,
//! logical deletion, durable snapshots, and interval-based auto-save.
//! One `parking_lot::RwLock` guards all state: mutations take the writer
//! lock, lookups share the reader lock. The graph itself has no internal
//! locking.

use crate::document::{augment_metadata, content_of, unix_now, DocumentEntry, SearchResult};
use crate::error::{EngineError, Result};
use crate::hnsw::{HnswIndex, SpaceType};
use crate::hnsw::distance::normalize;
use crate::index::{BatchResult, IndexConfig, IndexStats};
use crate::storage::codec::{self, ManagerInfo, MANAGER_KEY};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything guarded by the manager lock.
struct ManagerState {
    config: IndexConfig,
    index: HnswIndex,
    /// doc_id -> stored entry (internal id + metadata record).
    documents: HashMap<String, DocumentEntry>,
    /// Dense reverse map, indexed by internal id. Tombstoned slots go
    /// stale but are never surfaced because the graph filters deleted
    /// nodes from results.
    internal_to_doc: Vec<String>,
    created_at: u64,
    last_update: Option<u64>,
    last_save: Instant,
}

/// Concurrency-safe policy layer over the HNSW index.
///
/// All operations may be called from multiple threads. Operations against
/// a single manager are linearizable: mutations serialize on the writer
/// lock and reads see every previously completed mutation.
pub struct IndexManager {
    /// Immutable copies for lock-free input validation.
    dim: usize,
    space: SpaceType,
    batch_size: usize,
    num_threads: usize,
    state: RwLock<ManagerState>,
}

impl IndexManager {
    /// Create a manager. If `index_path` points at an existing snapshot it
    /// is loaded best-effort; a broken snapshot is logged and the manager
    /// starts empty.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let manager = Self {
            dim: config.embedding_dim,
            space: config.space,
            batch_size: config.batch_size,
            num_threads: config.num_threads,
            state: RwLock::new(ManagerState {
                index: HnswIndex::new(config.embedding_dim, config.hnsw_params()),
                documents: HashMap::new(),
                internal_to_doc: Vec::new(),
                created_at: unix_now(),
                last_update: None,
                last_save: Instant::now(),
                config,
            }),
        };

        let existing = {
            let state = manager.state.read();
            state
                .config
                .index_path
                .as_ref()
                .filter(|p| p.exists())
                .cloned()
        };
        if let Some(path) = existing {
            if let Err(e) = manager.load_from(&path, false) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not load existing snapshot; starting empty"
                );
            }
        }
        Ok(manager)
    }

    /// Validate and copy an embedding, normalizing it for IP space.
    fn prepare_embedding(&self, embedding: &[f32]) -> Result<Vec<f32>> {
        if embedding.len() != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        let mut v = embedding.to_vec();
        if self.space.normalizes() && !normalize(&mut v) {
            return Err(EngineError::InvalidParameter(
                "zero vector cannot be normalized for inner-product space".to_string(),
            ));
        }
        Ok(v)
    }

    fn check_doc_id(doc_id: &str) -> Result<()> {
        if doc_id.is_empty() {
            return Err(EngineError::EmptyDocumentId);
        }
        if doc_id == MANAGER_KEY {
            return Err(EngineError::InvalidParameter(format!(
                "document id '{MANAGER_KEY}' is reserved"
            )));
        }
        Ok(())
    }

    /// Ingest one document. Fails on empty or duplicate id, dimension
    /// mismatch, or a full index; nothing is mutated on failure.
    pub fn add_document(
        &self,
        doc_id: &str,
        embedding: &[f32],
        content: &str,
        metadata: Value,
    ) -> Result<()> {
        Self::check_doc_id(doc_id)?;
        let embedding = self.prepare_embedding(embedding)?;
        let record = augment_metadata(doc_id, content, metadata);

        let mut state = self.state.write();
        insert_locked(&mut state, doc_id, &embedding, record)?;
        maybe_autosave(&mut state);
        Ok(())
    }

    /// Ingest many documents.
    ///
    /// Parallel arrays of mismatched length fail the whole batch before any
    /// mutation. Otherwise items are ingested in `batch_size` chunks, each
    /// under its own writer-lock acquisition so readers interleave;
    /// per-item failures are collected in the result and earlier successes
    /// are kept.
    pub fn add_batch(
        &self,
        doc_ids: &[String],
        embeddings: &[Vec<f32>],
        contents: &[String],
        metadatas: Option<&[Value]>,
    ) -> Result<BatchResult> {
        let started = Instant::now();
        let total = doc_ids.len();
        if embeddings.len() != total {
            return Err(EngineError::BatchLengthMismatch {
                what: "embeddings",
                expected: total,
                actual: embeddings.len(),
            });
        }
        if contents.len() != total {
            return Err(EngineError::BatchLengthMismatch {
                what: "contents",
                expected: total,
                actual: contents.len(),
            });
        }
        if let Some(metas) = metadatas {
            if metas.len() != total {
                return Err(EngineError::BatchLengthMismatch {
                    what: "metadatas",
                    expected: total,
                    actual: metas.len(),
                });
            }
        }

        let mut result = BatchResult {
            total,
            ..BatchResult::default()
        };
        for chunk_start in (0..total).step_by(self.batch_size) {
            let chunk_end = (chunk_start + self.batch_size).min(total);

            // Metadata preparation happens outside the lock.
            let mut prepared: Vec<(usize, Result<(Vec<f32>, Value)>)> =
                Vec::with_capacity(chunk_end - chunk_start);
            for i in chunk_start..chunk_end {
                let item = Self::check_doc_id(&doc_ids[i])
                    .and_then(|()| self.prepare_embedding(&embeddings[i]))
                    .map(|emb| {
                        let meta = metadatas.map_or(Value::Null, |m| m[i].clone());
                        (emb, augment_metadata(&doc_ids[i], &contents[i], meta))
                    });
                prepared.push((i, item));
            }

            let mut state = self.state.write();
            for (i, item) in prepared {
                let outcome = match item {
                    Ok((embedding, record)) => {
                        insert_locked(&mut state, &doc_ids[i], &embedding, record)
                    }
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(()) => result.successful += 1,
                    Err(e) => {
                        result.failed += 1;
                        result.errors.push(format!("'{}': {e}", doc_ids[i]));
                    }
                }
            }
            maybe_autosave(&mut state);
        }

        result.elapsed = started.elapsed();
        tracing::debug!(
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "batch ingest finished"
        );
        Ok(result)
    }

    /// k-NN search over live documents.
    ///
    /// With `threshold > 0`, results scoring below it are dropped, so the
    /// list may be shorter than `top_k`.
    pub fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Result<Vec<SearchResult>> {
        let query = self.prepare_embedding(query)?;
        let state = self.state.read();
        let ef = state.index.params().ef_search;
        let hits = state.index.search(&query, top_k, ef)?;

        Ok(hits
            .into_iter()
            .filter(|&(_, similarity)| threshold <= 0.0 || similarity >= threshold)
            .filter_map(|(internal_id, similarity)| {
                let doc_id = state.internal_to_doc.get(internal_id as usize)?;
                let entry = state.documents.get(doc_id)?;
                Some(SearchResult {
                    doc_id: doc_id.clone(),
                    content: content_of(&entry.metadata),
                    similarity,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect())
    }

    /// Run many queries, spread over `num_threads` worker threads. Each
    /// query takes its own reader lock, so writers can interleave between
    /// queries.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        top_k: usize,
    ) -> Result<Vec<Vec<SearchResult>>> {
        for q in queries {
            if q.len() != self.dim {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dim,
                    actual: q.len(),
                });
            }
        }
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = queries.len().div_ceil(self.num_threads);
        let chunks: Vec<Result<Vec<Vec<SearchResult>>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = queries
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|q| self.search(q, top_k, 0.0))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("search worker panicked"))
                .collect()
        });

        let mut out = Vec::with_capacity(queries.len());
        for chunk in chunks {
            out.extend(chunk?);
        }
        Ok(out)
    }

    /// Logically delete a document: its metadata is removed and its graph
    /// node is tombstoned. Graph space is not reclaimed.
    pub fn delete_document(&self, doc_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let entry = state
            .documents
            .remove(doc_id)
            .ok_or_else(|| EngineError::DocumentNotFound(doc_id.to_string()))?;
        state.index.mark_deleted(entry.internal_id);
        state.last_update = Some(unix_now());
        maybe_autosave(&mut state);
        Ok(())
    }

    /// Replace a document: logical delete plus reinsert. The document is
    /// assigned a fresh internal id.
    pub fn update_document(
        &self,
        doc_id: &str,
        embedding: &[f32],
        content: &str,
        metadata: Value,
    ) -> Result<()> {
        Self::check_doc_id(doc_id)?;
        let embedding = self.prepare_embedding(embedding)?;
        let record = augment_metadata(doc_id, content, metadata);

        let mut state = self.state.write();
        if !state.documents.contains_key(doc_id) {
            return Err(EngineError::DocumentNotFound(doc_id.to_string()));
        }
        // Reinsert must succeed once the old node is gone; check capacity
        // first so a full index leaves the document untouched.
        if state.index.total_nodes() >= state.config.max_elements {
            return Err(EngineError::CapacityExhausted {
                max_elements: state.config.max_elements,
            });
        }
        let old = state.documents.remove(doc_id).expect("checked above");
        state.index.mark_deleted(old.internal_id);
        insert_locked(&mut state, doc_id, &embedding, record)?;
        maybe_autosave(&mut state);
        Ok(())
    }

    /// Fetch a document's metadata record, or `None` if absent.
    pub fn get_document(&self, doc_id: &str) -> Option<Value> {
        self.state
            .read()
            .documents
            .get(doc_id)
            .map(|e| e.metadata.clone())
    }

    /// Whether a live document with this id exists.
    pub fn has_document(&self, doc_id: &str) -> bool {
        self.state.read().documents.contains_key(doc_id)
    }

    /// Number of live documents.
    pub fn document_count(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Snapshot to the default path. Fails if persistence is disabled.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.write();
        save_locked(&mut state)
    }

    /// Snapshot to `path`; with `update_default` the path becomes the new
    /// default for subsequent `save`/`load`.
    pub fn save_as(&self, path: &Path, update_default: bool) -> Result<()> {
        let mut state = self.state.write();
        let old = state.config.index_path.replace(path.to_path_buf());
        let outcome = save_locked(&mut state);
        if outcome.is_err() || !update_default {
            state.config.index_path = old;
        }
        outcome
    }

    /// Load the snapshot at the default path, replacing in-memory state.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.write();
        let path = state
            .config
            .index_path
            .clone()
            .ok_or(EngineError::PersistenceDisabled)?;
        let loaded = load_parts(&path, &state.config)?;
        commit_loaded(&mut state, loaded);
        Ok(())
    }

    /// Load the snapshot at `path`.
    ///
    /// The candidate state is built beside the current one and committed in
    /// one swap, so a failing load leaves the manager exactly as it was.
    /// A nonexistent path fails unless `update_default` is set, in which
    /// case the manager resets to a fresh empty index rooted at the new
    /// default path.
    pub fn load_from(&self, path: &Path, update_default: bool) -> Result<()> {
        let mut state = self.state.write();
        if !path.exists() {
            if !update_default {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("snapshot not found: {}", path.display()),
                )));
            }
            state.config.index_path = Some(path.to_path_buf());
            let dim = state.config.embedding_dim;
            let params = state.config.hnsw_params();
            state.index = HnswIndex::new(dim, params);
            state.documents.clear();
            state.internal_to_doc.clear();
            state.created_at = unix_now();
            state.last_update = None;
            return Ok(());
        }

        let loaded = load_parts(path, &state.config)?;
        commit_loaded(&mut state, loaded);
        if update_default {
            state.config.index_path = Some(path.to_path_buf());
        }
        Ok(())
    }

    /// Change the default snapshot path. `None` disables persistence.
    pub fn set_index_path(&self, path: Option<PathBuf>) {
        self.state.write().config.index_path = path;
    }

    /// Drop all documents and rebuild an empty graph with the current
    /// parameters. On-disk snapshots are untouched.
    pub fn clear(&self) {
        let mut state = self.state.write();
        let dim = state.config.embedding_dim;
        let params = state.config.hnsw_params();
        state.index = HnswIndex::new(dim, params);
        state.documents.clear();
        state.internal_to_doc.clear();
        state.last_update = Some(unix_now());
    }

    /// Point-in-time statistics.
    pub fn get_stats(&self) -> IndexStats {
        let state = self.state.read();
        let total_vectors = state.index.total_nodes();
        IndexStats {
            total_documents: state.documents.len(),
            total_vectors,
            index_size_bytes: total_vectors * state.config.embedding_dim * 4,
            last_update: state.last_update,
            created_at: state.created_at,
        }
    }

    /// Adjust the search beam width for subsequent queries.
    pub fn set_ef_search(&self, ef_search: usize) {
        let mut state = self.state.write();
        state.config.ef_search = ef_search.max(1);
        state.index.set_ef_search(ef_search);
    }

    /// Current configuration (with any runtime adjustments applied).
    pub fn config(&self) -> IndexConfig {
        self.state.read().config.clone()
    }
}

impl Drop for IndexManager {
    /// Final snapshot on shutdown when auto-save is enabled.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.config.auto_save && state.config.index_path.is_some() {
            if let Err(e) = save_locked(state) {
                tracing::warn!(error = %e, "final auto-save on drop failed");
            }
        }
    }
}

/// Insert one prepared document. Caller holds the writer lock.
fn insert_locked(
    state: &mut ManagerState,
    doc_id: &str,
    embedding: &[f32],
    record: Value,
) -> Result<()> {
    if state.documents.contains_key(doc_id) {
        return Err(EngineError::DuplicateDocument(doc_id.to_string()));
    }
    let internal_id = state.index.total_nodes() as u64;
    state.index.insert(internal_id, embedding)?;
    state.internal_to_doc.push(doc_id.to_string());
    state.documents.insert(
        doc_id.to_string(),
        DocumentEntry {
            internal_id,
            metadata: record,
        },
    );
    state.last_update = Some(unix_now());
    Ok(())
}

/// Snapshot under the writer lock and refresh the auto-save clock.
fn save_locked(state: &mut ManagerState) -> Result<()> {
    let path = state
        .config
        .index_path
        .clone()
        .ok_or(EngineError::PersistenceDisabled)?;
    codec::write_index(&state.index, &path)?;
    codec::write_sidecar(
        &path,
        &state.documents,
        &ManagerInfo {
            created_at: state.created_at,
            embedding_dim: state.config.embedding_dim,
            space: state.config.space,
        },
    )?;
    state.last_save = Instant::now();
    Ok(())
}

/// Best-effort interval snapshot, piggybacked on mutations. Failures are
/// logged and swallowed so data loss stays bounded by `save_interval`
/// without failing the triggering operation.
fn maybe_autosave(state: &mut ManagerState) {
    if !state.config.auto_save || state.config.index_path.is_none() {
        return;
    }
    if state.last_save.elapsed() < state.config.save_interval {
        return;
    }
    if let Err(e) = save_locked(state) {
        tracing::warn!(error = %e, "auto-save failed");
    }
}

/// Candidate state assembled by a load, committed in one swap.
struct LoadedParts {
    index: HnswIndex,
    documents: HashMap<String, DocumentEntry>,
    internal_to_doc: Vec<String>,
    created_at: u64,
}

/// Read and cross-validate both snapshot files without touching live state.
fn load_parts(path: &Path, config: &IndexConfig) -> Result<LoadedParts> {
    let mut index = codec::read_index(path, config.embedding_dim, &config.hnsw_params())?;
    let (documents, info) = codec::read_sidecar(path)?;

    if info.embedding_dim != config.embedding_dim {
        return Err(EngineError::SnapshotMismatch(format!(
            "sidecar dimension {} does not match configured {}",
            info.embedding_dim, config.embedding_dim
        )));
    }
    if info.space != config.space {
        return Err(EngineError::SnapshotMismatch(format!(
            "sidecar space '{}' does not match configured '{}'",
            info.space.as_str(),
            config.space.as_str()
        )));
    }

    // Rebuild the reverse map and re-derive tombstones: any graph node not
    // referenced by a sidecar entry was logically deleted before the save.
    let total = index.total_nodes();
    let mut internal_to_doc = vec![String::new(); total];
    for (doc_id, entry) in &documents {
        let slot = internal_to_doc.get_mut(entry.internal_id as usize).ok_or_else(|| {
            EngineError::Corrupt(format!(
                "doc '{doc_id}' references internal id {} beyond node count {total}",
                entry.internal_id
            ))
        })?;
        if !slot.is_empty() {
            return Err(EngineError::Corrupt(format!(
                "internal id {} claimed by both '{slot}' and '{doc_id}'",
                entry.internal_id
            )));
        }
        *slot = doc_id.clone();
    }
    for id in 0..total {
        if internal_to_doc[id].is_empty() {
            index.mark_deleted(id as u64);
        }
    }

    Ok(LoadedParts {
        index,
        documents,
        internal_to_doc,
        created_at: info.created_at,
    })
}

fn commit_loaded(state: &mut ManagerState, loaded: LoadedParts) {
    state.index = loaded.index;
    state.documents = loaded.documents;
    state.internal_to_doc = loaded.internal_to_doc;
    state.created_at = loaded.created_at;
    state.last_update = Some(unix_now());
    state.last_save = Instant::now();
}
