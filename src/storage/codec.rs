//! Binary snapshot codec for the HNSW graph plus its JSON metadata sidecar.
//!
//! Index file layout, all integers and floats little-endian:
//!
//! ```text
//! magic "HNSW" | version u32 | dim u32 | m u32 | ef_construction u32
//! entry_point i64 (-1 = none) | node_count u64
//! per node: internal_id u64 | layer u16 | dim x f32
//!           per layer 0..=layer: len u32 | len x u64 neighbor ids
//! CRC32 of everything above, u32 big-endian footer
//! ```
//!
//! Byte order is serialized explicitly, so snapshots are portable across
//! hosts. Writes go to `<path>.tmp` and are renamed into place to prevent
//! a crash from leaving a torn snapshot. The sidecar at
//! `<path>.metadata.json` maps `doc_id` to its stored entry and carries the
//! manager record under the reserved `"__manager__"` key.

use crate::document::DocumentEntry;
use crate::error::{EngineError, Result};
use crate::hnsw::distance::SpaceType;
use crate::hnsw::graph::{HnswIndex, HnswParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"HNSW";
const FORMAT_VERSION: u32 = 1;
const ENTRY_POINT_NONE: i64 = -1;

/// Reserved sidecar key holding the manager record.
pub const MANAGER_KEY: &str = "__manager__";

/// Manager-level record persisted in the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerInfo {
    /// Manager creation time, unix seconds.
    pub created_at: u64,
    /// Embedding dimension the snapshot was built with.
    pub embedding_dim: usize,
    /// Vector space the snapshot was built with.
    pub space: SpaceType,
}

/// Path of the metadata sidecar for a given index path.
pub fn sidecar_path(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_os_string();
    name.push(".metadata.json");
    PathBuf::from(name)
}

/// Atomic write: temp file in the same directory, then rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize the graph to `path`.
pub fn write_index(index: &HnswIndex, path: &Path) -> Result<()> {
    let nc = index.node_count as usize;
    let mut buf: Vec<u8> =
        Vec::with_capacity(32 + nc * (10 + index.dimension * 4 + index.params.m_max0 * 8));

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(index.dimension as u32).to_le_bytes());
    buf.extend_from_slice(&(index.params.m as u32).to_le_bytes());
    buf.extend_from_slice(&(index.params.ef_construction as u32).to_le_bytes());
    let ep = index
        .entry_point
        .map_or(ENTRY_POINT_NONE, |ep| ep as i64);
    buf.extend_from_slice(&ep.to_le_bytes());
    buf.extend_from_slice(&(nc as u64).to_le_bytes());

    for id in 0..nc {
        buf.extend_from_slice(&(id as u64).to_le_bytes());
        let layer = index.layers[id];
        buf.extend_from_slice(&(layer as u16).to_le_bytes());
        let start = id * index.dimension;
        for &x in &index.vectors[start..start + index.dimension] {
            buf.extend_from_slice(&x.to_le_bytes());
        }
        for list in &index.neighbors[id] {
            buf.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for &n in list {
                buf.extend_from_slice(&(n as u64).to_le_bytes());
            }
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());

    atomic_write(path, &buf)?;
    tracing::info!(
        path = %path.display(),
        nodes = nc,
        bytes = buf.len(),
        "saved index snapshot"
    );
    Ok(())
}

/// Bounds-checked little-endian reader over a snapshot payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| EngineError::Corrupt("snapshot truncated".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

/// Deserialize a graph from `path`.
///
/// The graph adopts the file's structural parameters (`m`,
/// `ef_construction`); runtime parameters (`ef_search`, `max_elements`,
/// `space`) come from `params`. Rejects wrong magic, unsupported version,
/// dimension mismatch, CRC mismatch, and structural corruption. All nodes
/// load live; the caller re-marks tombstones from its document map.
pub fn read_index(path: &Path, expected_dim: usize, params: &HnswParams) -> Result<HnswIndex> {
    let raw = fs::read(path)?;
    if raw.len() < MAGIC.len() + 4 {
        return Err(EngineError::Corrupt("snapshot too short".to_string()));
    }

    let (payload, footer) = raw.split_at(raw.len() - 4);
    let stored_crc = u32::from_be_bytes(footer.try_into().unwrap());
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(EngineError::Corrupt(format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let mut r = Reader::new(payload);
    if r.take(4)? != MAGIC {
        return Err(EngineError::Corrupt("bad magic".to_string()));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(EngineError::SnapshotMismatch(format!(
            "unsupported snapshot version {version} (expected {FORMAT_VERSION})"
        )));
    }
    let dim = r.u32()? as usize;
    if dim != expected_dim {
        return Err(EngineError::SnapshotMismatch(format!(
            "snapshot dimension {dim} does not match configured {expected_dim}"
        )));
    }
    let m = r.u32()? as usize;
    let ef_construction = r.u32()? as usize;
    let entry_point = match r.i64()? {
        ENTRY_POINT_NONE => None,
        ep if ep >= 0 && ep <= u32::MAX as i64 => Some(ep as u32),
        ep => {
            return Err(EngineError::Corrupt(format!(
                "entry point {ep} out of range"
            )))
        }
    };
    let node_count = r.u64()?;
    if node_count > u32::MAX as u64 {
        return Err(EngineError::Corrupt(format!(
            "node count {node_count} out of range"
        )));
    }
    let nc = node_count as usize;

    let mut index = HnswIndex::new(
        dim,
        HnswParams {
            m: m.max(2),
            m_max0: m.max(2) * 2,
            ef_construction,
            ..params.clone()
        },
    );
    index.vectors.reserve(nc * dim);
    index.layers.reserve(nc);
    index.neighbors.reserve(nc);

    let mut max_layer = 0usize;
    for expected_id in 0..node_count {
        let id = r.u64()?;
        if id != expected_id {
            return Err(EngineError::Corrupt(format!(
                "node id {id} out of order (expected {expected_id})"
            )));
        }
        let layer = r.u16()? as usize;
        if layer >= index.params.max_layers {
            return Err(EngineError::Corrupt(format!(
                "node {id} layer {layer} exceeds ceiling {}",
                index.params.max_layers
            )));
        }
        for _ in 0..dim {
            let x = r.f32()?;
            index.vectors.push(x);
        }
        let mut lists = Vec::with_capacity(layer + 1);
        for _ in 0..=layer {
            let len = r.u32()? as usize;
            let mut list = Vec::with_capacity(len);
            for _ in 0..len {
                let n = r.u64()?;
                if n >= node_count {
                    return Err(EngineError::Corrupt(format!(
                        "node {id} references neighbor {n} beyond node count {node_count}"
                    )));
                }
                list.push(n as u32);
            }
            lists.push(list);
        }
        index.layers.push(layer as u8);
        index.neighbors.push(lists);
        index.deleted.push(false);
        max_layer = max_layer.max(layer);
    }
    if r.pos != payload.len() {
        return Err(EngineError::Corrupt(format!(
            "{} trailing bytes after last node",
            payload.len() - r.pos
        )));
    }

    index.node_count = node_count as u32;
    index.entry_point = entry_point;
    index.max_layer = max_layer;
    index.validate()?;

    tracing::info!(
        path = %path.display(),
        nodes = nc,
        "loaded index snapshot"
    );
    Ok(index)
}

/// Serialize the document map and manager record to the sidecar.
pub fn write_sidecar(
    index_path: &Path,
    documents: &HashMap<String, DocumentEntry>,
    info: &ManagerInfo,
) -> Result<()> {
    let mut root = serde_json::Map::with_capacity(documents.len() + 1);
    root.insert(MANAGER_KEY.to_string(), serde_json::to_value(info)?);
    for (doc_id, entry) in documents {
        root.insert(doc_id.clone(), serde_json::to_value(entry)?);
    }
    let bytes = serde_json::to_vec_pretty(&Value::Object(root))?;
    atomic_write(&sidecar_path(index_path), &bytes)
}

/// Deserialize the document map and manager record from the sidecar.
pub fn read_sidecar(index_path: &Path) -> Result<(HashMap<String, DocumentEntry>, ManagerInfo)> {
    let raw = fs::read(sidecar_path(index_path))?;
    let root: Value = serde_json::from_slice(&raw)
        .map_err(|e| EngineError::Corrupt(format!("metadata sidecar is not valid JSON: {e}")))?;
    let Value::Object(mut root) = root else {
        return Err(EngineError::Corrupt(
            "metadata sidecar root is not an object".to_string(),
        ));
    };
    let info_value = root.remove(MANAGER_KEY).ok_or_else(|| {
        EngineError::Corrupt(format!("metadata sidecar missing {MANAGER_KEY} record"))
    })?;
    let info: ManagerInfo = serde_json::from_value(info_value)
        .map_err(|e| EngineError::Corrupt(format!("bad {MANAGER_KEY} record: {e}")))?;

    let mut documents = HashMap::with_capacity(root.len());
    for (doc_id, value) in root {
        let entry: DocumentEntry = serde_json::from_value(value)
            .map_err(|e| EngineError::Corrupt(format!("bad entry for doc '{doc_id}': {e}")))?;
        documents.insert(doc_id, entry);
    }
    Ok((documents, info))
}
