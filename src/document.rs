//! Stored document entries and search result types.
//!
//! The engine stores document metadata separately from the vector graph:
//! each entry pairs an externally supplied `doc_id` with the internal id of
//! its graph node and a JSON metadata record. The manager augments
//! user-provided metadata with `doc_id`, `content`, `content_length`, and
//! `indexed_at` before storing it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored document: internal graph node id plus its full metadata record.
///
/// The metadata record always contains the system keys added by
/// [`augment_metadata`]; user keys are preserved unless they collide with a
/// system key, in which case the system key wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    /// Internal id of the graph node holding this document's embedding.
    pub internal_id: u64,
    /// Full metadata record (user metadata + system keys).
    pub metadata: Value,
}

/// A single ranked hit from [`crate::index::IndexManager::search`].
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Externally supplied document id.
    pub doc_id: String,
    /// Document content, as recorded at ingest time.
    pub content: String,
    /// Similarity in `[0, 1]`; higher is better.
    pub similarity: f32,
    /// Full metadata record for the document.
    pub metadata: Value,
}

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the full metadata record for a document.
///
/// Starts from the user metadata (must be a JSON object; anything else is
/// wrapped under a `"user"` key) and adds the system keys.
pub(crate) fn augment_metadata(doc_id: &str, content: &str, user_metadata: Value) -> Value {
    let mut map = match user_metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("user".to_string(), other);
            map
        }
    };
    map.insert("doc_id".to_string(), json!(doc_id));
    map.insert("content".to_string(), json!(content));
    map.insert("content_length".to_string(), json!(content.len()));
    map.insert("indexed_at".to_string(), json!(unix_now()));
    Value::Object(map)
}

/// Extract the content string from a metadata record.
pub(crate) fn content_of(metadata: &Value) -> String {
    metadata
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
