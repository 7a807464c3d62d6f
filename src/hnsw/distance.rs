//! Vector spaces and distance computation for HNSW search.
//!
//! Two spaces are supported: inner product (on unit-normalized vectors,
//! equivalent to cosine) and euclidean L2. Distances are lower-is-better
//! internally; [`SpaceType::similarity`] converts a distance to the
//! `[0, 1]` similarity reported to callers.

use crate::config;
use serde::{Deserialize, Serialize};

/// Vector space used for similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    /// Inner product over unit vectors. Distance `1 - dot` in `[0, 2]`.
    InnerProduct,
    /// Euclidean distance. Range `[0, ∞)`.
    L2,
}

impl SpaceType {
    /// Parse the wire names `"ip"` and `"l2"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ip" => Some(SpaceType::InnerProduct),
            "l2" => Some(SpaceType::L2),
            _ => None,
        }
    }

    /// Short wire name, the inverse of [`SpaceType::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::InnerProduct => "ip",
            SpaceType::L2 => "l2",
        }
    }

    /// Distance between two vectors of equal length. Lower is better.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SpaceType::InnerProduct => 1.0 - dot(a, b),
            SpaceType::L2 => euclidean_sq(a, b).sqrt(),
        }
    }

    /// Convert an internal distance to a `[0, 1]` similarity.
    ///
    /// Inner product on unit vectors: the dot product, clamped to `[0, 1]`.
    /// L2: `1 / (1 + d)`.
    #[inline]
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            // distance = 1 - dot
            SpaceType::InnerProduct => (1.0 - distance).clamp(0.0, 1.0),
            SpaceType::L2 => 1.0 / (1.0 + distance.max(0.0)),
        }
    }

    /// Whether vectors in this space are stored unit-normalized.
    pub fn normalizes(&self) -> bool {
        matches!(self, SpaceType::InnerProduct)
    }
}

/// Dot product with 4-lane chunked accumulation.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let j = i * 4;
        acc[0] += a[j] * b[j];
        acc[1] += a[j + 1] * b[j + 1];
        acc[2] += a[j + 2] * b[j + 2];
        acc[3] += a[j + 3] * b[j + 3];
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for j in chunks * 4..a.len() {
        sum += a[j] * b[j];
    }
    sum
}

/// Squared euclidean distance with 4-lane chunked accumulation.
#[inline]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let j = i * 4;
        let d0 = a[j] - b[j];
        let d1 = a[j + 1] - b[j + 1];
        let d2 = a[j + 2] - b[j + 2];
        let d3 = a[j + 3] - b[j + 3];
        acc[0] += d0 * d0;
        acc[1] += d1 * d1;
        acc[2] += d2 * d2;
        acc[3] += d3 * d3;
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for j in chunks * 4..a.len() {
        let d = a[j] - b[j];
        sum += d * d;
    }
    sum
}

/// Cosine similarity between two raw vectors. Zero-norm inputs score 0.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Normalize `v` to unit L2 length in place.
///
/// Returns `false` for a zero vector. Vectors already within
/// [`config::UNIT_NORM_TOLERANCE`] of unit length are left untouched.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    if (norm - 1.0).abs() > config::UNIT_NORM_TOLERANCE {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    true
}
