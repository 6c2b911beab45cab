//! Exact and approximate top-k cosine search with adaptive selection
//!
//! Exact search is a single scan with a bounded min-heap. Approximate
//! search probes the most promising clusters of a [`CentroidIndex`] and
//! runs the same heap inside their union. Selection is adaptive: small
//! collections always take the exact path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::error::Result;
use crate::index::CentroidIndex;
use crate::types::{DocumentId, Vector, VectorId, DEFAULT_SEARCH_K, MAX_SEARCH_K};

/// Collections at or above this size are eligible for approximate search
pub const APPROXIMATE_THRESHOLD: usize = 1000;
/// Default breadth multiplier for cluster probing
pub const DEFAULT_CANDIDATE_FACTOR: f32 = 2.0;

/// Knobs for one search call
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Result count; callers cap this at [`MAX_SEARCH_K`]
    pub k: usize,
    /// Drop results scoring below this value
    pub min_score: Option<f64>,
    /// Restrict matches to these documents
    pub filter: Option<HashSet<DocumentId>>,
    /// Permit the approximate path for large collections
    pub use_approximate: bool,
    /// Cluster probing breadth
    pub candidate_factor: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_SEARCH_K,
            min_score: None,
            filter: None,
            use_approximate: true,
            candidate_factor: DEFAULT_CANDIDATE_FACTOR,
        }
    }
}

/// Resolve a requested result count: default 10, capped at 100, silently
pub fn normalize_k(requested: Option<u32>) -> usize {
    requested
        .map(|k| k as usize)
        .unwrap_or(DEFAULT_SEARCH_K)
        .min(MAX_SEARCH_K)
}

/// A scored candidate; ordering is score-descending with ascending
/// vector-id tie-break so results are deterministic across runs
struct Hit {
    score: f64,
    id: VectorId,
    idx: usize,
}

impl PartialEq for Hit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Hit {}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score wins; on a tie the lexicographically smaller id wins
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Search a vector set, choosing between the exact scan and the centroid
/// index based on size and caller preference
///
/// Returns `(score, index into vectors)` pairs sorted best-first. When the
/// approximate path is taken without a prebuilt index, one is built on the
/// fly; callers that can cache should build and pass it themselves.
pub fn search_vectors(
    vectors: &[Vector],
    index: Option<&CentroidIndex>,
    query: &[f32],
    query_norm: f32,
    options: &SearchOptions,
) -> Result<Vec<(f64, usize)>> {
    if options.k == 0 || vectors.is_empty() {
        return Ok(Vec::new());
    }

    if options.use_approximate && vectors.len() >= APPROXIMATE_THRESHOLD {
        let built;
        let index = match index {
            Some(index) => index,
            None => {
                built = CentroidIndex::build(vectors);
                &built
            }
        };
        return Ok(search_approximate(vectors, index, query, query_norm, options));
    }

    Ok(top_k(vectors, 0..vectors.len(), query, query_norm, options))
}

/// Exact top-k over the whole set
pub fn search_exact(
    vectors: &[Vector],
    query: &[f32],
    query_norm: f32,
    options: &SearchOptions,
) -> Vec<(f64, usize)> {
    top_k(vectors, 0..vectors.len(), query, query_norm, options)
}

fn search_approximate(
    vectors: &[Vector],
    index: &CentroidIndex,
    query: &[f32],
    query_norm: f32,
    options: &SearchOptions,
) -> Vec<(f64, usize)> {
    let clusters = index.candidate_clusters(query, query_norm, options.candidate_factor);
    let candidates = clusters
        .iter()
        .flat_map(|&cluster| index.cluster_members(cluster).iter().copied())
        .collect::<Vec<usize>>();
    top_k(vectors, candidates.into_iter(), query, query_norm, options)
}

/// Bounded min-heap top-k over a candidate index set
fn top_k(
    vectors: &[Vector],
    candidates: impl IntoIterator<Item = usize>,
    query: &[f32],
    query_norm: f32,
    options: &SearchOptions,
) -> Vec<(f64, usize)> {
    let mut heap: BinaryHeap<std::cmp::Reverse<Hit>> = BinaryHeap::with_capacity(options.k + 1);

    for idx in candidates {
        let vector = &vectors[idx];

        if let Some(filter) = &options.filter {
            if !filter.contains(&vector.document_id) {
                continue;
            }
        }
        if vector.embedding.len() != query.len() {
            continue;
        }

        let dot: f32 = query
            .iter()
            .zip(vector.embedding.iter())
            .map(|(a, b)| a * b)
            .sum();
        let score = (dot / (query_norm * vector.norm)) as f64;
        if !score.is_finite() {
            continue;
        }
        if let Some(min_score) = options.min_score {
            if score < min_score {
                continue;
            }
        }

        let hit = Hit {
            score,
            id: vector.id.clone(),
            idx,
        };
        if heap.len() < options.k {
            heap.push(std::cmp::Reverse(hit));
        } else if let Some(worst) = heap.peek() {
            if hit > worst.0 {
                heap.pop();
                heap.push(std::cmp::Reverse(hit));
            }
        }
    }

    let mut hits: Vec<Hit> = heap.into_iter().map(|r| r.0).collect();
    hits.sort_by(|a, b| b.cmp(a));
    hits.into_iter().map(|h| (h.score, h.idx)).collect()
}
