//! Transient two-level centroid index for approximate search
//!
//! Vectors are partitioned into `⌈√N⌉` clusters by cosine k-means. The
//! build is fully deterministic: centroids initialize by uniform stride
//! sampling over the insertion-ordered vector set (no RNG), assignment
//! runs at most [`MAX_KMEANS_ITERATIONS`] rounds, and stops early once no
//! vector changes cluster. The index is built on demand, cached next to
//! the collection's vectors, and never persisted.

use crate::types::Vector;

/// Upper bound on k-means refinement rounds
pub const MAX_KMEANS_ITERATIONS: usize = 8;

/// Two-level clustering over one collection's vectors
///
/// Member lists hold indices into the vector slice the index was built
/// from; callers must query it with the same slice.
#[derive(Clone, Debug)]
pub struct CentroidIndex {
    centroids: Vec<Vec<f32>>,
    centroid_norms: Vec<f32>,
    clusters: Vec<Vec<usize>>,
    dimensions: usize,
}

impl CentroidIndex {
    /// Cluster `vectors` into `⌈√N⌉` groups
    pub fn build(vectors: &[Vector]) -> Self {
        if vectors.is_empty() {
            return Self {
                centroids: Vec::new(),
                centroid_norms: Vec::new(),
                clusters: Vec::new(),
                dimensions: 0,
            };
        }

        let n = vectors.len();
        let dimensions = vectors[0].embedding.len();
        let cluster_count = (n as f64).sqrt().ceil() as usize;
        let cluster_count = cluster_count.clamp(1, n);

        // Deterministic stride-sampled seeds
        let mut centroids: Vec<Vec<f32>> = (0..cluster_count)
            .map(|i| vectors[i * n / cluster_count].embedding.clone())
            .collect();
        let mut centroid_norms = norms_of(&centroids);
        let mut assignments = vec![0usize; n];

        for _ in 0..MAX_KMEANS_ITERATIONS {
            let mut changed = false;

            for (vector_idx, vector) in vectors.iter().enumerate() {
                let best = nearest_centroid(
                    &vector.embedding,
                    vector.norm,
                    &centroids,
                    &centroid_norms,
                );
                if assignments[vector_idx] != best {
                    assignments[vector_idx] = best;
                    changed = true;
                }
            }

            if !changed {
                break;
            }

            recompute_centroids(vectors, &assignments, &mut centroids, dimensions);
            centroid_norms = norms_of(&centroids);
        }

        let mut clusters = vec![Vec::new(); cluster_count];
        for (vector_idx, cluster_idx) in assignments.iter().enumerate() {
            clusters[*cluster_idx].push(vector_idx);
        }

        Self {
            centroids,
            centroid_norms,
            clusters,
            dimensions,
        }
    }

    /// Number of clusters
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Dimensionality of the indexed vectors
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Vector indices of one cluster
    pub fn cluster_members(&self, cluster: usize) -> &[usize] {
        &self.clusters[cluster]
    }

    /// Select the `max(1, ⌈√C · candidate_factor⌉)` clusters most aligned
    /// with the query, best first; ties break on the lower cluster id
    pub fn candidate_clusters(
        &self,
        query: &[f32],
        query_norm: f32,
        candidate_factor: f32,
    ) -> Vec<usize> {
        let cluster_count = self.clusters.len();
        if cluster_count == 0 {
            return Vec::new();
        }

        let probes = ((cluster_count as f64).sqrt() * candidate_factor as f64).ceil() as usize;
        let probes = probes.max(1).min(cluster_count);

        let mut scored: Vec<(f64, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .filter(|(i, _)| self.centroid_norms[*i] > 0.0)
            .map(|(i, centroid)| {
                let dot: f32 = query.iter().zip(centroid.iter()).map(|(a, b)| a * b).sum();
                let score = (dot / (query_norm * self.centroid_norms[i])) as f64;
                (score, i)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(probes);
        scored.into_iter().map(|(_, i)| i).collect()
    }
}

fn norms_of(centroids: &[Vec<f32>]) -> Vec<f32> {
    centroids
        .iter()
        .map(|c| c.iter().map(|x| x * x).sum::<f32>().sqrt())
        .collect()
}

fn nearest_centroid(
    embedding: &[f32],
    norm: f32,
    centroids: &[Vec<f32>],
    centroid_norms: &[f32],
) -> usize {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        if centroid_norms[i] <= 0.0 {
            continue;
        }
        let dot: f32 = embedding.iter().zip(centroid.iter()).map(|(a, b)| a * b).sum();
        let score = dot / (norm * centroid_norms[i]);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

fn recompute_centroids(
    vectors: &[Vector],
    assignments: &[usize],
    centroids: &mut [Vec<f32>],
    dimensions: usize,
) {
    let mut sums = vec![vec![0.0f32; dimensions]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (vector_idx, vector) in vectors.iter().enumerate() {
        let cluster = assignments[vector_idx];
        for (dim, value) in vector.embedding.iter().enumerate() {
            sums[cluster][dim] += value;
        }
        counts[cluster] += 1;
    }

    for (cluster, sum) in sums.into_iter().enumerate() {
        // Empty clusters keep their previous centroid
        if counts[cluster] > 0 {
            let count = counts[cluster] as f32;
            centroids[cluster] = sum.into_iter().map(|v| v / count).collect();
        }
    }
}
