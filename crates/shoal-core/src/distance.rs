//! Scalar similarity primitives shared by search, ingestion, and validation

use crate::error::{Result, ShoalError};
use crate::types::MAX_EMBEDDING_DIMENSIONS;

/// Validate an embedding: non-empty, bounded dimensionality, finite values
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(ShoalError::invalid_input("embedding", "must not be empty"));
    }
    if embedding.len() > MAX_EMBEDDING_DIMENSIONS {
        return Err(ShoalError::invalid_input(
            "embedding",
            format!("at most {MAX_EMBEDDING_DIMENSIONS} dimensions"),
        ));
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(ShoalError::invalid_input(
            "embedding",
            format!("non-finite value at position {pos}"),
        ));
    }
    Ok(())
}

/// L2 norm of a validated embedding; rejects zero and non-finite norms
pub fn l2_norm(embedding: &[f32]) -> Result<f32> {
    validate_embedding(embedding)?;

    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= 0.0 {
        return Err(ShoalError::invalid_input(
            "embedding",
            format!("invalid norm: {norm}"),
        ));
    }
    Ok(norm)
}

/// Cosine similarity with precomputed norms
///
/// Both norms must be positive; dimensions must agree.
pub fn cosine_similarity(a: &[f32], b: &[f32], norm_a: f32, norm_b: f32) -> Result<f64> {
    if a.len() != b.len() {
        return Err(ShoalError::invalid_input(
            "embedding",
            format!("dimension mismatch: {} vs {}", a.len(), b.len()),
        ));
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let similarity = (dot / (norm_a * norm_b)) as f64;

    if !similarity.is_finite() {
        return Err(ShoalError::invalid_input(
            "embedding",
            "similarity is not finite",
        ));
    }
    Ok(similarity)
}
