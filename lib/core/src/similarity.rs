//! Pairwise similarity and compatibility scoring
//!
//! Both scores are pure functions of the two embeddings. Inputs of different
//! dimensions are rejected rather than truncated or padded.

use crate::{Embedding, Result};

/// Cosine similarity between two embeddings
///
/// # Arguments
/// * `a` - First embedding
/// * `b` - Second embedding
///
/// # Returns
/// Similarity in [-1.0, 1.0]; exactly 0.0 if either embedding has zero norm
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f64> {
    a.cosine_similarity(b)
}

/// Compatibility score between two items
///
/// Linear remap of cosine similarity from [-1, 1] onto [0, 100], rounded
/// to two decimals. 50 means orthogonal, 100 same direction, 0 opposite.
pub fn compatibility_score(a: &Embedding, b: &Embedding) -> Result<f64> {
    Ok(score_from_similarity(similarity(a, b)?))
}

/// Map an already computed similarity onto the 0-100 compatibility scale
#[inline]
pub fn score_from_similarity(similarity: f64) -> f64 {
    round_to((similarity + 1.0) * 50.0, 2)
}

/// Round to a fixed number of decimal places
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
