use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of dimensions produced by the embedding head
pub const DEFAULT_EMBEDDING_SIZE: usize = 64;

/// A fixed-length image embedding
///
/// Construction validates the values, so every `Embedding` in circulation
/// is non-empty and finite. The values are never mutated afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Embedding {
    data: Vec<f32>,
}

impl Embedding {
    /// Build an embedding, rejecting empty or non-finite input
    pub fn new(data: Vec<f32>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyEmbedding);
        }
        if let Some((index, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::NonFiniteValue { index, value });
        }
        Ok(Self { data })
    }

    /// Build an embedding that must have exactly `dim` values
    pub fn with_dim(data: Vec<f32>, dim: usize) -> Result<Self> {
        let embedding = Self::new(data)?;
        embedding.check_dim(dim)?;
        Ok(embedding)
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Fail with `InvalidDimension` unless this embedding has `expected` values
    pub fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() != expected {
            return Err(Error::InvalidDimension {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }

    /// Euclidean norm, accumulated in f64
    #[inline]
    pub fn norm(&self) -> f64 {
        self.data
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt()
    }

    /// Dot product with another embedding of the same dimension
    pub fn dot(&self, other: &Embedding) -> Result<f64> {
        other.check_dim(self.dim())?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f64::from(a) * f64::from(b))
            .sum())
    }

    /// Cosine similarity in [-1, 1]
    ///
    /// Returns exactly 0.0 when either side has zero norm.
    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f64> {
        let dot_product = self.dot(other)?;

        let norm_a = self.norm();
        let norm_b = other.norm();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok((dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0))
    }
}

impl<'de> Deserialize<'de> for Embedding {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = Vec::<f32>::deserialize(deserializer)?;
        Embedding::new(data).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        assert_eq!(Embedding::new(vec![]), Err(Error::EmptyEmbedding));
    }

    #[test]
    fn test_rejects_non_finite() {
        let err = Embedding::new(vec![1.0, f32::NAN]).unwrap_err();
        assert!(matches!(err, Error::NonFiniteValue { index: 1, .. }));

        let err = Embedding::new(vec![f32::INFINITY]).unwrap_err();
        assert!(matches!(err, Error::NonFiniteValue { index: 0, .. }));
    }

    #[test]
    fn test_with_dim() {
        assert!(Embedding::with_dim(vec![0.5; 64], 64).is_ok());
        assert_eq!(
            Embedding::with_dim(vec![0.5; 63], 64),
            Err(Error::InvalidDimension { expected: 64, actual: 63 })
        );
    }

    #[test]
    fn test_cosine_similarity() {
        let v1 = Embedding::new(vec![1.0, 0.0]).unwrap();
        let v2 = Embedding::new(vec![1.0, 0.0]).unwrap();
        assert!((v1.cosine_similarity(&v2).unwrap() - 1.0).abs() < 1e-12);

        let v3 = Embedding::new(vec![1.0, 0.0]).unwrap();
        let v4 = Embedding::new(vec![0.0, 1.0]).unwrap();
        assert_eq!(v3.cosine_similarity(&v4).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_norm_is_zero_similarity() {
        let zero = Embedding::new(vec![0.0; 4]).unwrap();
        let other = Embedding::new(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(zero.cosine_similarity(&other).unwrap(), 0.0);
        assert_eq!(other.cosine_similarity(&zero).unwrap(), 0.0);
        assert_eq!(zero.cosine_similarity(&zero).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let a = Embedding::new(vec![1.0, 0.0]).unwrap();
        let b = Embedding::new(vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(
            a.cosine_similarity(&b),
            Err(Error::InvalidDimension { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Embedding = serde_json::from_str("[0.25, -0.5]").unwrap();
        assert_eq!(ok.as_slice(), &[0.25, -0.5]);

        assert!(serde_json::from_str::<Embedding>("[]").is_err());
        assert!(serde_json::from_str::<Embedding>("[1.0, \"x\"]").is_err());
    }
}
