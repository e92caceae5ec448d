use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Embedding is empty")]
    EmptyEmbedding,

    #[error("Embedding value at index {index} is not finite: {value}")]
    NonFiniteValue { index: usize, value: f32 },

    #[error("Embedding value at index {index} is not a number")]
    NonNumericValue { index: usize },

    #[error("Malformed candidate: {0}")]
    MalformedCandidate(String),
}
