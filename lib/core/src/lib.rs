//! # Stylex Core
//!
//! Runtime-independent data model and scoring for the Stylex fashion
//! compatibility engine.
//!
//! This crate provides:
//!
//! - [`Embedding`] - A validated, fixed-length image embedding
//! - [`Candidate`] - An item with an id, an embedding and passthrough attributes
//! - [`similarity()`] and [`compatibility_score()`] - Pairwise scoring
//! - [`Ranker`] - Top-k compatibility ranking over a candidate set
//!
//! ## Example
//!
//! ```rust
//! use stylex_core::{Candidate, Embedding, Ranker, compatibility_score};
//!
//! let shirt = Embedding::new(vec![1.0, 0.0, 0.0]).unwrap();
//! let trousers = Embedding::new(vec![0.9, 0.1, 0.0]).unwrap();
//! let hat = Embedding::new(vec![-1.0, 0.0, 0.0]).unwrap();
//!
//! assert!(compatibility_score(&shirt, &trousers).unwrap() > 90.0);
//!
//! let ranker = Ranker::new(3);
//! let ranking = ranker
//!     .rank(&shirt, vec![Candidate::new("hat", hat), Candidate::new("trousers", trousers)], 5)
//!     .unwrap();
//! assert_eq!(ranking.results[0].id.to_string(), "trousers");
//! ```

pub mod error;
pub mod embedding;
pub mod similarity;
pub mod candidate;
pub mod rank;

pub use error::{Error, Result};
pub use embedding::{Embedding, DEFAULT_EMBEDDING_SIZE};
pub use similarity::{similarity, compatibility_score, score_from_similarity, round_to};
pub use candidate::{Candidate, CandidateId};
pub use rank::{rank, Ranker, RankedResult, Ranking, RejectedCandidate, DEFAULT_TOP_K};
