//! # Stylex
//!
//! Fashion image embeddings and outfit compatibility ranking.
//!
//! Stylex turns garment images into fixed-length embeddings with a
//! ResNet-18 backbone, then scores how well two items go together as the
//! cosine similarity of their embeddings mapped onto a 0-100 scale.
//!
//! ## Quick Start
//!
//! ### From the command line
//!
//! ```bash
//! export EMBEDDING_MODEL_PATH=models/fashion_compat.pt
//! stylex embed shirt.jpg trousers.jpg
//! stylex compare shirt.jpg trousers.jpg
//! stylex rank --target shirt.jpg --candidates wardrobe.json --top-k 3
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use stylex::prelude::*;
//!
//! let service = ModelHandle::global().unwrap();
//!
//! let shirt = image::open("shirt.jpg").unwrap();
//! let target = service.embed(&shirt).unwrap();
//!
//! let wardrobe = serde_json::json!([
//!     {"id": 1, "embedding": vec![0.1f32; 64], "name": "denim jacket"},
//!     {"id": 2, "embedding": vec![-0.2f32; 64], "name": "wool scarf"},
//! ]);
//! let ranking = service.rank_records(&target, &wardrobe, DEFAULT_TOP_K).unwrap();
//! for item in &ranking.results {
//!     println!("{} -> {}", item.id, item.compatibility_score);
//! }
//! ```
//!
//! ## Crate Structure
//!
//! - [`stylex-core`](https://docs.rs/stylex-core) - Embeddings, similarity, compatibility scores and ranking
//! - [`stylex-model`](https://docs.rs/stylex-model) - Preprocessing, the embedding network, checkpoint loading and the shared service
//!
//! ## Configuration
//!
//! The shared service reads `EMBEDDING_MODEL_PATH`, `EMBEDDING_BACKBONE_PATH`,
//! `EMBEDDING_DEVICE` and `EMBEDDING_SIZE` from the environment. A missing or
//! unreadable checkpoint is logged and the service keeps running on the
//! backbone weights.

// Re-export core types
pub use stylex_core::{
    Embedding, Candidate, CandidateId,
    Ranker, Ranking, RankedResult, RejectedCandidate,
    similarity, compatibility_score, rank,
    DEFAULT_EMBEDDING_SIZE, DEFAULT_TOP_K,
};

// Re-export inference
pub use stylex_model::{
    BatchReport, DeviceChoice, EmbeddingGenerator, EmbeddingService,
    ModelHandle, ServiceConfig,
    Error, Result,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Embedding, Candidate, CandidateId,
        Ranker, Ranking, RankedResult,
        similarity, compatibility_score,
        DEFAULT_TOP_K,
        DeviceChoice, EmbeddingService, ModelHandle, ServiceConfig,
        Error, Result,
    };
}

/// Lower-level inference building blocks
pub mod model {
    pub use stylex_model::{checkpoint, network, preprocess};
}
