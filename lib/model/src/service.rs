//! Embedding service facade
//!
//! Ties the generator and the ranker together behind one handle. The
//! process-wide instance is created lazily from the environment on first
//! use and shared afterwards.

use crate::config::ServiceConfig;
use crate::generator::{BatchReport, EmbeddingGenerator};
use crate::Result;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use stylex_core::{Candidate, Embedding, Ranker, Ranking};

static GLOBAL: OnceCell<ModelHandle> = OnceCell::new();

/// Image embedding plus compatibility ranking
pub struct EmbeddingService {
    generator: EmbeddingGenerator,
    ranker: Ranker,
}

impl EmbeddingService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let generator = EmbeddingGenerator::new(config)?;
        Ok(Self::from_generator(generator))
    }

    /// Shorthand for [`ModelHandle::global`]
    pub fn global() -> Result<ModelHandle> {
        ModelHandle::global()
    }

    pub fn from_generator(generator: EmbeddingGenerator) -> Self {
        let ranker = Ranker::new(generator.embedding_size());
        Self { generator, ranker }
    }

    pub fn generator(&self) -> &EmbeddingGenerator {
        &self.generator
    }

    pub fn embedding_size(&self) -> usize {
        self.generator.embedding_size()
    }

    pub fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        self.generator.embed(image)
    }

    pub fn embed_batch(&self, images: &[DynamicImage]) -> Result<BatchReport> {
        self.generator.embed_batch(images)
    }

    pub fn embed_encoded_batch<B>(&self, items: &[B]) -> Result<BatchReport>
    where
        B: AsRef<[u8]> + Sync,
    {
        self.generator.embed_encoded_batch(items)
    }

    /// Cosine similarity of two embeddings of the configured size
    pub fn similarity(&self, a: &Embedding, b: &Embedding) -> Result<f64> {
        a.check_dim(self.embedding_size())?;
        b.check_dim(self.embedding_size())?;
        Ok(stylex_core::similarity(a, b)?)
    }

    /// Compatibility score in [0, 100] of two embeddings of the configured size
    pub fn compatibility_score(&self, a: &Embedding, b: &Embedding) -> Result<f64> {
        a.check_dim(self.embedding_size())?;
        b.check_dim(self.embedding_size())?;
        Ok(stylex_core::compatibility_score(a, b)?)
    }

    pub fn rank(&self, target: &Embedding, candidates: Vec<Candidate>, top_k: usize) -> Result<Ranking> {
        Ok(self.ranker.rank(target, candidates, top_k)?)
    }

    /// Rank raw JSON candidate records against `target`
    pub fn rank_records(&self, target: &Embedding, records: &Value, top_k: usize) -> Result<Ranking> {
        Ok(self.ranker.rank_records(target, records, top_k)?)
    }
}

/// Shared handle to an [`EmbeddingService`]
#[derive(Clone)]
pub struct ModelHandle(Arc<EmbeddingService>);

impl ModelHandle {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        Ok(Self(Arc::new(EmbeddingService::new(config)?)))
    }

    /// The process-wide service, built from the environment on first call
    ///
    /// A failed initialization is not cached; the next call tries again.
    pub fn global() -> Result<Self> {
        GLOBAL
            .get_or_try_init(|| {
                let config = ServiceConfig::from_env()?;
                tracing::info!(?config, "initializing global embedding service");
                Self::new(&config)
            })
            .cloned()
    }
}

impl From<EmbeddingService> for ModelHandle {
    fn from(service: EmbeddingService) -> Self {
        Self(Arc::new(service))
    }
}

impl Deref for ModelHandle {
    type Target = EmbeddingService;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceChoice;
    use crate::Error;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use stylex_core::CandidateId;

    fn service() -> ModelHandle {
        let config = ServiceConfig::default()
            .with_device(DeviceChoice::Cpu)
            .with_pretrained(false)
            .with_embedding_size(4);
        ModelHandle::new(&config).unwrap()
    }

    #[test]
    fn test_similarity_checks_configured_size() {
        let service = service();
        let a = Embedding::new(vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let b = Embedding::new(vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(service.similarity(&a, &a).unwrap(), 1.0);
        assert_eq!(service.compatibility_score(&a, &b).unwrap(), 50.0);

        let short = Embedding::new(vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            service.similarity(&short, &short),
            Err(Error::Core(stylex_core::Error::InvalidDimension { expected: 4, actual: 2 }))
        ));
    }

    #[test]
    fn test_rank_records_end_to_end() {
        let service = service();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(130, 112, Rgb([40, 90, 200])));
        let target = service.embed(&image).unwrap();

        let mirrored: Vec<f32> = target.as_slice().iter().map(|v| -v).collect();
        let records = json!([
            {"id": "same", "embedding": target.as_slice(), "category": "top"},
            {"id": "opposite", "embedding": mirrored},
            {"id": "broken", "embedding": [1.0, 2.0]}
        ]);

        let ranking = service.rank_records(&target, &records, 5).unwrap();
        assert_eq!(ranking.ids(), vec![&CandidateId::from("same"), &CandidateId::from("opposite")]);
        assert_eq!(ranking.results[0].compatibility_score, 100.0);
        assert_eq!(ranking.results[0].extra["category"], "top");
        assert_eq!(ranking.results[1].compatibility_score, 0.0);
        assert_eq!(ranking.rejected.len(), 1);
    }

    #[test]
    fn test_handle_clones_share_service() {
        let handle = service();
        let clone = handle.clone();
        assert!(std::ptr::eq(handle.generator(), clone.generator()));
    }

    #[test]
    fn test_global_is_built_once_across_threads() {
        // the only test in this binary that reads the environment
        std::env::set_var("EMBEDDING_DEVICE", "cpu");
        std::env::set_var("EMBEDDING_SIZE", "8");
        std::env::set_var("EMBEDDING_PRETRAINED", "false");

        let handles: Vec<ModelHandle> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..6).map(|_| scope.spawn(ModelHandle::global)).collect();
            workers.into_iter().map(|w| w.join().unwrap().unwrap()).collect()
        });

        let first = handles[0].generator();
        assert_eq!(first.embedding_size(), 8);
        for handle in &handles[1..] {
            assert!(std::ptr::eq(first, handle.generator()));
        }
        assert!(std::ptr::eq(first, EmbeddingService::global().unwrap().generator()));
    }
}
