//! Embedding generation
//!
//! Parameters start from a seeded initialization, so every instance built
//! from the same configuration produces the same embeddings. Backbone and
//! checkpoint weights are then loaded into a `VarMap`, frozen into plain
//! tensors, and the network is rebuilt on top of them. The frozen network
//! carries no variables, so forward passes record no gradient graph and
//! nothing can write to the weights afterwards.

use crate::checkpoint::{CheckpointLoader, LoadReport};
use crate::config::ServiceConfig;
use crate::network::{EmbeddingNet, FEATURE_DIM};
use crate::preprocess::{decode_image, preprocess, preprocess_batch, ImageTensor};
use crate::pretrained;
use crate::{Error, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use stylex_core::Embedding;

/// Seed for parameters that no weight file provides
pub const INIT_SEED: u64 = 0x5717_1e00_e3b0_0001;

const HEAD_PREFIX: &str = "embeddingnet.fc.";

/// Which weight files ended up in the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightSources {
    pub backbone: Option<LoadReport>,
    pub checkpoint: Option<LoadReport>,
}

/// Per-slot outcome of embedding a batch of images
#[derive(Debug)]
pub struct BatchReport {
    results: Vec<Result<Embedding>>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[Result<Embedding>] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Result<Embedding>> {
        self.results
    }

    /// Every embedding in input order, or the first failed slot's error
    pub fn into_embeddings(self) -> Result<Vec<Embedding>> {
        self.results.into_iter().collect()
    }

    /// Successful slots with their input index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &Embedding)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().ok().map(|e| (i, e)))
    }

    /// Failed slots with their input index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }
}

/// Runs the embedding network over images
pub struct EmbeddingGenerator {
    network: EmbeddingNet,
    parameters: HashMap<String, Tensor>,
    device: Device,
    embedding_size: usize,
    sources: WeightSources,
}

impl EmbeddingGenerator {
    /// Build the network on the configured device and load its weights
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.resolve()?;
        Self::with_device(config, device)
    }

    /// Build the network on an already created device
    ///
    /// Backbone weights come from `backbone_path`, or from the hub when
    /// `pretrained` is set; the checkpoint is applied on top of them. No
    /// weight source can make construction fail; see
    /// [`CheckpointLoader::load_file`].
    pub fn with_device(config: &ServiceConfig, device: Device) -> Result<Self> {
        config.validate()?;
        tracing::info!(?device, embedding_size = config.embedding_size, "building embedding network");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        EmbeddingNet::new(config.embedding_size, vb)?;
        seed_parameters(&varmap, INIT_SEED)?;

        let loader = CheckpointLoader::default();
        let mut sources = WeightSources::default();
        match backbone_source(config) {
            Some(path) => sources.backbone = Some(loader.load_file(&varmap, &path)),
            None => tracing::warn!("no backbone weights available, backbone keeps its seeded initialization"),
        }
        match &config.checkpoint_path {
            Some(path) => sources.checkpoint = Some(loader.load_file(&varmap, path)),
            None => tracing::info!("no checkpoint configured, using backbone weights only"),
        }

        let parameters = freeze(&varmap)?;
        let vb = VarBuilder::from_tensors(parameters.clone(), DType::F32, &device);
        let network = EmbeddingNet::new(config.embedding_size, vb)?;

        Ok(Self {
            network,
            parameters,
            device,
            embedding_size: config.embedding_size,
            sources,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    pub fn weight_sources(&self) -> &WeightSources {
        &self.sources
    }

    /// A network parameter by its full name, e.g. `embeddingnet.fc.bias`
    pub fn parameter(&self, name: &str) -> Option<&Tensor> {
        self.parameters.get(name)
    }

    /// Embed a single decoded image
    pub fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let tensor = preprocess(image)?;
        self.forward(vec![tensor])?
            .pop()
            .ok_or(Error::MissingOutput { expected: 1, actual: 0 })
    }

    /// Embed decoded images, isolating failures per item
    ///
    /// Images that fail preprocessing get an error in their slot; the rest
    /// share a single forward pass. An inference failure affects every item
    /// and is returned as the call's error. Empty input gives an empty report.
    pub fn embed_batch(&self, images: &[DynamicImage]) -> Result<BatchReport> {
        self.embed_prepared(preprocess_batch(images))
    }

    /// Decode and embed encoded images, isolating failures per item
    ///
    /// Same slot semantics as [`embed_batch`](Self::embed_batch), with
    /// decode failures reported per slot as well.
    pub fn embed_encoded_batch<B>(&self, items: &[B]) -> Result<BatchReport>
    where
        B: AsRef<[u8]> + Sync,
    {
        let prepared: Vec<Result<ImageTensor>> = items
            .par_iter()
            .map(|bytes| decode_image(bytes.as_ref()).and_then(|image| preprocess(&image)))
            .collect();
        self.embed_prepared(prepared)
    }

    fn embed_prepared(&self, prepared: Vec<Result<ImageTensor>>) -> Result<BatchReport> {
        let mut results: Vec<Option<Result<Embedding>>> = Vec::with_capacity(prepared.len());
        let mut pending = Vec::new();
        let mut tensors = Vec::new();
        for (index, outcome) in prepared.into_iter().enumerate() {
            match outcome {
                Ok(tensor) => {
                    pending.push(index);
                    tensors.push(tensor);
                    results.push(None);
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping batch item");
                    results.push(Some(Err(e)));
                }
            }
        }

        if !tensors.is_empty() {
            for (index, embedding) in pending.into_iter().zip(self.forward(tensors)?) {
                results[index] = Some(Ok(embedding));
            }
        }

        // forward() checks the row count, so every slot is filled here
        let expected = results.len();
        let results = results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(Error::MissingOutput { expected, actual: 0 })))
            .collect();
        Ok(BatchReport { results })
    }

    fn forward(&self, tensors: Vec<ImageTensor>) -> Result<Vec<Embedding>> {
        let batch_size = tensors.len();
        let (channels, height, width) = ImageTensor::SHAPE;

        let mut data = Vec::with_capacity(batch_size * ImageTensor::LEN);
        for tensor in tensors {
            data.extend_from_slice(tensor.as_slice());
        }
        let batch = Tensor::from_vec(data, (batch_size, channels, height, width), &self.device)?;

        let output = self
            .network
            .forward(&batch)?
            .to_dtype(DType::F32)?
            .to_device(&Device::Cpu)?
            .to_vec2::<f32>()?;

        if output.len() != batch_size {
            return Err(Error::MissingOutput {
                expected: batch_size,
                actual: output.len(),
            });
        }

        output
            .into_iter()
            .map(|row| Embedding::with_dim(row, self.embedding_size).map_err(Error::from))
            .collect()
    }
}

fn backbone_source(config: &ServiceConfig) -> Option<PathBuf> {
    if let Some(path) = &config.backbone_path {
        return Some(path.clone());
    }
    if !config.pretrained {
        return None;
    }
    match pretrained::fetch_backbone() {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, "pretrained backbone unavailable");
            None
        }
    }
}

/// Overwrite every randomly initialized parameter from a seeded generator
///
/// Convolution and linear weights, and the head bias, draw from
/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` in sorted name order. Batch norm
/// parameters keep their constant initialization.
pub fn seed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| Error::WeightState("variable map lock poisoned".to_string()))?;

    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    for name in names {
        let var = &vars[name];
        let dims = var.dims();
        let fan_in = if name.ends_with(".weight") && dims.len() >= 2 {
            dims[1..].iter().product::<usize>()
        } else if name.starts_with(HEAD_PREFIX) && name.ends_with(".bias") {
            FEATURE_DIM
        } else {
            continue;
        };

        let bound = 1.0 / (fan_in as f64).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.random_range(-bound..bound) as f32)
            .collect();
        var.set(&Tensor::from_vec(values, dims, var.device())?)?;
    }
    Ok(())
}

fn freeze(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| Error::WeightState("variable map lock poisoned".to_string()))?;
    Ok(vars
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().detach()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceChoice;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn cpu_config() -> ServiceConfig {
        ServiceConfig::default()
            .with_device(DeviceChoice::Cpu)
            .with_pretrained(false)
    }

    fn sample_image(seed: u32, width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                ((x * 3 + seed * 17) % 256) as u8,
                ((y * 5 + seed * 31) % 256) as u8,
                ((x + y + seed * 7) % 256) as u8,
            ])
        }))
    }

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn assert_close(a: &Embedding, b: &Embedding) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert!((x - y).abs() <= 1e-4 * (1.0 + x.abs()), "{} != {}", x, y);
        }
    }

    #[test]
    fn test_embed_has_configured_size() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let embedding = generator.embed(&sample_image(1, 160, 120)).unwrap();
        assert_eq!(embedding.dim(), 64);

        let generator = EmbeddingGenerator::new(&cpu_config().with_embedding_size(16)).unwrap();
        assert_eq!(generator.embed(&sample_image(1, 160, 120)).unwrap().dim(), 16);
    }

    #[test]
    fn test_batch_matches_single() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let images = vec![sample_image(1, 112, 112), sample_image(2, 200, 150), sample_image(3, 90, 300)];

        let batch = generator.embed_batch(&images).unwrap().into_embeddings().unwrap();
        assert_eq!(batch.len(), 3);
        for (image, batched) in images.iter().zip(&batch) {
            assert_close(&generator.embed(image).unwrap(), batched);
        }
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let image = sample_image(4, 128, 128);
        assert_eq!(generator.embed(&image).unwrap(), generator.embed(&image).unwrap());
    }

    #[test]
    fn test_instances_agree_without_weight_files() {
        let a = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let b = EmbeddingGenerator::new(&cpu_config()).unwrap();
        assert!(a.weight_sources().backbone.is_none());

        let image = sample_image(10, 150, 130);
        assert_eq!(a.embed(&image).unwrap(), b.embed(&image).unwrap());
    }

    #[test]
    fn test_seeded_parameters() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        EmbeddingNet::new(8, vb).unwrap();
        seed_parameters(&varmap, INIT_SEED).unwrap();

        let vars = varmap.data().lock().unwrap();
        let bias = vars["embeddingnet.fc.bias"].as_tensor().to_vec1::<f32>().unwrap();
        let bound = 1.0 / (FEATURE_DIM as f32).sqrt();
        assert!(bias.iter().all(|v| v.abs() <= bound));
        assert!(bias.iter().any(|v| *v != 0.0));

        // batch norm keeps its constant initialization
        let gamma = vars["embeddingnet.bn1.weight"].as_tensor().to_vec1::<f32>().unwrap();
        assert!(gamma.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_batch_isolates_empty_image() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let first = sample_image(11, 130, 112);
        let last = sample_image(12, 112, 140);
        let images = vec![first.clone(), DynamicImage::new_rgb8(0, 0), last.clone()];

        let report = generator.embed_batch(&images).unwrap();

        assert_eq!(report.len(), 3);
        assert!(matches!(report.results()[1], Err(Error::EmptyImage { width: 0, height: 0 })));
        assert_close(report.results()[0].as_ref().unwrap(), &generator.embed(&first).unwrap());
        assert_close(report.results()[2].as_ref().unwrap(), &generator.embed(&last).unwrap());
        assert!(report.into_embeddings().is_err());
    }

    #[test]
    fn test_empty_batch() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        assert!(generator.embed_batch(&[]).unwrap().is_empty());

        let empty: [&[u8]; 0] = [];
        assert!(generator.embed_encoded_batch(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_encoded_batch_isolates_corrupt_item() {
        let generator = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let first = sample_image(5, 140, 112);
        let third = sample_image(6, 112, 180);
        let items = vec![png_bytes(&first), b"corrupt image payload".to_vec(), png_bytes(&third)];

        let report = generator.embed_encoded_batch(&items).unwrap();

        assert_eq!(report.len(), 3);
        let ok: Vec<usize> = report.successes().map(|(i, _)| i).collect();
        let failed: Vec<usize> = report.failures().map(|(i, _)| i).collect();
        assert_eq!(ok, vec![0, 2]);
        assert_eq!(failed, vec![1]);
        assert!(matches!(report.results()[1], Err(Error::Decode(_))));

        assert_close(report.results()[0].as_ref().unwrap(), &generator.embed(&first).unwrap());
        assert_close(report.results()[2].as_ref().unwrap(), &generator.embed(&third).unwrap());
    }

    #[test]
    fn test_checkpoint_overrides_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fashion.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert(
            "fc.weight".to_string(),
            Tensor::zeros((8, 512), DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "embeddingnet.embeddingnet.fc.bias".to_string(),
            Tensor::new(&[1.0f32, -1.0, 0.5, 0.0, 2.0, 3.0, -0.25, 4.0], &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "text_branch.weight".to_string(),
            Tensor::ones(4, DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let config = cpu_config().with_embedding_size(8).with_checkpoint(&path);
        let generator = EmbeddingGenerator::new(&config).unwrap();

        let report = generator.weight_sources().checkpoint.as_ref().unwrap();
        assert!(report.is_applied());
        assert_eq!(report.applied, 2);
        assert_eq!(report.dropped, vec!["text_branch.weight"]);

        // zero projection leaves only the bias
        let embedding = generator.embed(&sample_image(7, 150, 150)).unwrap();
        assert_eq!(embedding.as_slice(), &[1.0, -1.0, 0.5, 0.0, 2.0, 3.0, -0.25, 4.0]);
    }

    #[test]
    fn test_imagenet_backbone_keeps_seeded_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resnet18.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert(
            "conv1.weight".to_string(),
            Tensor::ones((64, 3, 7, 7), DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "bn1.num_batches_tracked".to_string(),
            Tensor::zeros((), DType::I64, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "fc.weight".to_string(),
            Tensor::zeros((1000, 512), DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let seeded = EmbeddingGenerator::new(&cpu_config()).unwrap();
        let generator = EmbeddingGenerator::new(&cpu_config().with_backbone(&path)).unwrap();

        let report = generator.weight_sources().backbone.as_ref().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.unknown, vec!["embeddingnet.bn1.num_batches_tracked"]);
        assert_eq!(report.mismatched, vec!["embeddingnet.fc.weight"]);

        let stem = generator.parameter("embeddingnet.conv1.weight").unwrap();
        assert_eq!(stem.flatten_all().unwrap().min(0).unwrap().to_scalar::<f32>().unwrap(), 1.0);
        let head = |g: &EmbeddingGenerator| {
            g.parameter("embeddingnet.fc.weight").unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap()
        };
        assert_eq!(head(&generator), head(&seeded));
    }

    #[test]
    fn test_incompatible_checkpoint_keeps_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heads.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert("masks.weight".to_string(), Tensor::ones(4, DType::F32, &Device::Cpu).unwrap());
        tensors.insert("metric_branch.weight".to_string(), Tensor::ones(4, DType::F32, &Device::Cpu).unwrap());
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let generator = EmbeddingGenerator::new(&cpu_config().with_checkpoint(&path)).unwrap();
        let report = generator.weight_sources().checkpoint.as_ref().unwrap();
        assert_eq!(report.applied, 0);
        assert!(!report.is_applied());
        assert!(generator.parameter("embeddingnet.fc.weight").is_some());
        assert_eq!(generator.embed(&sample_image(8, 120, 120)).unwrap().dim(), 64);
    }

    #[test]
    fn test_unreadable_checkpoint_does_not_fail_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pt");
        std::fs::write(&path, b"garbage").unwrap();

        let generator = EmbeddingGenerator::new(&cpu_config().with_checkpoint(&path)).unwrap();
        assert!(!generator.weight_sources().checkpoint.as_ref().unwrap().is_applied());
        assert!(generator.embed(&sample_image(9, 112, 112)).is_ok());
    }
}
