//! # Stylex Model
//!
//! Image embedding inference for the Stylex compatibility engine.
//!
//! This crate provides:
//!
//! - [`preprocess()`] - The fixed resize, crop and normalize transform
//! - [`EmbeddingNet`] - ResNet-18 backbone with a linear embedding head
//! - [`CheckpointLoader`] - Non-strict weight loading with key remapping
//! - [`pretrained`] - ImageNet backbone weights from the Hugging Face hub
//! - [`EmbeddingGenerator`] - Single, batch and encoded-batch inference
//! - [`EmbeddingService`] / [`ModelHandle`] - Embedding plus ranking behind one shared handle
//!
//! ## Example
//!
//! ```rust,no_run
//! use stylex_model::{DeviceChoice, ModelHandle, ServiceConfig};
//!
//! let config = ServiceConfig::default()
//!     .with_device(DeviceChoice::Cpu)
//!     .with_checkpoint("models/fashion_compat.pt");
//! let service = ModelHandle::new(&config).unwrap();
//!
//! let shirt = image::open("shirt.jpg").unwrap();
//! let trousers = image::open("trousers.jpg").unwrap();
//! let embeddings = service.embed_batch(&[shirt, trousers]).unwrap().into_embeddings().unwrap();
//!
//! let score = service.compatibility_score(&embeddings[0], &embeddings[1]).unwrap();
//! println!("compatibility: {}", score);
//! ```

pub mod error;
pub mod device;
pub mod config;
pub mod preprocess;
pub mod network;
pub mod checkpoint;
pub mod pretrained;
pub mod generator;
pub mod service;

pub use error::{Error, Result};
pub use device::DeviceChoice;
pub use config::ServiceConfig;
pub use preprocess::{decode_image, preprocess, preprocess_batch, ImageTensor, INPUT_SIZE};
pub use network::EmbeddingNet;
pub use checkpoint::{CheckpointLoader, KeyRemapper, LoadReport, LoadStatus, RemapRule};
pub use generator::{BatchReport, EmbeddingGenerator, WeightSources};
pub use service::{EmbeddingService, ModelHandle};
