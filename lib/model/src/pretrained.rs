//! Pretrained backbone weights from the Hugging Face hub
//!
//! The torchvision ImageNet ResNet-18 weights, republished as safetensors.
//! Keys are bare torchvision names (`conv1.weight`, `layer1.0.bn1.bias`, ...)
//! and go through the same remapping as any other backbone file. The
//! 1000-class `fc` does not fit the embedding head and is skipped as a shape
//! mismatch.

use crate::{Error, Result};
use hf_hub::api::sync::Api;
use hf_hub::Repo;
use std::path::PathBuf;

/// Hub repository holding the ImageNet ResNet-18 weights
pub const BACKBONE_REPO: &str = "timm/resnet18.tv_in1k";

/// Weight file inside [`BACKBONE_REPO`]
pub const BACKBONE_FILE: &str = "model.safetensors";

/// Fetch the pretrained backbone, returning the local cached path
///
/// Files already in the hub cache are not downloaded again.
pub fn fetch_backbone() -> Result<PathBuf> {
    tracing::info!(repo = BACKBONE_REPO, "fetching pretrained backbone");

    let api = Api::new().map_err(|e| Error::Hub(format!("failed to initialize hub client: {}", e)))?;
    let repo = api.repo(Repo::model(BACKBONE_REPO.to_string()));

    repo.get(BACKBONE_FILE)
        .map_err(|e| Error::Hub(format!("failed to fetch {}/{}: {}", BACKBONE_REPO, BACKBONE_FILE, e)))
}
