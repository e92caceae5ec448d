use crate::device::DeviceChoice;
use crate::{Error, Result};
use std::path::PathBuf;
use stylex_core::DEFAULT_EMBEDDING_SIZE;

/// Trained checkpoint overlaid on the network at startup
pub const MODEL_PATH_ENV: &str = "EMBEDDING_MODEL_PATH";
/// Pretrained backbone weights applied before the checkpoint
pub const BACKBONE_PATH_ENV: &str = "EMBEDDING_BACKBONE_PATH";
/// Compute device override (`auto`, `cpu`, `cuda[:N]`, `metal[:N]`)
pub const DEVICE_ENV: &str = "EMBEDDING_DEVICE";
/// Number of dimensions of the produced embeddings
pub const EMBEDDING_SIZE_ENV: &str = "EMBEDDING_SIZE";
/// Whether to fetch pretrained backbone weights when no backbone file is set
pub const PRETRAINED_ENV: &str = "EMBEDDING_PRETRAINED";

/// Configuration for the embedding service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub checkpoint_path: Option<PathBuf>,
    pub backbone_path: Option<PathBuf>,
    pub device: DeviceChoice,
    pub embedding_size: usize,
    /// Download the ImageNet backbone when `backbone_path` is unset
    pub pretrained: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: None,
            backbone_path: None,
            device: DeviceChoice::Auto,
            embedding_size: DEFAULT_EMBEDDING_SIZE,
            pretrained: true,
        }
    }
}

impl ServiceConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        config.checkpoint_path = get(MODEL_PATH_ENV).map(PathBuf::from);
        config.backbone_path = get(BACKBONE_PATH_ENV).map(PathBuf::from);

        if let Some(device) = get(DEVICE_ENV) {
            config.device = device.parse()?;
        }

        if let Some(size) = get(EMBEDDING_SIZE_ENV) {
            config.embedding_size = size.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{} must be a positive integer, got {:?}", EMBEDDING_SIZE_ENV, size))
            })?;
        }

        if let Some(flag) = get(PRETRAINED_ENV) {
            config.pretrained = parse_flag(&flag).ok_or_else(|| {
                Error::InvalidConfig(format!("{} must be true or false, got {:?}", PRETRAINED_ENV, flag))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding_size == 0 {
            return Err(Error::InvalidConfig("embedding size must be greater than zero".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_backbone(mut self, path: impl Into<PathBuf>) -> Self {
        self.backbone_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: DeviceChoice) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn with_pretrained(mut self, pretrained: bool) -> Self {
        self.pretrained = pretrained;
        self
    }

    #[must_use]
    pub fn with_embedding_size(mut self, embedding_size: usize) -> Self {
        self.embedding_size = embedding_size;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
