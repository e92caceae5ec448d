use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image has no pixels: {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("Inference error: {0}")]
    Inference(#[from] candle_core::Error),

    #[error("Checkpoint error ({}): {reason}", .path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error("Network returned {actual} embeddings for {expected} inputs")]
    MissingOutput { expected: usize, actual: usize },

    #[error("Weight state error: {0}")]
    WeightState(String),

    #[error("Model hub error: {0}")]
    Hub(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] stylex_core::Error),
}
