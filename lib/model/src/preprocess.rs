//! Image to tensor preprocessing
//!
//! The transform is fixed: RGB conversion, shorter side resized to 112,
//! 112x112 center crop, scaling to [0, 1] and ImageNet normalization.
//! Embeddings are only comparable when every producer applies exactly the
//! same steps, so none of them is configurable.

use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use rayon::prelude::*;

/// Side length of the square network input
pub const INPUT_SIZE: u32 = 112;

/// Per-channel ImageNet mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const CHANNELS: usize = 3;
const PLANE: usize = (INPUT_SIZE * INPUT_SIZE) as usize;

/// A preprocessed image in channel-first (3, 112, 112) layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    /// Number of values in one image tensor
    pub const LEN: usize = CHANNELS * PLANE;

    /// Tensor shape as (channels, height, width)
    pub const SHAPE: (usize, usize, usize) = (CHANNELS, INPUT_SIZE as usize, INPUT_SIZE as usize);

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x`
    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * PLANE + y * INPUT_SIZE as usize + x]
    }
}

/// Decode an encoded image (PNG, JPEG, WebP, ...)
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Apply the fixed preprocessing pipeline to one image
pub fn preprocess(image: &DynamicImage) -> Result<ImageTensor> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage { width, height });
    }

    // drops alpha and expands grayscale
    let rgb = image.to_rgb8();

    let (new_width, new_height) = resized_dims(width, height, INPUT_SIZE);
    let resized = if (new_width, new_height) == (width, height) {
        rgb
    } else {
        imageops::resize(&rgb, new_width, new_height, FilterType::Triangle)
    };

    let left = crop_offset(new_width, INPUT_SIZE);
    let top = crop_offset(new_height, INPUT_SIZE);
    let cropped = imageops::crop_imm(&resized, left, top, INPUT_SIZE, INPUT_SIZE).to_image();

    Ok(normalize(&cropped))
}

/// Preprocess several images in parallel, keeping input order
///
/// Each slot succeeds or fails on its own.
pub fn preprocess_batch(images: &[DynamicImage]) -> Vec<Result<ImageTensor>> {
    images.par_iter().map(preprocess).collect()
}

/// Dimensions after scaling the shorter side to `size`
///
/// The longer side is `floor(size * long / short)`, so aspect ratio is kept
/// up to truncation.
pub fn resized_dims(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| (u64::from(size) * u64::from(long) / u64::from(short)) as u32;
    if width <= height {
        (size, scale(height, width))
    } else {
        (scale(width, height), size)
    }
}

/// Offset of a centered window of `size` inside `dim`
///
/// Half-pixel offsets round to the nearest even value.
pub fn crop_offset(dim: u32, size: u32) -> u32 {
    let diff = dim.saturating_sub(size);
    let half = diff / 2;
    if diff % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

fn normalize(image: &RgbImage) -> ImageTensor {
    let mut data = vec![0.0f32; ImageTensor::LEN];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = y as usize * INPUT_SIZE as usize + x as usize;
        for c in 0..CHANNELS {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * PLANE + idx] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    ImageTensor { data }
}
