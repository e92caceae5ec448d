//! ResNet-18 embedding network.
//!
//! A torchvision-layout ResNet-18 whose classifier is replaced by a linear
//! projection to the embedding size. Parameter names match torchvision
//! (`conv1.weight`, `layer2.0.downsample.1.running_var`, `fc.bias`, ...)
//! under a single `embeddingnet.` prefix, so trained checkpoints map onto
//! it after key remapping.
//!
//! # Architecture
//!
//! - 7x7 stride-2 stem convolution, batch norm, ReLU, 3x3 stride-2 max pool
//! - Four stages of two basic blocks with 64/128/256/512 channels
//! - 1x1 strided projection on the shortcut when a block changes shape
//! - Global average pooling, then `fc: 512 -> embedding_size`
//!
//! Batch norm always uses its running statistics; the network is only ever
//! evaluated, never trained.

use candle_core::{Result, Tensor, D};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Linear, Module, VarBuilder};

/// Output channels of the last stage
pub const FEATURE_DIM: usize = 512;

const BN_EPS: f64 = 1e-5;

/// Prefix under which the backbone lives inside the embedding network
const EMBEDDINGNET: &str = "embeddingnet";

fn conv(in_c: usize, out_c: usize, kernel: usize, stride: usize, padding: usize, vb: VarBuilder<'_>) -> Result<Conv2d> {
    let config = Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    };
    candle_nn::conv2d_no_bias(in_c, out_c, kernel, config, vb)
}

fn batch_norm(channels: usize, vb: VarBuilder<'_>) -> Result<BatchNorm> {
    candle_nn::batch_norm(channels, BN_EPS, vb)
}

/// Conv followed by eval-mode batch norm.
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBn {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.conv)?.apply_t(&self.bn, false)
    }
}

/// Two 3x3 convolutions with an identity or projected shortcut.
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<ConvBn>,
}

impl BasicBlock {
    fn new(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder<'_>) -> Result<Self> {
        let conv1 = conv(in_c, out_c, 3, stride, 1, vb.pp("conv1"))?;
        let bn1 = batch_norm(out_c, vb.pp("bn1"))?;
        let conv2 = conv(out_c, out_c, 3, 1, 1, vb.pp("conv2"))?;
        let bn2 = batch_norm(out_c, vb.pp("bn2"))?;

        let downsample = if stride != 1 || in_c != out_c {
            let vb = vb.pp("downsample");
            Some(ConvBn {
                conv: conv(in_c, out_c, 1, stride, 0, vb.pp("0"))?,
                bn: batch_norm(out_c, vb.pp("1"))?,
            })
        } else {
            None
        };

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .apply(&self.conv2)?
            .apply_t(&self.bn2, false)?;

        let shortcut = match &self.downsample {
            Some(projection) => projection.forward(xs)?,
            None => xs.clone(),
        };

        (ys + shortcut)?.relu()
    }
}

/// ResNet-18 trunk plus embedding head.
pub struct EmbeddingNet {
    stem: ConvBn,
    blocks: Vec<BasicBlock>,
    fc: Linear,
    embedding_size: usize,
}

impl EmbeddingNet {
    /// Build the network, reading parameters from `vb` under `embeddingnet.`
    pub fn new(embedding_size: usize, vb: VarBuilder<'_>) -> Result<Self> {
        let vb = vb.pp(EMBEDDINGNET);

        let stem = ConvBn {
            conv: conv(3, 64, 7, 2, 3, vb.pp("conv1"))?,
            bn: batch_norm(64, vb.pp("bn1"))?,
        };

        let stages = [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, FEATURE_DIM, 2)];
        let mut blocks = Vec::with_capacity(stages.len() * 2);
        for (index, &(in_c, out_c, stride)) in stages.iter().enumerate() {
            let vb = vb.pp(format!("layer{}", index + 1));
            blocks.push(BasicBlock::new(in_c, out_c, stride, vb.pp("0"))?);
            blocks.push(BasicBlock::new(out_c, out_c, 1, vb.pp("1"))?);
        }

        let fc = candle_nn::linear(FEATURE_DIM, embedding_size, vb.pp("fc"))?;

        Ok(Self {
            stem,
            blocks,
            fc,
            embedding_size,
        })
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }
}

impl Module for EmbeddingNet {
    /// `(batch, 3, H, W)` images to `(batch, embedding_size)` embeddings
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = self.stem.forward(xs)?.relu()?;

        // edge padding is exact for max pooling over non-negative ReLU output
        xs = xs
            .pad_with_same(D::Minus1, 1, 1)?
            .pad_with_same(D::Minus2, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }

        // global average pool: (batch, 512, h, w) -> (batch, 512)
        let pooled = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        pooled.apply(&self.fc)
    }
}
