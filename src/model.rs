use burn::prelude::*;
use nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};

/// Anything that maps an image batch `[batch, channels, height, width]` to
/// class scores `[batch, classes]`.
pub trait ImageClassifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// Stride-2 3x3 convolution, batch norm and ReLU. Halves height and width.
#[derive(Module, Debug)]
struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.norm.forward(self.conv.forward(images));
        self.relu.forward(features)
    }
}

/// Small convolutional baseline: conv blocks, global average pool, then
/// dropout and a linear layer over the pooled channels.
#[derive(Module, Debug)]
pub struct BaselineCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> ImageClassifier<B> for BaselineCnn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self
            .blocks
            .iter()
            .fold(images, |x, block| block.forward(x));
        let pooled = self.pool.forward(features).flatten(1, 3);

        self.head.forward(self.dropout.forward(pooled))
    }
}

#[derive(Config, Debug)]
pub struct BaselineCnnConfig {
    pub classes: usize,

    /// Output channels of each conv block, in order.
    #[config(default = "vec![32, 64, 128]")]
    pub channels: Vec<usize>,

    #[config(default = 0.5)]
    pub dropout: f64,
}

impl BaselineCnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BaselineCnn<B> {
        let widths: Vec<usize> = std::iter::once(3).chain(self.channels.iter().copied()).collect();
        let blocks = widths
            .windows(2)
            .map(|pair| ConvBlock::new(pair[0], pair[1], device))
            .collect();
        let features = widths.last().copied().unwrap_or(3);

        BaselineCnn {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(features, self.classes).init(device),
        }
    }
}
