//! Convolution blocks: conv → batch norm → ReLU → optional max-pool.

use crate::layers::{Activation, NormSettings, he_normal};
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, PaddingConfig2d};
use burn::tensor::{Tensor, backend::Backend};

/// Configuration for a [`ConvBlock`].
///
/// Spatial sizes are given as `[width, height]`, matching the image layout
/// `[batch, width, height, channels]` used at the model boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub pool: Option<[usize; 2]>,
}

impl ConvBlockConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: [usize; 2]) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Output `[width, height]` for an input of the given spatial size.
    ///
    /// Convolutions keep the size ("same" padding); pooling floors.
    pub fn output_size(&self, size: [usize; 2]) -> [usize; 2] {
        match self.pool {
            Some([pw, ph]) => [size[0] / pw, size[1] / ph],
            None => size,
        }
    }

    pub fn init<B: Backend>(&self, norm: NormSettings, device: &B::Device) -> ConvBlock<B> {
        let [before, after] = same_padding(self.kernel);
        let symmetric = before == after;

        let padding = if symmetric {
            PaddingConfig2d::Explicit(before, before, before, before)
        } else {
            PaddingConfig2d::Valid
        };

        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel, self.kernel],
        )
        .with_padding(padding)
        .with_initializer(he_normal())
        .init(device);

        let pool = self
            .pool
            .map(|pool| MaxPool2dConfig::new(pool).with_strides(pool).init());

        ConvBlock {
            conv,
            batch_norm: norm.config(self.out_channels).init(device),
            pool,
            out_channels: self.out_channels,
            pad_before: if symmetric { 0 } else { before },
            pad_after: if symmetric { 0 } else { after },
        }
    }
}

/// Split of the total "same" padding for a kernel, TensorFlow style: the
/// extra row or column of an even kernel goes after the input.
pub fn same_padding(kernel: usize) -> [usize; 2] {
    let total = kernel.saturating_sub(1);
    let before = total / 2;
    [before, total - before]
}

/// A convolution stage operating on `[batch, channels, width, height]` maps.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    batch_norm: BatchNorm<B>,
    pool: Option<MaxPool2d>,
    out_channels: usize,
    /// Zero padding added on both spatial axes when "same" padding is
    /// asymmetric; zero otherwise.
    pad_before: usize,
    pad_after: usize,
}

impl<B: Backend> ConvBlock<B> {
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let input = self.pad(input);
        let x = self.conv.forward(input);
        let x = self.batch_norm.forward(x);
        let x = Activation::Relu.apply(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }

    fn pad(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_dim(input, 2, self.pad_before, self.pad_after);
        pad_dim(x, 3, self.pad_before, self.pad_after)
    }
}

fn pad_dim<B: Backend>(
    input: Tensor<B, 4>,
    dim: usize,
    before: usize,
    after: usize,
) -> Tensor<B, 4> {
    if before == 0 && after == 0 {
        return input;
    }

    let device = input.device();
    let mut parts = Vec::with_capacity(3);
    let zeros = |len: usize| {
        let mut shape = input.dims();
        shape[dim] = len;
        Tensor::<B, 4>::zeros(shape, &device)
    };

    if before > 0 {
        parts.push(zeros(before));
    }
    let trailing = (after > 0).then(|| zeros(after));
    parts.push(input);
    parts.extend(trailing);

    Tensor::cat(parts, dim)
}
