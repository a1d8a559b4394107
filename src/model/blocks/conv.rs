use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::*;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};

use super::{pad_spatial, FeatureOp};

/// Non-linearity applied after every normalized convolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Silu,
    Relu,
    /// Leaky ReLU with slope 0.1.
    Lrelu,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Silu => activation::silu(x),
            Activation::Relu => activation::relu(x),
            Activation::Lrelu => activation::leaky_relu(x, 0.1),
        }
    }
}

/// Conv2d -> BatchNorm -> activation, "same" padding.
#[derive(Module, Debug)]
pub struct BaseConv<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    activation: Ignored<Activation>,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    padding: usize,
}

impl<B: Backend> BaseConv<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
    ) -> Self {
        Self::grouped(device, in_channels, out_channels, kernel_size, stride, 1, activation)
    }

    pub fn grouped(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: Activation,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;

        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_groups(groups)
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels)
                .with_epsilon(1e-3)
                .with_momentum(0.03)
                .init(device),
            activation: Ignored(activation),
            in_channels,
            out_channels,
            stride,
            padding,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // Zero padding is applied here; the conv itself runs unpadded.
        let x = self.conv.forward(pad_spatial(x, self.padding, 0.0));
        let x = self.bn.forward(x);
        self.activation.apply(x)
    }
}

impl<B: Backend> FeatureOp<B> for BaseConv<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

/// Depthwise-separable convolution: a per-channel k x k conv followed by a
/// pointwise 1x1 conv.
#[derive(Module, Debug)]
pub struct DwConv<B: Backend> {
    dconv: BaseConv<B>,
    pconv: BaseConv<B>,
}

impl<B: Backend> DwConv<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
    ) -> Self {
        Self {
            dconv: BaseConv::grouped(
                device,
                in_channels,
                in_channels,
                kernel_size,
                stride,
                in_channels,
                activation,
            ),
            pconv: BaseConv::new(device, in_channels, out_channels, 1, 1, activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pconv.forward(self.dconv.forward(x))
    }
}

impl<B: Backend> FeatureOp<B> for DwConv<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        self.dconv.in_channels
    }

    fn out_channels(&self) -> usize {
        self.pconv.out_channels
    }

    fn stride(&self) -> usize {
        self.dconv.stride
    }
}

/// Convolution strategy picked once from the depthwise flag.
#[derive(Module, Debug)]
pub enum ConvBlock<B: Backend> {
    Standard(BaseConv<B>),
    Depthwise(DwConv<B>),
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        depthwise: bool,
        activation: Activation,
    ) -> Self {
        if depthwise {
            ConvBlock::Depthwise(DwConv::new(
                device,
                in_channels,
                out_channels,
                kernel_size,
                stride,
                activation,
            ))
        } else {
            ConvBlock::Standard(BaseConv::new(
                device,
                in_channels,
                out_channels,
                kernel_size,
                stride,
                activation,
            ))
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            ConvBlock::Standard(conv) => conv.forward(x),
            ConvBlock::Depthwise(conv) => conv.forward(x),
        }
    }

    pub fn is_depthwise(&self) -> bool {
        matches!(self, ConvBlock::Depthwise(_))
    }
}

impl<B: Backend> FeatureOp<B> for ConvBlock<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        match self {
            ConvBlock::Standard(conv) => conv.in_channels(),
            ConvBlock::Depthwise(conv) => conv.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            ConvBlock::Standard(conv) => conv.out_channels(),
            ConvBlock::Depthwise(conv) => conv.out_channels(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            ConvBlock::Standard(conv) => conv.stride(),
            ConvBlock::Depthwise(conv) => conv.stride(),
        }
    }
}
