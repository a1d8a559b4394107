use burn::nn::conv::{ConvTranspose2d, ConvTranspose2dConfig};
use burn::prelude::*;

use super::FeatureOp;

/// Learned x2 upsampling (transposed conv, kernel 3, stride 2, padding 1,
/// output padding 1), which also projects the channel count.
/// [N, C_in, H, W] -> [N, C_out, 2H, 2W]
#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    deconv: ConvTranspose2d<B>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> Upsample<B> {
    pub const STRIDE: usize = 2;

    pub fn new(device: &B::Device, in_channels: usize, out_channels: usize) -> Self {
        Self {
            deconv: ConvTranspose2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([Self::STRIDE, Self::STRIDE])
                .with_padding([1, 1])
                .with_padding_out([1, 1])
                .init(device),
            in_channels,
            out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.deconv.forward(x)
    }
}

impl<B: Backend> FeatureOp<B> for Upsample<B> {
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
        Self::STRIDE
    }
}
