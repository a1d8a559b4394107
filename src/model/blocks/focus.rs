use burn::prelude::*;

use super::{Activation, BaseConv};

/// Space-to-depth stem: folds every 2x2 pixel patch into the channel axis,
/// then applies a conv.
#[derive(Module, Debug)]
pub struct Focus<B: Backend> {
    conv: BaseConv<B>,
}

impl<B: Backend> Focus<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        activation: Activation,
    ) -> Self {
        Self {
            conv: BaseConv::new(device, in_channels * 4, out_channels, kernel_size, 1, activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(space_to_depth(x))
    }
}

/// [N, C, H, W] -> [N, 4C, H/2, W/2].
///
/// Channel blocks are ordered top-left, bottom-left, top-right, bottom-right.
pub fn space_to_depth<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let (h2, w2) = (height / 2, width / 2);

    // [N, C, H/2, row, W/2, col] -> [N, col, row, C, H/2, W/2]
    let x: Tensor<B, 6> = x.reshape([batch, channels, h2, 2, w2, 2]);
    let x = x.permute([0, 5, 3, 1, 2, 4]);

    x.reshape([batch, channels * 4, h2, w2])
}
