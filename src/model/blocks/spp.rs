use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::*;

use super::{pad_spatial, Activation, BaseConv};

const POOL_SIZES: [usize; 3] = [5, 9, 13];

/// Spatial pyramid pooling with parallel max-pools of increasing size.
#[derive(Module, Debug)]
pub struct SppBottleneck<B: Backend> {
    conv1: BaseConv<B>,
    conv2: BaseConv<B>,
    pools: Vec<MaxPool2d>,
}

impl<B: Backend> SppBottleneck<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        activation: Activation,
    ) -> Self {
        let hidden = in_channels / 2;
        let pools = POOL_SIZES
            .iter()
            .map(|&k| {
                MaxPool2dConfig::new([k, k])
                    .with_strides([1, 1])
                    .init()
            })
            .collect();

        Self {
            conv1: BaseConv::new(device, in_channels, hidden, 1, 1, activation),
            conv2: BaseConv::new(device, hidden * (POOL_SIZES.len() + 1), out_channels, 1, 1, activation),
            pools,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);

        let mut branches = vec![x.clone()];
        // -inf padding keeps border maxima equal to an unpadded window.
        branches.extend(
            self.pools
                .iter()
                .zip(POOL_SIZES)
                .map(|(pool, k)| pool.forward(pad_spatial(x.clone(), k / 2, f32::NEG_INFINITY))),
        );

        self.conv2.forward(Tensor::cat(branches, 1))
    }
}
