use burn::prelude::*;

use super::{Activation, BaseConv, FeatureOp};

/// 1x1 conv block that maps a concatenated tensor back to a level's
/// canonical channel count without touching the spatial size.
#[derive(Module, Debug)]
pub struct ChannelResize<B: Backend> {
    conv: BaseConv<B>,
}

impl<B: Backend> ChannelResize<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        activation: Activation,
    ) -> Self {
        Self {
            conv: BaseConv::new(device, in_channels, out_channels, 1, 1, activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(x)
    }
}

impl<B: Backend> FeatureOp<B> for ChannelResize<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }
}
