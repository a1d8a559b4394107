use burn::prelude::*;

use super::{Activation, BaseConv, ConvBlock};

/// 1x1 reduce then 3x3 conv, with an identity shortcut when shapes allow.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    cv1: BaseConv<B>,
    cv2: ConvBlock<B>,
    add: bool,
}

impl<B: Backend> Bottleneck<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        shortcut: bool,
        depthwise: bool,
        activation: Activation,
    ) -> Self {
        let hidden = out_channels;

        Self {
            cv1: BaseConv::new(device, in_channels, hidden, 1, 1, activation),
            cv2: ConvBlock::new(device, hidden, out_channels, 3, 1, depthwise, activation),
            add: shortcut && in_channels == out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let y = self.cv2.forward(self.cv1.forward(x.clone()));

        if self.add {
            y + x
        } else {
            y
        }
    }
}
