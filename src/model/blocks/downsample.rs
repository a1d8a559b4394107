use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

use super::{pad_spatial, Activation, BaseConv, FeatureOp};

const STRIDE: usize = 2;
const WIDE_DILATION: usize = 3;
const SWITCH_POOL: usize = 5;

/// Which stride-2 operator the fusion network downsamples with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleKind {
    /// Switchable receptive field (dilation 1 / dilation 3 mixed per location).
    #[default]
    Switchable,
    /// Plain 3x3 stride-2 conv block.
    Plain,
}

/// Stride-2 conv whose receptive field switches per location between a
/// dilation-1 and a dilation-3 branch, wrapped in global context terms.
#[derive(Module, Debug)]
pub struct SwitchableConv<B: Backend> {
    squeeze: AdaptiveAvgPool2d,
    pre_context: Conv2d<B>,
    switch_pool: AvgPool2d,
    switch: Conv2d<B>,
    narrow: Conv2d<B>,
    wide: Conv2d<B>,
    post_context: Conv2d<B>,
    in_channels: usize,
    out_channels: usize,
}

impl<B: Backend> SwitchableConv<B> {
    pub fn new(device: &B::Device, in_channels: usize, out_channels: usize) -> Self {
        Self {
            squeeze: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            pre_context: Conv2dConfig::new([in_channels, in_channels], [1, 1]).init(device),
            switch_pool: AvgPool2dConfig::new([SWITCH_POOL, SWITCH_POOL])
                .with_strides([1, 1])
                .init(),
            switch: Conv2dConfig::new([in_channels, 1], [1, 1])
                .with_stride([STRIDE, STRIDE])
                .init(device),
            narrow: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([STRIDE, STRIDE])
                .init(device),
            wide: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([STRIDE, STRIDE])
                .with_dilation([WIDE_DILATION, WIDE_DILATION])
                .init(device),
            post_context: Conv2dConfig::new([out_channels, out_channels], [1, 1]).init(device),
            in_channels,
            out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // Global context terms are [N, C, 1, 1] and broadcast over H and W.
        let context = self.pre_context.forward(self.squeeze.forward(x.clone()));
        let x = x + context;

        // Switch in [0, 1]: 1 selects the narrow branch, 0 the wide one.
        // Zero padding applied up front; the pool averages over the padded
        // window like a count-include-pad average.
        let pooled = self.switch_pool.forward(pad_spatial(x.clone(), SWITCH_POOL / 2, 0.0));
        let switch = sigmoid(self.switch.forward(pooled));
        let narrow = self.narrow.forward(pad_spatial(x.clone(), 1, 0.0));
        let wide = self.wide.forward(pad_spatial(x, WIDE_DILATION, 0.0));

        let y = wide.clone() + switch * (narrow - wide);

        let context = self.post_context.forward(self.squeeze.forward(y.clone()));
        y + context
    }
}

/// Stride-2 downsampling strategy, fixed at construction.
#[derive(Module, Debug)]
pub enum Downsample<B: Backend> {
    Switchable(SwitchableConv<B>),
    Plain(BaseConv<B>),
}

impl<B: Backend> Downsample<B> {
    pub fn new(
        device: &B::Device,
        kind: DownsampleKind,
        in_channels: usize,
        out_channels: usize,
        activation: Activation,
    ) -> Self {
        match kind {
            DownsampleKind::Switchable => {
                Downsample::Switchable(SwitchableConv::new(device, in_channels, out_channels))
            }
            DownsampleKind::Plain => Downsample::Plain(BaseConv::new(
                device,
                in_channels,
                out_channels,
                3,
                STRIDE,
                activation,
            )),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Downsample::Switchable(op) => op.forward(x),
            Downsample::Plain(op) => op.forward(x),
        }
    }

    pub fn kind(&self) -> DownsampleKind {
        match self {
            Downsample::Switchable(_) => DownsampleKind::Switchable,
            Downsample::Plain(_) => DownsampleKind::Plain,
        }
    }
}

impl<B: Backend> FeatureOp<B> for Downsample<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        match self {
            Downsample::Switchable(op) => op.in_channels,
            Downsample::Plain(op) => op.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Downsample::Switchable(op) => op.out_channels,
            Downsample::Plain(op) => op.out_channels(),
        }
    }

    fn stride(&self) -> usize {
        STRIDE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_both_strategies_halve_even_inputs() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 8, 12, 16], Distribution::Default, &device);

        for kind in [DownsampleKind::Switchable, DownsampleKind::Plain] {
            let down = Downsample::<TestBackend>::new(&device, kind, 8, 24, Activation::Silu);
            assert_eq!(down.kind(), kind);
            assert_eq!(down.forward(x.clone()).dims(), [2, 24, 6, 8]);
            assert_eq!(down.stride(), 2);
        }
    }

    #[test]
    fn test_switchable_on_tiny_wide_maps() {
        let device = Default::default();

        for (channels, size) in [(64, 4), (128, 2), (128, 1), (256, 3)] {
            let down = Downsample::<TestBackend>::new(
                &device,
                DownsampleKind::Switchable,
                channels,
                channels,
                Activation::Silu,
            );
            let x = Tensor::<TestBackend, 4>::random(
                [1, channels, size, size],
                Distribution::Default,
                &device,
            );
            let out = (size + 1) / 2;
            assert_eq!(down.forward(x).dims(), [1, channels, out, out]);
        }
    }

    #[test]
    fn test_switch_pool_matches_padded_average() {
        let device = Default::default();
        let conv = SwitchableConv::<TestBackend>::new(&device, 1, 1);
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 1, 1], &device);

        // One real pixel in a 5x5 zero-padded window.
        let pooled = conv.switch_pool.forward(pad_spatial(x, SWITCH_POOL / 2, 0.0));
        let values: Vec<f32> = pooled.into_data().to_vec().unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 1.0 / 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_kind_parses_lowercase() {
        let kind: DownsampleKind = serde_yaml::from_str("plain").unwrap();
        assert_eq!(kind, DownsampleKind::Plain);
    }
}
