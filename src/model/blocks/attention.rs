use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

use super::{Activation, FeatureOp};

const REDUCTION: usize = 16;
const MIN_HIDDEN: usize = 8;

/// Shape-preserving reweighting applied to each backbone level before fusion.
pub trait AttentionGate<B: Backend> {
    fn gate(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Which gate the fusion network is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionKind {
    #[default]
    Channel,
    Identity,
}

/// Squeeze-and-excitation style channel attention.
#[derive(Module, Debug)]
pub struct ChannelAttention<B: Backend> {
    squeeze: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
    activation: Ignored<Activation>,
    channels: usize,
}

impl<B: Backend> ChannelAttention<B> {
    pub fn new(device: &B::Device, channels: usize, activation: Activation) -> Self {
        let hidden = (channels / REDUCTION).max(MIN_HIDDEN);

        Self {
            squeeze: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, hidden], [1, 1]).init(device),
            expand: Conv2dConfig::new([hidden, channels], [1, 1]).init(device),
            activation: Ignored(activation),
            channels,
        }
    }

    /// Per-channel weights in (0, 1), shaped [N, C, 1, 1].
    pub fn weights(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let w = self.reduce.forward(self.squeeze.forward(x));
        let w = self.activation.apply(w);
        sigmoid(self.expand.forward(w))
    }
}

impl<B: Backend> AttentionGate<B> for ChannelAttention<B> {
    fn gate(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let w = self.weights(x.clone());
        x * w
    }
}

/// Pass-through gate.
#[derive(Module, Clone, Debug)]
pub struct IdentityGate {
    channels: usize,
}

impl IdentityGate {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl<B: Backend> AttentionGate<B> for IdentityGate {
    fn gate(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        x
    }
}

/// Gate strategy chosen at construction.
#[derive(Module, Debug)]
pub enum Gate<B: Backend> {
    Channel(ChannelAttention<B>),
    Identity(IdentityGate),
}

impl<B: Backend> Gate<B> {
    pub fn new(device: &B::Device, kind: AttentionKind, channels: usize, activation: Activation) -> Self {
        match kind {
            AttentionKind::Channel => Gate::Channel(ChannelAttention::new(device, channels, activation)),
            AttentionKind::Identity => Gate::Identity(IdentityGate::new(channels)),
        }
    }

    pub fn kind(&self) -> AttentionKind {
        match self {
            Gate::Channel(_) => AttentionKind::Channel,
            Gate::Identity(_) => AttentionKind::Identity,
        }
    }
}

impl<B: Backend> AttentionGate<B> for Gate<B> {
    fn gate(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Gate::Channel(gate) => gate.gate(x),
            Gate::Identity(gate) => AttentionGate::<B>::gate(gate, x),
        }
    }
}

impl<B: Backend> FeatureOp<B> for Gate<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.gate(x)
    }

    fn in_channels(&self) -> usize {
        match self {
            Gate::Channel(gate) => gate.channels,
            Gate::Identity(gate) => gate.channels,
        }
    }

    fn out_channels(&self) -> usize {
        self.in_channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_channel_attention_preserves_shape() {
        let device = Default::default();
        let gate = Gate::<TestBackend>::new(&device, AttentionKind::Channel, 32, Activation::Silu);
        let x = Tensor::<TestBackend, 4>::random([2, 32, 6, 6], Distribution::Default, &device);

        assert_eq!(gate.gate(x).dims(), [2, 32, 6, 6]);
        assert_eq!(gate.kind(), AttentionKind::Channel);
    }

    #[test]
    fn test_channel_weights_are_bounded() {
        let device = Default::default();
        let attention = ChannelAttention::<TestBackend>::new(&device, 16, Activation::Relu);
        let x = Tensor::<TestBackend, 4>::random([1, 16, 4, 4], Distribution::Default, &device);

        let weights = attention.weights(x);
        assert_eq!(weights.dims(), [1, 16, 1, 1]);
        let values: Vec<f32> = weights.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn test_identity_gate_is_pass_through() {
        let device = Default::default();
        let gate = Gate::<TestBackend>::new(&device, AttentionKind::Identity, 4, Activation::Silu);
        let x = Tensor::<TestBackend, 4>::random([1, 4, 3, 3], Distribution::Default, &device);

        let expected: Vec<f32> = x.clone().into_data().to_vec().unwrap();
        let actual: Vec<f32> = gate.gate(x).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }
}
