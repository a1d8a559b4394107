use burn::prelude::*;

use super::{Activation, BaseConv, Bottleneck};

/// Cross-stage partial layer: one half goes through a bottleneck stack, the
/// other half is a plain 1x1 projection; both are merged by a 1x1 conv.
#[derive(Module, Debug)]
pub struct CspLayer<B: Backend> {
    conv1: BaseConv<B>,
    conv2: BaseConv<B>,
    conv3: BaseConv<B>,
    bottlenecks: Vec<Bottleneck<B>>,
}

impl<B: Backend> CspLayer<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        n: usize,
        shortcut: bool,
        depthwise: bool,
        activation: Activation,
    ) -> Self {
        let hidden = out_channels / 2;
        let bottlenecks = (0..n)
            .map(|_| Bottleneck::new(device, hidden, hidden, shortcut, depthwise, activation))
            .collect();

        Self {
            conv1: BaseConv::new(device, in_channels, hidden, 1, 1, activation),
            conv2: BaseConv::new(device, in_channels, hidden, 1, 1, activation),
            conv3: BaseConv::new(device, 2 * hidden, out_channels, 1, 1, activation),
            bottlenecks,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x1 = self.conv1.forward(x.clone());
        for bottleneck in &self.bottlenecks {
            x1 = bottleneck.forward(x1);
        }
        let x2 = self.conv2.forward(x);

        self.conv3.forward(Tensor::cat(vec![x1, x2], 1))
    }

    pub fn depth(&self) -> usize {
        self.bottlenecks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_csp_layer_preserves_spatial() {
        let device = Default::default();
        let layer = CspLayer::<TestBackend>::new(&device, 16, 32, 2, true, false, Activation::Silu);
        let x = Tensor::<TestBackend, 4>::random([1, 16, 8, 8], Distribution::Default, &device);

        assert_eq!(layer.forward(x).dims(), [1, 32, 8, 8]);
        assert_eq!(layer.depth(), 2);
    }
}
