use burn::prelude::*;

use crate::model::blocks::{Activation, ConvBlock, CspLayer, Focus, SppBottleneck};
use crate::model::fusion::BackboneFeatures;
use crate::model::level::{scaled, ScaleLevel};

/// Feature extractor publishing the three detection levels by name.
pub trait Backbone<B: Backend> {
    fn extract(&self, images: Tensor<B, 4>) -> BackboneFeatures<B>;

    /// Channels of the (High, Mid, Low) outputs.
    fn out_channels(&self) -> [usize; 3];
}

/// Stride-2 conv, optional SPP, then a CSP layer.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    down: ConvBlock<B>,
    spp: Option<SppBottleneck<B>>,
    csp: CspLayer<B>,
}

impl<B: Backend> Stage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.down.forward(x);
        if let Some(spp) = &self.spp {
            x = spp.forward(x);
        }
        self.csp.forward(x)
    }
}

/// CSP-Darknet: Focus stem then four stride-2 stages (dark2..dark5).
#[derive(Module, Debug)]
pub struct CspDarknet<B: Backend> {
    stem: Focus<B>,
    dark2: Stage<B>,
    dark3: Stage<B>,
    dark4: Stage<B>,
    dark5: Stage<B>,
    base_channels: usize,
}

impl<B: Backend> CspDarknet<B> {
    pub fn new(
        device: &B::Device,
        depth: f64,
        width: f64,
        depthwise: bool,
        activation: Activation,
    ) -> Self {
        let c = scaled(64, width);
        let n = ((depth * 3.0).round() as usize).max(1);

        let stage = |cin: usize, cout: usize, blocks: usize, last: bool| Stage {
            down: ConvBlock::new(device, cin, cout, 3, 2, depthwise, activation),
            spp: last.then(|| SppBottleneck::new(device, cout, cout, activation)),
            csp: CspLayer::new(device, cout, cout, blocks, !last, depthwise, activation),
        };

        log::info!("CspDarknet init: base_channels={c}, base_depth={n}, depthwise={depthwise}");

        Self {
            stem: Focus::new(device, 3, c, 3, activation),   // 640 -> 320
            dark2: stage(c, c * 2, n, false),                  // 320 -> 160
            dark3: stage(c * 2, c * 4, n * 3, false),          // 160 -> 80
            dark4: stage(c * 4, c * 8, n * 3, false),          // 80 -> 40
            dark5: stage(c * 8, c * 16, n, true),              // 40 -> 20
            base_channels: c,
        }
    }

    /// (High, Mid, Low) output channels for a width multiplier, without
    /// building anything.
    pub fn channels_for(width: f64) -> [usize; 3] {
        let c = scaled(64, width);
        [c * 4, c * 8, c * 16]
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        let x = self.stem.forward(x);
        let x = self.dark2.forward(x);

        let p3 = self.dark3.forward(x);
        let p4 = self.dark4.forward(p3.clone());
        let p5 = self.dark5.forward(p4.clone());

        (p3, p4, p5)
    }
}

impl<B: Backend> Backbone<B> for CspDarknet<B> {
    fn extract(&self, images: Tensor<B, 4>) -> BackboneFeatures<B> {
        let (p3, p4, p5) = self.forward(images);

        let mut features = BackboneFeatures::new();
        features.insert(ScaleLevel::High.feature_name(), p3);
        features.insert(ScaleLevel::Mid.feature_name(), p4);
        features.insert(ScaleLevel::Low.feature_name(), p5);
        features
    }

    fn out_channels(&self) -> [usize; 3] {
        let c = self.base_channels;
        [c * 4, c * 8, c * 16]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_strides_and_channels() {
        let device = Default::default();
        let backbone = CspDarknet::<TestBackend>::new(&device, 0.33, 0.25, true, Activation::Silu);
        assert_eq!(backbone.out_channels(), [64, 128, 256]);
        assert_eq!(CspDarknet::<TestBackend>::channels_for(0.25), backbone.out_channels());

        let x = Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Default, &device);
        let features = backbone.extract(x);

        assert_eq!(features.len(), 3);
        assert_eq!(features.get("dark3").unwrap().dims(), [1, 64, 8, 8]);
        assert_eq!(features.get("dark4").unwrap().dims(), [1, 128, 4, 4]);
        assert_eq!(features.get("dark5").unwrap().dims(), [1, 256, 2, 2]);
    }
}
